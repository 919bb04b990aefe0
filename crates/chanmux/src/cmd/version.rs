use crate::cmd::VersionArgs;
use crate::exit::{CliResult, SUCCESS};

pub fn run(args: VersionArgs) -> CliResult<i32> {
    if !args.extended {
        println!("chanmux {}", env!("CARGO_PKG_VERSION"));
        return Ok(SUCCESS);
    }

    println!("name: chanmux");
    println!("version: {}", env!("CARGO_PKG_VERSION"));
    println!(
        "target: {}",
        option_env!("CHANMUX_BUILD_TARGET").unwrap_or("unknown")
    );
    println!("target_os: {}", std::env::consts::OS);
    println!("target_arch: {}", std::env::consts::ARCH);
    println!("max_field_len: {}", chanmux_frame::MAX_FIELD_LEN);
    println!(
        "max_message_size: {}",
        chanmux_transport::DEFAULT_MAX_MESSAGE
    );
    println!(
        "features: peer={}, exec={}, local-runtime={}, cli=true",
        cfg!(feature = "peer"),
        cfg!(feature = "exec"),
        cfg!(feature = "local-runtime")
    );

    Ok(SUCCESS)
}
