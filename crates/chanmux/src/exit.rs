use std::fmt;
use std::io;

use chanmux_frame::FrameError;
use chanmux_peer::PeerError;
use chanmux_transport::TransportError;

pub const SUCCESS: i32 = 0;
pub const FAILURE: i32 = 1;
pub const TRANSPORT_ERROR: i32 = 3;
pub const PERMISSION_DENIED: i32 = 50;
pub const DATA_INVALID: i32 = 60;
pub const USAGE: i32 = 64;
pub const TIMEOUT: i32 = 124;
pub const INTERNAL: i32 = 125;

pub type CliResult<T> = Result<T, CliError>;

/// A failure that ends the process with `code`.
#[derive(Debug, thiserror::Error)]
#[error("{message}")]
pub struct CliError {
    pub code: i32,
    pub message: String,
}

impl CliError {
    pub fn new(code: i32, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    fn contextual(code: i32, context: &str, err: impl fmt::Display) -> Self {
        Self::new(code, format!("{context}: {err}"))
    }
}

fn io_code(kind: io::ErrorKind) -> i32 {
    match kind {
        io::ErrorKind::PermissionDenied => PERMISSION_DENIED,
        io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock => TIMEOUT,
        io::ErrorKind::ConnectionRefused | io::ErrorKind::NotFound => FAILURE,
        io::ErrorKind::AlreadyExists | io::ErrorKind::AddrInUse => USAGE,
        _ => INTERNAL,
    }
}

pub fn io_error(context: &str, err: io::Error) -> CliError {
    CliError::contextual(io_code(err.kind()), context, err)
}

pub fn transport_error(context: &str, err: TransportError) -> CliError {
    let code = match &err {
        TransportError::Bind { source, .. }
        | TransportError::Connect { source, .. }
        | TransportError::Io(source) => io_code(source.kind()),
        TransportError::Accept(_) => TRANSPORT_ERROR,
        TransportError::PathTooLong { .. } => USAGE,
        TransportError::MessageTooLarge { .. } | TransportError::InboundTooLarge { .. } => {
            DATA_INVALID
        }
        TransportError::Closed => FAILURE,
    };
    CliError::contextual(code, context, err)
}

pub fn peer_error(context: &str, err: PeerError) -> CliError {
    match err {
        PeerError::Transport(err) => transport_error(context, err),
        // Only encoding can overflow a length field, and only for oversized arguments.
        PeerError::Frame(err @ FrameError::LengthOverflow { .. }) => {
            CliError::contextual(USAGE, context, err)
        }
        PeerError::Frame(err) => CliError::contextual(DATA_INVALID, context, err),
        PeerError::Json(err) => CliError::contextual(DATA_INVALID, context, err),
        other => CliError::contextual(INTERNAL, context, other),
    }
}
