//! Well-known channel ids and event names.
//!
//! Event names are namespaced by the channel kind that receives or emits
//! them: `workload:*` on the root and workload channels, `session:*` on
//! command-session channels.

/// Default id of the root channel that exists for every connection.
pub const DEFAULT_ROOT_CHANNEL: &str = "root";

/// Root: create a workload.
pub const WORKLOAD_START: &str = "workload:start";

/// Root: stop a workload.
pub const WORKLOAD_STOP: &str = "workload:stop";

/// Outbound: workload lifecycle status.
pub const WORKLOAD_STATUS: &str = "workload:status";

/// Workload: start a command session.
pub const WORKLOAD_EXECUTE_COMMAND: &str = "workload:execute-command";

/// Workload: read or write a file inside the workload.
pub const WORKLOAD_SYNC_FILE: &str = "workload:sync-file";

/// Workload: wait until the workload reports running.
pub const WORKLOAD_WAIT: &str = "workload:wait";

/// Outbound: command-session status, on the workload channel.
pub const WORKLOAD_COMMAND_STATUS: &str = "workload:command-status";

/// Outbound: result of a file sync, on the workload channel.
pub const WORKLOAD_FILE_STATUS: &str = "workload:file-status";

/// Session: raw bytes for the command's stdin.
pub const SESSION_INPUT: &str = "session:input";

/// Session: control signal for the session (see [`CONTROL_QUIT`]).
pub const SESSION_CONTROL: &str = "session:control";

/// Outbound: raw bytes produced by the command.
pub const SESSION_OUTPUT: &str = "session:output";

/// Control signal that ends a command session.
pub const CONTROL_QUIT: &str = "quit";

/// Every inbound event name, in the order they are documented.
pub const INBOUND_EVENTS: &[&str] = &[
    WORKLOAD_START,
    WORKLOAD_STOP,
    WORKLOAD_EXECUTE_COMMAND,
    WORKLOAD_SYNC_FILE,
    WORKLOAD_WAIT,
    SESSION_INPUT,
    SESSION_CONTROL,
];

/// Returns true if `event_name` is one a client may send.
pub fn is_inbound(event_name: &str) -> bool {
    INBOUND_EVENTS.contains(&event_name)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn event_names_fit_in_a_frame() {
        let outbound = [
            WORKLOAD_STATUS,
            WORKLOAD_COMMAND_STATUS,
            WORKLOAD_FILE_STATUS,
            SESSION_OUTPUT,
        ];
        for name in INBOUND_EVENTS.iter().chain(&outbound) {
            assert!(!name.is_empty());
            assert!(name.len() <= crate::MAX_FIELD_LEN);
        }
    }

    #[test]
    fn only_client_events_are_inbound() {
        assert!(is_inbound(SESSION_CONTROL));
        assert!(is_inbound(WORKLOAD_START));
        assert!(!is_inbound(WORKLOAD_STATUS));
        assert!(!is_inbound(SESSION_OUTPUT));
        assert!(!is_inbound("workload:unknown"));
    }
}
