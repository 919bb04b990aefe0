//! JSON bodies of the events the server emits.

use serde::{Deserialize, Serialize};

/// Lifecycle state reported in `workload:status`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum WorkloadStatus {
    Pending,
    Running,
    Failed,
    Error,
    TimedOut,
    Stopped,
}

/// Session state reported in `workload:command-status`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CommandStatus {
    Success,
    Failed,
    Stopped,
    TimedOut,
    Completed,
}

/// Result reported in `workload:file-status`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FileStatus {
    Success,
    Failed,
}

/// Body of `workload:status`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkloadStatusResponse {
    pub id: String,
    pub hash: String,
    pub status: WorkloadStatus,
}

/// Body of `workload:command-status`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandStatusResponse {
    pub exec_id: String,
    pub cell_id: String,
    pub status: CommandStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

/// Body of `workload:file-status`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileStatusResponse {
    pub cell_id: String,
    pub path: String,
    pub status: FileStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

/// Body written back on the offending channel and event when handling fails.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn workload_status_wire_shape() {
        let body = WorkloadStatusResponse {
            id: String::new(),
            hash: "h1".into(),
            status: WorkloadStatus::TimedOut,
        };
        assert_eq!(
            serde_json::to_value(&body).unwrap(),
            json!({"id": "", "hash": "h1", "status": "timed-out"})
        );
    }

    #[test]
    fn command_status_omits_missing_reason() {
        let body = CommandStatusResponse {
            exec_id: "e".into(),
            cell_id: "c".into(),
            status: CommandStatus::Success,
            reason: None,
        };
        assert_eq!(
            serde_json::to_value(&body).unwrap(),
            json!({"exec_id": "e", "cell_id": "c", "status": "success"})
        );
    }
}
