use std::fmt;

/// One invalid field of an inbound request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FieldIssue {
    /// A required string field is missing or empty.
    Required(&'static str),
    /// A required list field is missing or empty.
    Empty(&'static str),
    /// The payload could not be parsed at all.
    InvalidInput { what: &'static str, detail: String },
}

impl fmt::Display for FieldIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FieldIssue::Required(field) => write!(f, "`{field}` is a required field"),
            FieldIssue::Empty(field) => write!(f, "`{field}` cannot be empty"),
            FieldIssue::InvalidInput { what, detail } => {
                write!(f, "invalid input supplied for {what}: {detail}")
            }
        }
    }
}

/// An inbound request failed validation. Holds at least one issue.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{}", join_issues(.issues))]
pub struct ValidationError {
    issues: Vec<FieldIssue>,
}

impl ValidationError {
    pub fn issues(&self) -> &[FieldIssue] {
        &self.issues
    }

    pub(crate) fn invalid_input(what: &'static str, err: serde_json::Error) -> Self {
        Self {
            issues: vec![FieldIssue::InvalidInput {
                what,
                detail: err.to_string(),
            }],
        }
    }

    /// `Ok(())` when `issues` is empty.
    pub(crate) fn check(issues: Vec<FieldIssue>) -> Result<(), Self> {
        if issues.is_empty() {
            Ok(())
        } else {
            Err(Self { issues })
        }
    }
}

fn join_issues(issues: &[FieldIssue]) -> String {
    issues
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

/// Errors produced while a channel handles an inbound event.
#[derive(Debug, thiserror::Error)]
pub enum ChannelError {
    /// The channel does not handle this event.
    #[error("unknown event name {event} on {kind} channel {channel_id}")]
    UnknownEvent {
        channel_id: String,
        kind: &'static str,
        event: String,
    },

    /// The payload did not produce a valid intent.
    #[error(transparent)]
    Validation(#[from] ValidationError),

    /// The command session behind the channel has ended.
    #[error("session {0} is closed")]
    ConduitClosed(String),
}

/// Errors reported by a workload runtime.
#[derive(Debug, thiserror::Error)]
pub enum RuntimeError {
    #[error("workload {0} not found")]
    NotFound(String),

    #[error("runtime I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    Other(String),
}

/// Errors from the intent executor.
#[derive(Debug, thiserror::Error)]
pub enum ExecutorError {
    /// The intent queue no longer accepts intents; the executor is shutting down.
    #[error("intent queue is closed")]
    QueueClosed,
}
