//! Validated requests produced by channels and consumed by the executor.
//!
//! Every intent type has private fields and is only built through a
//! validating constructor, so an executor never sees a half-filled request.
//! The `*Request` types are the JSON bodies clients send.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{FieldIssue, ValidationError};

/// Network settings of a workload create request.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkOptions {
    #[serde(default)]
    pub ports: Vec<String>,
}

/// Body of `workload:start`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateWorkloadRequest {
    /// Existing workload to re-attach to, if the runtime supports it.
    #[serde(default, rename = "container_id", skip_serializing_if = "Option::is_none")]
    pub workload_id: Option<String>,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub image: String,
    #[serde(default)]
    pub tag: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub repo_url: String,
    #[serde(default)]
    pub network_options: NetworkOptions,
    /// `KEY=VALUE` pairs.
    #[serde(default)]
    pub env: Vec<String>,
    #[serde(default)]
    pub command: Vec<String>,
    /// Correlation hash echoed back in every status for this request.
    #[serde(default)]
    pub hash: String,
}

/// Body of `workload:execute-command`.
///
/// A bare JSON array is accepted as shorthand for `{"command": [...]}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecuteCommandRequest {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cell_id: Option<String>,
    #[serde(default = "default_true")]
    pub interactive: bool,
    #[serde(default = "default_true")]
    pub use_tty: bool,
    /// Session timeout in seconds; absent or zero means no deadline.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout: Option<u64>,
    #[serde(default)]
    pub command: Vec<String>,
}

impl Default for ExecuteCommandRequest {
    fn default() -> Self {
        Self {
            cell_id: None,
            interactive: true,
            use_tty: true,
            timeout: None,
            command: Vec::new(),
        }
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum ExecutePayload {
    Command(Vec<String>),
    Request(ExecuteCommandRequest),
}

fn default_true() -> bool {
    true
}

/// Body of `workload:sync-file`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncFileRequest {
    #[serde(default)]
    pub path: String,
    #[serde(default)]
    pub cell_id: String,
    /// Content to write; absent means read the file.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
}

/// Body of `workload:wait`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WaitRequest {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout: Option<u64>,
    #[serde(default)]
    pub hash: String,
}

/// Body of `workload:stop`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StopRequest {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub hash: String,
}

fn parse<'a, T: Deserialize<'a>>(what: &'static str, payload: &'a [u8]) -> Result<T, ValidationError> {
    serde_json::from_slice(payload).map_err(|err| ValidationError::invalid_input(what, err))
}

fn require(issues: &mut Vec<FieldIssue>, field: &'static str, value: &str) {
    if value.trim().is_empty() {
        issues.push(FieldIssue::Required(field));
    }
}

fn require_non_empty<T>(issues: &mut Vec<FieldIssue>, field: &'static str, value: &[T]) {
    if value.is_empty() {
        issues.push(FieldIssue::Empty(field));
    }
}

fn seconds(value: Option<u64>) -> Option<Duration> {
    value.filter(|secs| *secs > 0).map(Duration::from_secs)
}

/// Create a new workload and report its lifecycle on the origin channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreateWorkload {
    origin_channel_id: String,
    workload_id: Option<String>,
    name: String,
    image: String,
    image_tag: String,
    repo_url: String,
    ports: Vec<String>,
    env_vars: Vec<String>,
    command: Vec<String>,
    correlation_hash: String,
}

impl CreateWorkload {
    pub fn try_new(
        origin_channel_id: impl Into<String>,
        request: CreateWorkloadRequest,
    ) -> Result<Self, ValidationError> {
        let mut issues = Vec::new();
        require(&mut issues, "name", &request.name);
        require(&mut issues, "image", &request.image);
        require(&mut issues, "tag", &request.tag);
        require_non_empty(&mut issues, "command", &request.command);
        require(&mut issues, "hash", &request.hash);
        ValidationError::check(issues)?;

        Ok(Self {
            origin_channel_id: origin_channel_id.into(),
            workload_id: request.workload_id.filter(|id| !id.is_empty()),
            name: request.name,
            image: request.image,
            image_tag: request.tag,
            repo_url: request.repo_url,
            ports: request.network_options.ports,
            env_vars: request.env,
            command: request.command,
            correlation_hash: request.hash,
        })
    }

    /// Parse and validate a `workload:start` payload.
    pub fn from_payload(
        origin_channel_id: impl Into<String>,
        payload: &[u8],
    ) -> Result<Self, ValidationError> {
        Self::try_new(origin_channel_id, parse("creating workload", payload)?)
    }

    pub fn origin_channel_id(&self) -> &str {
        &self.origin_channel_id
    }

    pub fn workload_id(&self) -> Option<&str> {
        self.workload_id.as_deref()
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn image(&self) -> &str {
        &self.image
    }

    pub fn image_tag(&self) -> &str {
        &self.image_tag
    }

    pub fn repo_url(&self) -> &str {
        &self.repo_url
    }

    pub fn ports(&self) -> &[String] {
        &self.ports
    }

    pub fn env_vars(&self) -> &[String] {
        &self.env_vars
    }

    pub fn command(&self) -> &[String] {
        &self.command
    }

    pub fn correlation_hash(&self) -> &str {
        &self.correlation_hash
    }

    /// `image:tag`, prefixed with the repository when one is set.
    pub fn image_reference(&self) -> String {
        let reference = format!("{}:{}", self.image, self.image_tag);
        if self.repo_url.is_empty() {
            reference
        } else {
            format!("{}/{}", self.repo_url.trim_end_matches('/'), reference)
        }
    }
}

/// Start a command session inside a workload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecuteCommand {
    workload_id: String,
    session_id: String,
    interactive: bool,
    use_tty: bool,
    timeout: Option<Duration>,
    command: Vec<String>,
}

impl ExecuteCommand {
    /// Validate a request. Without a `cell_id` the session gets a generated
    /// `<workload>-<8 hex>` id.
    pub fn try_new(
        workload_id: impl Into<String>,
        request: ExecuteCommandRequest,
    ) -> Result<Self, ValidationError> {
        let workload_id = workload_id.into();
        let mut issues = Vec::new();
        require(&mut issues, "workload_id", &workload_id);
        require_non_empty(&mut issues, "command", &request.command);
        ValidationError::check(issues)?;

        let session_id = match request.cell_id.filter(|id| !id.trim().is_empty()) {
            Some(id) => id,
            None => generated_session_id(&workload_id),
        };

        Ok(Self {
            workload_id,
            session_id,
            interactive: request.interactive,
            use_tty: request.use_tty,
            timeout: seconds(request.timeout),
            command: request.command,
        })
    }

    /// Parse and validate a `workload:execute-command` payload.
    pub fn from_payload(
        workload_id: impl Into<String>,
        payload: &[u8],
    ) -> Result<Self, ValidationError> {
        let request = match parse::<ExecutePayload>("executing command", payload)? {
            ExecutePayload::Command(command) => ExecuteCommandRequest {
                command,
                ..ExecuteCommandRequest::default()
            },
            ExecutePayload::Request(request) => request,
        };
        Self::try_new(workload_id, request)
    }

    pub fn workload_id(&self) -> &str {
        &self.workload_id
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn interactive(&self) -> bool {
        self.interactive
    }

    pub fn use_tty(&self) -> bool {
        self.use_tty
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    pub fn command(&self) -> &[String] {
        &self.command
    }
}

fn generated_session_id(workload_id: &str) -> String {
    let suffix = uuid::Uuid::new_v4().simple().to_string();
    format!("{workload_id}-{}", &suffix[..8])
}

/// Read a file from, or write a file into, a workload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncFile {
    workload_id: String,
    file_path: String,
    session_id: String,
    content: Option<String>,
}

impl SyncFile {
    pub fn try_new(
        workload_id: impl Into<String>,
        request: SyncFileRequest,
    ) -> Result<Self, ValidationError> {
        let workload_id = workload_id.into();
        let mut issues = Vec::new();
        require(&mut issues, "workload_id", &workload_id);
        require(&mut issues, "path", &request.path);
        require(&mut issues, "cell_id", &request.cell_id);
        ValidationError::check(issues)?;

        Ok(Self {
            workload_id,
            file_path: request.path,
            session_id: request.cell_id,
            content: request.content,
        })
    }

    /// Parse and validate a `workload:sync-file` payload.
    pub fn from_payload(
        workload_id: impl Into<String>,
        payload: &[u8],
    ) -> Result<Self, ValidationError> {
        Self::try_new(workload_id, parse("syncing file", payload)?)
    }

    pub fn workload_id(&self) -> &str {
        &self.workload_id
    }

    pub fn file_path(&self) -> &str {
        &self.file_path
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    /// Content to write, or `None` for a read.
    pub fn content(&self) -> Option<&str> {
        self.content.as_deref()
    }

    /// The shell command that performs this sync inside the workload.
    ///
    /// The path is passed as a positional argument, never spliced into the
    /// script text.
    pub fn command(&self) -> Vec<String> {
        match self.content {
            None => vec!["cat".into(), "--".into(), self.file_path.clone()],
            Some(_) => vec![
                "sh".into(),
                "-c".into(),
                r#"cat > "$1""#.into(),
                "sh".into(),
                self.file_path.clone(),
            ],
        }
    }
}

/// Poll a workload until it runs, fails to inspect, or times out.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WaitForWorkload {
    origin_channel_id: String,
    workload_id: String,
    correlation_hash: String,
    timeout: Option<Duration>,
}

impl WaitForWorkload {
    pub fn try_new(
        origin_channel_id: impl Into<String>,
        workload_id: impl Into<String>,
        correlation_hash: impl Into<String>,
        timeout_seconds: Option<u64>,
    ) -> Result<Self, ValidationError> {
        let workload_id = workload_id.into();
        let mut issues = Vec::new();
        require(&mut issues, "workload_id", &workload_id);
        ValidationError::check(issues)?;

        Ok(Self {
            origin_channel_id: origin_channel_id.into(),
            workload_id,
            correlation_hash: correlation_hash.into(),
            timeout: seconds(timeout_seconds),
        })
    }

    /// Parse a `workload:wait` payload received on the workload's own channel.
    /// An empty payload waits with defaults.
    pub fn from_payload(workload_id: &str, payload: &[u8]) -> Result<Self, ValidationError> {
        let request: WaitRequest = if payload.iter().all(u8::is_ascii_whitespace) {
            WaitRequest::default()
        } else {
            parse("waiting for workload", payload)?
        };
        Self::try_new(workload_id, workload_id, request.hash, request.timeout)
    }

    pub fn origin_channel_id(&self) -> &str {
        &self.origin_channel_id
    }

    pub fn workload_id(&self) -> &str {
        &self.workload_id
    }

    pub fn correlation_hash(&self) -> &str {
        &self.correlation_hash
    }

    /// Explicit timeout, or `None` to use the executor default.
    pub fn timeout(&self) -> Option<Duration> {
        self.timeout
    }
}

/// Stop a workload and drop its channels.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StopWorkload {
    origin_channel_id: String,
    workload_id: String,
    correlation_hash: String,
}

impl StopWorkload {
    pub fn try_new(
        origin_channel_id: impl Into<String>,
        request: StopRequest,
    ) -> Result<Self, ValidationError> {
        let mut issues = Vec::new();
        require(&mut issues, "id", &request.id);
        ValidationError::check(issues)?;

        Ok(Self {
            origin_channel_id: origin_channel_id.into(),
            workload_id: request.id,
            correlation_hash: request.hash,
        })
    }

    /// Parse and validate a `workload:stop` payload.
    pub fn from_payload(
        origin_channel_id: impl Into<String>,
        payload: &[u8],
    ) -> Result<Self, ValidationError> {
        Self::try_new(origin_channel_id, parse("stopping workload", payload)?)
    }

    pub fn origin_channel_id(&self) -> &str {
        &self.origin_channel_id
    }

    pub fn workload_id(&self) -> &str {
        &self.workload_id
    }

    pub fn correlation_hash(&self) -> &str {
        &self.correlation_hash
    }
}

/// A unit of work for the executor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Intent {
    CreateWorkload(CreateWorkload),
    ExecuteCommand(ExecuteCommand),
    SyncFile(SyncFile),
    WaitForWorkload(WaitForWorkload),
    StopWorkload(StopWorkload),
}

impl Intent {
    /// Short name for logs.
    pub fn kind(&self) -> &'static str {
        match self {
            Intent::CreateWorkload(_) => "create-workload",
            Intent::ExecuteCommand(_) => "execute-command",
            Intent::SyncFile(_) => "sync-file",
            Intent::WaitForWorkload(_) => "wait-for-workload",
            Intent::StopWorkload(_) => "stop-workload",
        }
    }
}

macro_rules! impl_from_intent {
    ($($variant:ident),*) => {
        $(impl From<$variant> for Intent {
            fn from(intent: $variant) -> Self {
                Intent::$variant(intent)
            }
        })*
    };
}

impl_from_intent!(CreateWorkload, ExecuteCommand, SyncFile, WaitForWorkload, StopWorkload);

#[cfg(test)]
mod tests {
    use super::*;

    const CREATE: &[u8] =
        br#"{"name":"n","image":"python","tag":"3.9","command":["sh"],"hash":"h1"}"#;

    #[test]
    fn create_from_minimal_payload() {
        let intent = CreateWorkload::from_payload("root", CREATE).unwrap();
        assert_eq!(intent.origin_channel_id(), "root");
        assert_eq!(intent.name(), "n");
        assert_eq!(intent.image_reference(), "python:3.9");
        assert_eq!(intent.command(), ["sh".to_string()]);
        assert_eq!(intent.correlation_hash(), "h1");
        assert_eq!(intent.workload_id(), None);
        assert!(intent.ports().is_empty());
    }

    #[test]
    fn create_carries_optional_fields() {
        let payload = br#"{
            "container_id": "abc123",
            "name": "n", "image": "python", "tag": "3.9",
            "repo_url": "registry.local:5000/",
            "network_options": {"ports": ["8888:8888"]},
            "env": ["A=1"],
            "command": ["sleep", "60"],
            "hash": "h"
        }"#;
        let intent = CreateWorkload::from_payload("root", payload).unwrap();
        assert_eq!(intent.workload_id(), Some("abc123"));
        assert_eq!(intent.ports(), ["8888:8888".to_string()]);
        assert_eq!(intent.env_vars(), ["A=1".to_string()]);
        assert_eq!(intent.image_reference(), "registry.local:5000/python:3.9");
    }

    #[test]
    fn create_reports_every_missing_field() {
        let err = CreateWorkload::from_payload("root", br#"{"image":"python"}"#).unwrap_err();
        assert_eq!(
            err.issues(),
            [
                FieldIssue::Required("name"),
                FieldIssue::Required("tag"),
                FieldIssue::Empty("command"),
                FieldIssue::Required("hash"),
            ]
        );
        assert!(err.to_string().starts_with("`name` is a required field; "));
    }

    #[test]
    fn create_rejects_wrong_types() {
        let err = CreateWorkload::from_payload("root", br#"{"name": 5}"#).unwrap_err();
        assert!(matches!(
            err.issues(),
            [FieldIssue::InvalidInput { what: "creating workload", .. }]
        ));
        assert!(err
            .to_string()
            .starts_with("invalid input supplied for creating workload"));
    }

    #[test]
    fn create_rejects_non_json() {
        assert!(CreateWorkload::from_payload("root", b"not json").is_err());
    }

    #[test]
    fn execute_defaults_to_interactive_tty() {
        let intent =
            ExecuteCommand::from_payload("w1", br#"{"cell_id":"c1","command":["python"]}"#).unwrap();
        assert_eq!(intent.workload_id(), "w1");
        assert_eq!(intent.session_id(), "c1");
        assert!(intent.interactive());
        assert!(intent.use_tty());
        assert_eq!(intent.timeout(), None);
    }

    #[test]
    fn execute_accepts_bare_command_array() {
        let intent = ExecuteCommand::from_payload("w1", br#"["ls","-la"]"#).unwrap();
        assert_eq!(intent.command(), ["ls".to_string(), "-la".to_string()]);
        assert!(intent.interactive());
    }

    #[test]
    fn execute_empty_command_fails() {
        let err = ExecuteCommand::from_payload("w1", br#"{"command":[]}"#).unwrap_err();
        assert_eq!(err.issues(), [FieldIssue::Empty("command")]);
        assert!(ExecuteCommand::from_payload("w1", b"[]").is_err());
    }

    #[test]
    fn execute_generates_session_id() {
        let intent = ExecuteCommand::from_payload("w1", br#"{"command":["ls"]}"#).unwrap();
        let suffix = intent.session_id().strip_prefix("w1-").unwrap();
        assert_eq!(suffix.len(), 8);
        assert!(suffix.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn execute_timeout_zero_means_none() {
        let intent =
            ExecuteCommand::from_payload("w1", br#"{"command":["ls"],"timeout":0}"#).unwrap();
        assert_eq!(intent.timeout(), None);
        let intent =
            ExecuteCommand::from_payload("w1", br#"{"command":["ls"],"timeout":5,"interactive":false}"#)
                .unwrap();
        assert_eq!(intent.timeout(), Some(Duration::from_secs(5)));
        assert!(!intent.interactive());
    }

    #[test]
    fn sync_file_read_and_write_commands() {
        let read = SyncFile::from_payload("w1", br#"{"path":"/tmp/a b","cell_id":"c"}"#).unwrap();
        assert_eq!(read.command(), ["cat", "--", "/tmp/a b"]);
        assert_eq!(read.content(), None);

        let write =
            SyncFile::from_payload("w1", br#"{"path":"/x","cell_id":"c","content":"hi"}"#).unwrap();
        assert_eq!(write.command(), ["sh", "-c", r#"cat > "$1""#, "sh", "/x"]);
        assert_eq!(write.content(), Some("hi"));
    }

    #[test]
    fn sync_file_requires_path_and_cell() {
        let err = SyncFile::from_payload("w1", b"{}").unwrap_err();
        assert_eq!(
            err.issues(),
            [FieldIssue::Required("path"), FieldIssue::Required("cell_id")]
        );
    }

    #[test]
    fn wait_accepts_empty_payload() {
        let intent = WaitForWorkload::from_payload("w1", b"").unwrap();
        assert_eq!(intent.origin_channel_id(), "w1");
        assert_eq!(intent.workload_id(), "w1");
        assert_eq!(intent.timeout(), None);

        let intent = WaitForWorkload::from_payload("w1", br#"{"timeout":30,"hash":"h"}"#).unwrap();
        assert_eq!(intent.timeout(), Some(Duration::from_secs(30)));
        assert_eq!(intent.correlation_hash(), "h");
    }

    #[test]
    fn wait_requires_workload_id() {
        assert!(WaitForWorkload::try_new("root", "", "h", None).is_err());
    }

    #[test]
    fn stop_requires_id() {
        let err = StopWorkload::from_payload("root", br#"{"hash":"h"}"#).unwrap_err();
        assert_eq!(err.issues(), [FieldIssue::Required("id")]);

        let intent = StopWorkload::from_payload("root", br#"{"id":"w1"}"#).unwrap();
        assert_eq!(intent.workload_id(), "w1");
        assert_eq!(intent.correlation_hash(), "");
    }

    #[test]
    fn intent_kind_and_from() {
        let intent: Intent = StopWorkload::from_payload("root", br#"{"id":"w1"}"#)
            .unwrap()
            .into();
        assert_eq!(intent.kind(), "stop-workload");
    }
}
