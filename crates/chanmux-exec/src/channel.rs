use std::sync::Arc;

use bytes::Bytes;
use chanmux_frame::events;
use chanmux_peer::MuxConnection;

use crate::conduit::{Conduit, ControlSignal};
use crate::error::ChannelError;
use crate::intent::{
    CreateWorkload, ExecuteCommand, Intent, StopWorkload, SyncFile, WaitForWorkload,
};

/// A multiplexed connection whose registry holds [`Channel`]s.
pub type Connection = MuxConnection<Channel>;

/// Control channel of a connection. Creates and stops workloads.
#[derive(Debug, Clone)]
pub struct RootChannel {
    id: String,
}

/// One per workload, keyed by the runtime's workload id.
#[derive(Debug, Clone)]
pub struct WorkloadChannel {
    id: String,
}

/// One per live command session, keyed by the session id.
#[derive(Debug, Clone)]
pub struct CommandChannel {
    id: String,
    workload_id: String,
    conduit: Arc<Conduit>,
}

/// A registered channel. Turns inbound events into intents.
#[derive(Debug, Clone)]
pub enum Channel {
    Root(RootChannel),
    Workload(WorkloadChannel),
    Command(CommandChannel),
}

impl Channel {
    pub fn root(id: impl Into<String>) -> Self {
        Channel::Root(RootChannel { id: id.into() })
    }

    pub fn workload(id: impl Into<String>) -> Self {
        Channel::Workload(WorkloadChannel { id: id.into() })
    }

    /// A command channel keyed by the conduit's session id.
    pub fn command(workload_id: impl Into<String>, conduit: Arc<Conduit>) -> Self {
        Channel::Command(CommandChannel {
            id: conduit.session_id().to_string(),
            workload_id: workload_id.into(),
            conduit,
        })
    }

    pub fn id(&self) -> &str {
        match self {
            Channel::Root(root) => &root.id,
            Channel::Workload(workload) => &workload.id,
            Channel::Command(command) => &command.id,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Channel::Root(_) => "root",
            Channel::Workload(_) => "workload",
            Channel::Command(_) => "command",
        }
    }

    /// The workload this channel belongs to; `None` for the root channel.
    pub fn workload_id(&self) -> Option<&str> {
        match self {
            Channel::Root(_) => None,
            Channel::Workload(workload) => Some(&workload.id),
            Channel::Command(command) => Some(&command.workload_id),
        }
    }

    pub fn conduit(&self) -> Option<&Arc<Conduit>> {
        match self {
            Channel::Command(command) => Some(&command.conduit),
            _ => None,
        }
    }

    /// Handle one inbound event.
    ///
    /// Root and workload channels only parse; command channels forward into
    /// the session and never produce intents.
    pub async fn handle(&self, event_name: &str, payload: Bytes) -> Result<Vec<Intent>, ChannelError> {
        let handled = match self {
            Channel::Root(root) => root.handle(event_name, &payload)?,
            Channel::Workload(workload) => workload.handle(event_name, &payload)?,
            Channel::Command(command) => command.handle(event_name, payload).await?,
        };
        handled.ok_or_else(|| ChannelError::UnknownEvent {
            channel_id: self.id().to_string(),
            kind: self.kind(),
            event: event_name.to_string(),
        })
    }
}

// Each handler returns `None` for an event it does not know.

impl RootChannel {
    fn handle(&self, event_name: &str, payload: &[u8]) -> Result<Option<Vec<Intent>>, ChannelError> {
        let intent: Intent = match event_name {
            events::WORKLOAD_START => CreateWorkload::from_payload(&self.id, payload)?.into(),
            events::WORKLOAD_STOP => StopWorkload::from_payload(&self.id, payload)?.into(),
            _ => return Ok(None),
        };
        Ok(Some(vec![intent]))
    }
}

impl WorkloadChannel {
    fn handle(&self, event_name: &str, payload: &[u8]) -> Result<Option<Vec<Intent>>, ChannelError> {
        let intent: Intent = match event_name {
            events::WORKLOAD_EXECUTE_COMMAND => {
                ExecuteCommand::from_payload(&self.id, payload)?.into()
            }
            events::WORKLOAD_SYNC_FILE => SyncFile::from_payload(&self.id, payload)?.into(),
            events::WORKLOAD_WAIT => WaitForWorkload::from_payload(&self.id, payload)?.into(),
            _ => return Ok(None),
        };
        Ok(Some(vec![intent]))
    }
}

impl CommandChannel {
    async fn handle(&self, event_name: &str, payload: Bytes) -> Result<Option<Vec<Intent>>, ChannelError> {
        match event_name {
            events::SESSION_INPUT => self.conduit.send_input(payload).await?,
            events::SESSION_CONTROL => {
                self.conduit
                    .send_control(ControlSignal::parse(&payload))
                    .await?
            }
            _ => return Ok(None),
        }
        Ok(Some(Vec::new()))
    }
}

#[cfg(test)]
mod tests {
    use tokio::sync::mpsc;

    use super::*;
    use crate::error::FieldIssue;
    use crate::runtime::ExecAttachment;

    const CREATE: &[u8] =
        br#"{"name":"n","image":"python","tag":"3.9","command":["sh"],"hash":"h1"}"#;

    fn command_channel() -> (Channel, mpsc::Receiver<Bytes>) {
        let (_output_tx, output) = mpsc::channel(4);
        let (input, input_rx) = mpsc::channel(4);
        let conduit = Conduit::new(
            "cell-1",
            ExecAttachment {
                exec_id: "exec-1".into(),
                output,
                input,
            },
            4,
        );
        (Channel::command("w1", Arc::new(conduit)), input_rx)
    }

    #[tokio::test]
    async fn root_start_yields_create_intent() {
        let root = Channel::root("root");
        let intents = root
            .handle(events::WORKLOAD_START, Bytes::from_static(CREATE))
            .await
            .unwrap();

        assert_eq!(intents.len(), 1);
        let Intent::CreateWorkload(create) = &intents[0] else {
            panic!("expected create intent, got {:?}", intents[0]);
        };
        assert_eq!(create.origin_channel_id(), "root");
        assert_eq!(create.correlation_hash(), "h1");
    }

    #[tokio::test]
    async fn root_start_propagates_validation_message() {
        let err = Channel::root("root")
            .handle(events::WORKLOAD_START, Bytes::from_static(br#"{"image":"i","tag":"t","command":["sh"],"hash":"h"}"#))
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "`name` is a required field");
        let ChannelError::Validation(validation) = err else {
            panic!("expected validation error");
        };
        assert_eq!(validation.issues(), [FieldIssue::Required("name")]);
    }

    #[tokio::test]
    async fn root_stop_yields_stop_intent() {
        let intents = Channel::root("root")
            .handle(events::WORKLOAD_STOP, Bytes::from_static(br#"{"id":"w1","hash":"h"}"#))
            .await
            .unwrap();
        assert!(matches!(&intents[..], [Intent::StopWorkload(stop)] if stop.workload_id() == "w1"));
    }

    #[tokio::test]
    async fn root_rejects_workload_events() {
        let err = Channel::root("root")
            .handle(events::WORKLOAD_EXECUTE_COMMAND, Bytes::from_static(b"[]"))
            .await
            .unwrap_err();
        assert!(matches!(err, ChannelError::UnknownEvent { kind: "root", .. }));
    }

    #[tokio::test]
    async fn workload_execute_fixes_workload_id() {
        let intents = Channel::workload("w1")
            .handle(
                events::WORKLOAD_EXECUTE_COMMAND,
                Bytes::from_static(br#"{"cell_id":"c1","command":["python"]}"#),
            )
            .await
            .unwrap();
        let [Intent::ExecuteCommand(exec)] = &intents[..] else {
            panic!("expected one execute intent");
        };
        assert_eq!(exec.workload_id(), "w1");
        assert_eq!(exec.session_id(), "c1");
    }

    #[tokio::test]
    async fn workload_execute_empty_command_fails() {
        let err = Channel::workload("w1")
            .handle(events::WORKLOAD_EXECUTE_COMMAND, Bytes::from_static(br#"{"command":[]}"#))
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "`command` cannot be empty");
    }

    #[tokio::test]
    async fn workload_sync_and_wait() {
        let channel = Channel::workload("w1");
        let sync = channel
            .handle(
                events::WORKLOAD_SYNC_FILE,
                Bytes::from_static(br#"{"path":"/a","cell_id":"c"}"#),
            )
            .await
            .unwrap();
        assert!(matches!(&sync[..], [Intent::SyncFile(_)]));

        let wait = channel
            .handle(events::WORKLOAD_WAIT, Bytes::new())
            .await
            .unwrap();
        assert!(matches!(&wait[..], [Intent::WaitForWorkload(w)] if w.workload_id() == "w1"));
    }

    #[tokio::test]
    async fn workload_rejects_unknown_event() {
        let err = Channel::workload("w1")
            .handle("workload:explode", Bytes::new())
            .await
            .unwrap_err();
        assert_eq!(
            err.to_string(),
            "unknown event name workload:explode on workload channel w1"
        );
    }

    #[tokio::test]
    async fn command_input_goes_to_conduit() {
        let (channel, mut input_rx) = command_channel();
        let intents = channel
            .handle(events::SESSION_INPUT, Bytes::from_static(b"print(1)\n"))
            .await
            .unwrap();

        assert!(intents.is_empty());
        assert_eq!(input_rx.recv().await.unwrap().as_ref(), b"print(1)\n");
        assert_eq!(channel.id(), "cell-1");
        assert_eq!(channel.workload_id(), Some("w1"));
    }

    #[tokio::test]
    async fn command_control_reaches_relay_path() {
        let (channel, _input_rx) = command_channel();
        let mut ends = channel.conduit().unwrap().take_relay().unwrap();

        channel
            .handle(events::SESSION_CONTROL, Bytes::from_static(b"quit"))
            .await
            .unwrap();
        assert_eq!(ends.control.recv().await.unwrap(), ControlSignal::Quit);
    }

    #[tokio::test]
    async fn command_input_after_close_fails() {
        let (channel, input_rx) = command_channel();
        drop(input_rx);
        let err = channel
            .handle(events::SESSION_INPUT, Bytes::from_static(b"x"))
            .await
            .unwrap_err();
        assert!(matches!(err, ChannelError::ConduitClosed(id) if id == "cell-1"));
    }
}
