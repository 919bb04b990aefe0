use std::fmt;
use std::sync::{Mutex, PoisonError};

use bytes::Bytes;
use chanmux_frame::events::CONTROL_QUIT;
use tokio::sync::mpsc;

use crate::error::ChannelError;
use crate::runtime::ExecAttachment;

/// A control message for a running session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ControlSignal {
    /// End the session.
    Quit,
    /// Anything else; currently ignored by the relay.
    Other(String),
}

impl ControlSignal {
    /// Parse a `session:control` payload. Plain text and JSON strings are both
    /// accepted.
    pub fn parse(payload: &[u8]) -> Self {
        let text = String::from_utf8_lossy(payload);
        let text = text.trim();
        let text = text
            .strip_prefix('"')
            .and_then(|t| t.strip_suffix('"'))
            .unwrap_or(text);
        if text.eq_ignore_ascii_case(CONTROL_QUIT) {
            ControlSignal::Quit
        } else {
            ControlSignal::Other(text.to_string())
        }
    }
}

/// The receiving ends a relay task consumes.
#[derive(Debug)]
pub struct RelayEnds {
    pub output: mpsc::Receiver<Bytes>,
    pub control: mpsc::Receiver<ControlSignal>,
}

/// Bidirectional data path of one live command session.
///
/// The command channel keeps the sending ends (input, control); the relay task
/// takes the receiving ends once via [`take_relay`](Self::take_relay). When
/// the conduit is dropped the command's stdin closes.
pub struct Conduit {
    session_id: String,
    exec_id: String,
    input: mpsc::Sender<Bytes>,
    control: mpsc::Sender<ControlSignal>,
    relay: Mutex<Option<RelayEnds>>,
}

impl Conduit {
    pub fn new(session_id: impl Into<String>, attachment: ExecAttachment, capacity: usize) -> Self {
        let (control, control_rx) = mpsc::channel(capacity.max(1));
        Self {
            session_id: session_id.into(),
            exec_id: attachment.exec_id,
            input: attachment.input,
            control,
            relay: Mutex::new(Some(RelayEnds {
                output: attachment.output,
                control: control_rx,
            })),
        }
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn exec_id(&self) -> &str {
        &self.exec_id
    }

    /// Forward client bytes to the command's stdin.
    pub async fn send_input(&self, data: Bytes) -> Result<(), ChannelError> {
        self.input
            .send(data)
            .await
            .map_err(|_| ChannelError::ConduitClosed(self.session_id.clone()))
    }

    /// Deliver a control signal to the relay.
    pub async fn send_control(&self, signal: ControlSignal) -> Result<(), ChannelError> {
        self.control
            .send(signal)
            .await
            .map_err(|_| ChannelError::ConduitClosed(self.session_id.clone()))
    }

    /// Hand the receiving ends to the relay. Returns `None` after the first call.
    pub fn take_relay(&self) -> Option<RelayEnds> {
        self.relay
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
    }
}

impl fmt::Debug for Conduit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Conduit")
            .field("session_id", &self.session_id)
            .field("exec_id", &self.exec_id)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn attachment() -> (ExecAttachment, mpsc::Sender<Bytes>, mpsc::Receiver<Bytes>) {
        let (output_tx, output) = mpsc::channel(4);
        let (input, input_rx) = mpsc::channel(4);
        (
            ExecAttachment {
                exec_id: "exec-1".into(),
                output,
                input,
            },
            output_tx,
            input_rx,
        )
    }

    #[test]
    fn control_signal_parsing() {
        assert_eq!(ControlSignal::parse(b"quit"), ControlSignal::Quit);
        assert_eq!(ControlSignal::parse(b" quit\n"), ControlSignal::Quit);
        assert_eq!(ControlSignal::parse(br#""quit""#), ControlSignal::Quit);
        assert_eq!(
            ControlSignal::parse(b"resize"),
            ControlSignal::Other("resize".into())
        );
    }

    #[tokio::test]
    async fn input_reaches_runtime() {
        let (attachment, _output_tx, mut input_rx) = attachment();
        let conduit = Conduit::new("cell-1", attachment, 4);

        conduit.send_input(Bytes::from_static(b"ls\n")).await.unwrap();
        assert_eq!(input_rx.recv().await.unwrap().as_ref(), b"ls\n");
        assert_eq!(conduit.exec_id(), "exec-1");
    }

    #[tokio::test]
    async fn relay_ends_are_taken_once() {
        let (attachment, output_tx, _input_rx) = attachment();
        let conduit = Conduit::new("cell-1", attachment, 4);

        let mut ends = conduit.take_relay().unwrap();
        assert!(conduit.take_relay().is_none());

        output_tx.send(Bytes::from_static(b"out")).await.unwrap();
        assert_eq!(ends.output.recv().await.unwrap().as_ref(), b"out");
        conduit.send_control(ControlSignal::Quit).await.unwrap();
        assert_eq!(ends.control.recv().await.unwrap(), ControlSignal::Quit);
    }

    #[tokio::test]
    async fn closed_paths_report_conduit_closed() {
        let (attachment, _output_tx, input_rx) = attachment();
        let conduit = Conduit::new("cell-1", attachment, 4);
        drop(input_rx);
        drop(conduit.take_relay());

        assert!(matches!(
            conduit.send_input(Bytes::from_static(b"x")).await,
            Err(ChannelError::ConduitClosed(id)) if id == "cell-1"
        ));
        assert!(matches!(
            conduit.send_control(ControlSignal::Quit).await,
            Err(ChannelError::ConduitClosed(_))
        ));
    }
}
