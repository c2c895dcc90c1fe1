//! In-memory chat state and the single consumer task that applies events
//! to it in arrival order.

use std::sync::Arc;

use nm_protocol::{ChatHistory, ControlEvent, HostLinkRecord};
use serde::Serialize;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

use crate::types::ConnectionStatus;

/// Everything the client reports to the state consumer.
#[derive(Debug, Clone, PartialEq)]
pub enum ClientEvent {
    /// A classified inbound frame.
    Control(ControlEvent),
    Status(ConnectionStatus),
    /// Reconnection gave up; the session stays aborted until reset.
    ReconnectExhausted { attempts: u32 },
    /// A user message left the client.
    MessageSent(String),
    /// `reset` started a fresh session.
    SessionReset,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    #[default]
    Info,
    Warning,
    Success,
    Error,
}

/// Latest server notice shown to the user.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
pub struct SystemMessage {
    pub severity: Severity,
    pub text: String,
    /// Stays visible until replaced.
    pub persist: bool,
}

impl SystemMessage {
    fn new(severity: Severity, text: impl Into<String>) -> Self {
        Self {
            severity,
            text: text.into(),
            persist: severity == Severity::Error,
        }
    }
}

/// Snapshot of the conversation as seen by the UI.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ChatState {
    pub is_ready: bool,
    pub is_processing: bool,
    pub is_calling_function: bool,
    pub is_llm_busy: bool,
    pub is_drawer_open: bool,
    /// Accumulated assistant text for the current session.
    pub llm_feedback: String,
    pub message: SystemMessage,
    pub histories: Vec<ChatHistory>,
    pub link_data: Vec<HostLinkRecord>,
    pub status: ConnectionStatus,
    pub connection_failed: bool,
}

impl ChatState {
    pub fn apply(&mut self, event: &ClientEvent) {
        match event {
            ClientEvent::Control(control) => self.apply_control(control),
            ClientEvent::Status(status) => self.status = *status,
            ClientEvent::ReconnectExhausted { attempts } => {
                self.connection_failed = true;
                self.is_ready = false;
                self.message = SystemMessage::new(
                    Severity::Error,
                    format!("Lost connection to the assistant after {attempts} reconnect attempts"),
                );
            }
            ClientEvent::MessageSent(_) => self.is_processing = true,
            ClientEvent::SessionReset => {
                self.is_ready = false;
                self.is_processing = false;
                self.is_llm_busy = false;
                self.is_calling_function = false;
                self.connection_failed = false;
                self.llm_feedback.clear();
            }
        }
    }

    fn apply_control(&mut self, event: &ControlEvent) {
        match event {
            ControlEvent::Ready => self.is_ready = true,
            ControlEvent::Error(text) => self.message = SystemMessage::new(Severity::Error, text),
            ControlEvent::Info(text) => self.message = SystemMessage::new(Severity::Info, text),
            ControlEvent::Warning(text) => {
                self.message = SystemMessage::new(Severity::Warning, text)
            }
            ControlEvent::Success(text) => {
                self.message = SystemMessage::new(Severity::Success, text)
            }
            ControlEvent::FunctionCallStart => self.is_calling_function = true,
            ControlEvent::FunctionCallEnd => self.is_calling_function = false,
            ControlEvent::LlmBusy => self.is_llm_busy = true,
            ControlEvent::LlmIdle => self.is_llm_busy = false,
            ControlEvent::EndOfTurn => self.is_processing = false,
            ControlEvent::FunctionData { records, .. } => {
                self.link_data = records.clone();
                self.is_drawer_open = true;
            }
            ControlEvent::HistoryList(histories) => self.histories = histories.clone(),
            ControlEvent::TextDelta(text) => self.llm_feedback.push_str(text),
        }
    }
}

/// Notified after every applied event.
#[async_trait::async_trait]
pub trait StateSink: Send + Sync + 'static {
    async fn state_changed(&self, state: &ChatState, event: &ClientEvent);
}

/// Apply events in order, publish each snapshot, then notify the sink.
pub(crate) fn spawn_consumer(
    mut events: mpsc::UnboundedReceiver<ClientEvent>,
    snapshots: watch::Sender<ChatState>,
    sink: Option<Arc<dyn StateSink>>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            tracing::trace!(?event, "applying client event");
            snapshots.send_modify(|state| state.apply(&event));
            if let Some(sink) = &sink {
                let snapshot = snapshots.borrow().clone();
                sink.state_changed(&snapshot, &event).await;
            }
        }
        tracing::debug!("client event channel closed");
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn applied(events: &[ClientEvent]) -> ChatState {
        let mut state = ChatState::default();
        for e in events {
            state.apply(e);
        }
        state
    }

    #[test]
    fn turn_lifecycle() {
        let state = applied(&[
            ClientEvent::Control(ControlEvent::Ready),
            ClientEvent::MessageSent("hi".into()),
            ClientEvent::Control(ControlEvent::LlmBusy),
            ClientEvent::Control(ControlEvent::TextDelta("<Assistant:>Hel".into())),
            ClientEvent::Control(ControlEvent::TextDelta("lo".into())),
        ]);
        assert!(state.is_ready);
        assert!(state.is_processing);
        assert!(state.is_llm_busy);
        assert_eq!(state.llm_feedback, "<Assistant:>Hello");

        let mut state = state;
        state.apply(&ClientEvent::Control(ControlEvent::EndOfTurn));
        state.apply(&ClientEvent::Control(ControlEvent::LlmIdle));
        assert!(!state.is_processing);
        assert!(!state.is_llm_busy);
    }

    #[test]
    fn system_messages() {
        let state = applied(&[ClientEvent::Control(ControlEvent::Error("boom".into()))]);
        assert_eq!(state.message.severity, Severity::Error);
        assert_eq!(state.message.text, "boom");
        assert!(state.message.persist);

        let state = applied(&[ClientEvent::Control(ControlEvent::Success("added".into()))]);
        assert_eq!(state.message.severity, Severity::Success);
        assert!(!state.message.persist);
    }

    #[test]
    fn function_call_flags() {
        let mut state = applied(&[ClientEvent::Control(ControlEvent::FunctionCallStart)]);
        assert!(state.is_calling_function);
        state.apply(&ClientEvent::Control(ControlEvent::FunctionCallEnd));
        assert!(!state.is_calling_function);
    }

    #[test]
    fn function_data_opens_drawer() {
        let record = HostLinkRecord {
            address: "10.0.0.1".into(),
            ..Default::default()
        };
        let state = applied(&[ClientEvent::Control(ControlEvent::FunctionData {
            name: "get_host_list".into(),
            records: vec![record.clone()],
        })]);
        assert!(state.is_drawer_open);
        assert_eq!(state.link_data, vec![record]);
    }

    #[test]
    fn exhaustion_is_persistent_failure() {
        let state = applied(&[
            ClientEvent::Control(ControlEvent::Ready),
            ClientEvent::Status(ConnectionStatus::Aborted),
            ClientEvent::ReconnectExhausted { attempts: 5 },
        ]);
        assert!(state.connection_failed);
        assert!(!state.is_ready);
        assert_eq!(state.status, ConnectionStatus::Aborted);
        assert!(state.message.persist);
        assert!(state.message.text.contains('5'));
    }

    #[test]
    fn reset_clears_turn_state_but_keeps_histories() {
        let history = ChatHistory {
            name: "old chat".into(),
            ..Default::default()
        };
        let state = applied(&[
            ClientEvent::Control(ControlEvent::Ready),
            ClientEvent::Control(ControlEvent::HistoryList(vec![history])),
            ClientEvent::MessageSent("hi".into()),
            ClientEvent::Control(ControlEvent::TextDelta("partial".into())),
            ClientEvent::ReconnectExhausted { attempts: 5 },
            ClientEvent::SessionReset,
        ]);
        assert!(!state.is_ready);
        assert!(!state.is_processing);
        assert!(!state.connection_failed);
        assert!(state.llm_feedback.is_empty());
        assert_eq!(state.histories.len(), 1);
    }

    struct Recorder(parking_lot::Mutex<Vec<(ClientEvent, String)>>);

    #[async_trait::async_trait]
    impl StateSink for Recorder {
        async fn state_changed(&self, state: &ChatState, event: &ClientEvent) {
            self.0.lock().push((event.clone(), state.llm_feedback.clone()));
        }
    }

    #[tokio::test]
    async fn consumer_applies_in_order_and_notifies() {
        let (tx, rx) = mpsc::unbounded_channel();
        let (snap_tx, mut snap_rx) = watch::channel(ChatState::default());
        let recorder = Arc::new(Recorder(parking_lot::Mutex::new(Vec::new())));
        let handle = spawn_consumer(rx, snap_tx, Some(recorder.clone()));

        for chunk in ["a", "b", "c"] {
            tx.send(ClientEvent::Control(ControlEvent::TextDelta(chunk.into())))
                .unwrap();
        }
        drop(tx);
        handle.await.unwrap();

        assert_eq!(snap_rx.borrow_and_update().llm_feedback, "abc");
        let seen: Vec<String> = recorder.0.lock().iter().map(|(_, f)| f.clone()).collect();
        assert_eq!(seen, vec!["a", "ab", "abc"]);
    }
}
