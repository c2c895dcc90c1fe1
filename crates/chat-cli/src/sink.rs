//! Terminal rendering of client events.

use std::io::Write;

use nm_chat_client::{
    ChatState, ClientEvent, ConnectionStatus, ControlEvent, Severity, StateSink,
};
use tokio::sync::futures::Notified;
use tokio::sync::Notify;

#[derive(Debug, PartialEq, Eq)]
pub enum Output {
    /// Assistant text, written to stdout without a newline.
    Text(String),
    /// A line on stderr.
    Notice(String),
    /// Blank line after a finished turn.
    TurnEnd,
}

/// Prints streamed text to stdout and everything else to stderr.
#[derive(Default)]
pub struct TerminalSink {
    turn_done: Notify,
}

impl TerminalSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Resolves at the next end of turn (or when the connection is given up).
    /// Call `enable()` on the pinned future before sending to avoid a race.
    pub fn turn_done(&self) -> Notified<'_> {
        self.turn_done.notified()
    }
}

#[async_trait::async_trait]
impl StateSink for TerminalSink {
    async fn state_changed(&self, state: &ChatState, event: &ClientEvent) {
        match render(state, event) {
            Some(Output::Text(text)) => {
                print!("{text}");
                std::io::stdout().flush().ok();
            }
            Some(Output::Notice(line)) => eprintln!("{line}"),
            Some(Output::TurnEnd) => {
                println!();
                println!();
            }
            None => {}
        }

        if matches!(
            event,
            ClientEvent::Control(ControlEvent::EndOfTurn) | ClientEvent::ReconnectExhausted { .. }
        ) {
            self.turn_done.notify_waiters();
        }
    }
}

pub fn render(state: &ChatState, event: &ClientEvent) -> Option<Output> {
    let out = match event {
        ClientEvent::Control(control) => match control {
            ControlEvent::TextDelta(text) => Output::Text(text.clone()),
            ControlEvent::EndOfTurn => Output::TurnEnd,
            ControlEvent::Error(_)
            | ControlEvent::Info(_)
            | ControlEvent::Warning(_)
            | ControlEvent::Success(_) => Output::Notice(system_line(state)),
            ControlEvent::FunctionCallStart => Output::Notice(dim("[calling function]")),
            ControlEvent::FunctionData { name, records } => {
                let mut line = format!("[{name}: {} host(s)]", records.len());
                for r in records {
                    line.push_str(&format!("\n  {}", r.address));
                }
                Output::Notice(dim(&line))
            }
            ControlEvent::HistoryList(histories) => Output::Notice(dim(&format!(
                "[{} past conversation(s), /history to list]",
                histories.len()
            ))),
            ControlEvent::Ready => Output::Notice(dim("[assistant ready]")),
            ControlEvent::FunctionCallEnd | ControlEvent::LlmBusy | ControlEvent::LlmIdle => {
                return None
            }
        },
        ClientEvent::Status(status) => match status {
            ConnectionStatus::Aborted => Output::Notice(dim("[connection lost, reconnecting]")),
            ConnectionStatus::Open => Output::Notice(dim("[connected]")),
            ConnectionStatus::Closed | ConnectionStatus::Connecting => return None,
        },
        ClientEvent::ReconnectExhausted { .. } => Output::Notice(system_line(state)),
        ClientEvent::SessionReset => Output::Notice(dim("[session reset]")),
        ClientEvent::MessageSent(_) => return None,
    };
    Some(out)
}

fn system_line(state: &ChatState) -> String {
    let msg = &state.message;
    match msg.severity {
        Severity::Error => format!("\x1B[31merror: {}\x1B[0m", msg.text),
        Severity::Warning => format!("\x1B[33mwarning: {}\x1B[0m", msg.text),
        Severity::Success => format!("\x1B[32m{}\x1B[0m", msg.text),
        Severity::Info => msg.text.clone(),
    }
}

fn dim(text: &str) -> String {
    format!("\x1B[2m{text}\x1B[0m")
}
