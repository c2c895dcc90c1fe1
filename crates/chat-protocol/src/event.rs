//! Typed events produced from inbound frames, and the payload records they carry.

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};

/// One classified inbound frame.
#[derive(Debug, Clone, PartialEq)]
pub enum ControlEvent {
    /// The server accepted the initialization frame.
    Ready,
    Error(String),
    Info(String),
    Warning(String),
    Success(String),
    FunctionCallStart,
    FunctionCallEnd,
    LlmBusy,
    LlmIdle,
    EndOfTurn,
    FunctionData {
        name: String,
        records: Vec<HostLinkRecord>,
    },
    HistoryList(Vec<ChatHistory>),
    /// Streamed assistant text, already passed through the [`TextFilter`](crate::TextFilter).
    TextDelta(String),
}

impl ControlEvent {
    /// Short name for logs.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Ready => "ready",
            Self::Error(_) => "error",
            Self::Info(_) => "info",
            Self::Warning(_) => "warning",
            Self::Success(_) => "success",
            Self::FunctionCallStart => "function_call_start",
            Self::FunctionCallEnd => "function_call_end",
            Self::LlmBusy => "llm_busy",
            Self::LlmIdle => "llm_idle",
            Self::EndOfTurn => "end_of_turn",
            Self::FunctionData { .. } => "function_data",
            Self::HistoryList(_) => "history_list",
            Self::TextDelta(_) => "text_delta",
        }
    }
}

/// A monitored host surfaced by a dashboard function call.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HostLinkRecord {
    pub address: String,
    pub user_id: Option<String>,
    pub is_host_list: bool,
    pub is_host_data: bool,
    pub data_set_id: i32,
    pub date_started: String,
}

/// A past conversation as listed by the server.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ChatHistory {
    #[serde(default)]
    pub name: String,
    #[serde(default, rename(serialize = "sessionId", deserialize = "sessionid"))]
    pub session_id: String,
    #[serde(default)]
    pub history: Vec<ChatMessage>,
    #[serde(
        default,
        rename(serialize = "startUnixTime", deserialize = "startunixtime")
    )]
    pub start_unix_time: i64,
    #[serde(default, rename(serialize = "userId", deserialize = "userid"))]
    pub user_id: String,
    #[serde(default, rename(serialize = "llmType", deserialize = "llmtype"))]
    pub llm_type: String,
}

impl ChatHistory {
    pub fn start_time(&self) -> Option<DateTime<Utc>> {
        DateTime::from_timestamp(self.start_unix_time, 0)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    /// `"user"` or `"assistant"`.
    #[serde(default)]
    pub role: String,
    #[serde(default)]
    pub content: String,
    /// Kept as sent; servers disagree on whether they include an offset.
    #[serde(default)]
    pub timestamp: String,
}

impl ChatMessage {
    /// Parse the timestamp as RFC 3339, or as a naive date-time taken to be UTC.
    pub fn timestamp_utc(&self) -> Option<DateTime<Utc>> {
        if let Ok(ts) = DateTime::parse_from_rfc3339(&self.timestamp) {
            return Some(ts.with_timezone(&Utc));
        }
        NaiveDateTime::parse_from_str(&self.timestamp, "%Y-%m-%dT%H:%M:%S%.f")
            .ok()
            .map(|naive| naive.and_utc())
    }
}
