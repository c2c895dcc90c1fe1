//! Wire protocol for the NetworkMonitor LLM stream endpoint.
//!
//! The endpoint speaks plain text frames over a WebSocket.  Most frames are
//! streamed assistant text; a fixed set of literal tags carries control
//! state (readiness, busy/idle, errors) and two wrapper tags carry JSON
//! payloads (function data for the dashboard, chat-history listings).
//!
//! ```text
//!  client                                     server
//!    │  "{tz},{runner},{session_id}"  ──────────▶ │   initialization frame
//!    │ ◀──────────────────────────  "</llm-ready>" │
//!    │  "<|REPLAY_HISTORY|>"          ──────────▶ │   once per session
//!    │ ◀──── "<history-display-name>[..]</history-display-name>"
//!    │  "what hosts do I monitor?"    ──────────▶ │
//!    │ ◀──────────────────────────── "</llm-busy>" │
//!    │ ◀───────────────── "<|im_start|>assistant\n…" (text deltas)
//!    │ ◀─────────────────────────── "<end-of-line>"│
//!    │  ""                            ──────────▶ │   heartbeat, every 20s
//! ```

pub mod error;
pub mod event;
pub mod filter;
pub mod frame;
pub mod session;

pub use error::ProtocolError;
pub use event::{ChatHistory, ChatMessage, ControlEvent, HostLinkRecord};
pub use filter::TextFilter;
pub use frame::FrameParser;
pub use session::SessionDescriptor;

// ── Control tags (inbound) ───────────────────────────────────────────

pub const TAG_READY: &str = "</llm-ready>";
pub const TAG_CONTROL_PREFIX: &str = "</llm-";
pub const TAG_ERROR: &str = "</llm-error>";
pub const TAG_INFO: &str = "</llm-info>";
pub const TAG_WARNING: &str = "</llm-warning>";
pub const TAG_SUCCESS: &str = "</llm-success>";
pub const TAG_BUSY: &str = "</llm-busy>";
pub const TAG_LISTENING: &str = "</llm-listening>";
pub const TAG_END_OF_LINE: &str = "<end-of-line>";
pub const TAG_FUNCTION_CALL: &str = "</functioncall>";
pub const TAG_FUNCTION_CALL_COMPLETE: &str = "</functioncall-complete>";
pub const TAG_FUNCTION_DATA_OPEN: &str = "<function-data>";
pub const TAG_FUNCTION_DATA_CLOSE: &str = "</function-data>";
pub const TAG_HISTORY_OPEN: &str = "<history-display-name>";
pub const TAG_HISTORY_CLOSE: &str = "</history-display-name>";

// ── Sentinels (outbound) ─────────────────────────────────────────────

/// Asks the server to replay the prior conversation once the session is ready.
pub const REPLAY_SENTINEL: &str = "<|REPLAY_HISTORY|>";
/// Asks the server to stop generating the current response.
pub const STOP_SENTINEL: &str = "<|STOP_LLM|>";
/// Heartbeat frames are empty text frames.
pub const HEARTBEAT_FRAME: &str = "";

/// Runner types the server is known to accept.
pub const KNOWN_RUNNER_TYPES: &[&str] = &["TurboLLM", "HugLLM", "TestLLM"];
