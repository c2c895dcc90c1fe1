//! `nm-chat-client`: conversation transport for the NetworkMonitor LLM
//! stream endpoint.
//!
//! The client keeps one WebSocket open to the server, tells it which
//! session, runner, and time zone to use, turns inbound frames into state
//! updates, and recovers from dropped connections on its own.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────┐  send_message / stop  ┌──────────────┐
//! │ ChatClient  │ ────────────────────▶ │ OutboundGate │
//! └──────┬──────┘                       └──────┬───────┘
//!        │ initialize / reset                  │ transmit
//!        ▼                                     ▼
//! ┌──────────────────────────────────────────────────────┐
//! │ ConnectionManager                                    │
//! │   connect · close · reconnect (single-flight)        │
//! │   receive loop ──▶ FrameParser ──▶ ClientEvent       │
//! └──────┬──────────────────────────────┬────────────────┘
//!        │ every 20s                    │ mpsc (ordered)
//! ┌──────┴──────┐                ┌──────▼───────┐
//! │  KeepAlive  │                │ state task   │──▶ watch<ChatState>
//! └─────────────┘                └──────────────┘     + StateSink
//! ```
//!
//! # Connection flow
//!
//! 1. Connect, then send `"{time_zone},{runner_type},{session_id}"`
//! 2. Wait for `</llm-ready>`; send `<|REPLAY_HISTORY|>` once per session
//! 3. Stream frames into the state consumer in arrival order
//! 4. Send an empty heartbeat every 20s; a tick that finds the link down
//!    starts recovery
//! 5. On failure: back off `min(30s, 2^n s)`, give up after 5 attempts

pub mod builder;
pub mod client;
pub mod config;
pub(crate) mod connection;
pub(crate) mod gate;
pub(crate) mod keepalive;
pub mod reconnect;
pub mod session;
pub mod state;
pub mod transport;
pub mod types;

// ── Re-exports for ergonomic imports ─────────────────────────────────

pub use builder::ChatClientBuilder;
pub use client::ChatClient;
pub use config::ClientConfig;
pub use reconnect::ReconnectPolicy;
pub use session::{ExpiringSessionIds, SessionIdProvider};
pub use state::{ChatState, ClientEvent, Severity, StateSink, SystemMessage};
pub use transport::{MemoryPeer, MemoryTransport, TransportFactory, WebSocketTransport};
pub use types::{ClientError, ConnectionStatus, Result, TransportError};

// Re-export protocol types so callers never need to import nm-protocol directly.
pub use nm_protocol::{ChatHistory, ChatMessage, ControlEvent, HostLinkRecord, SessionDescriptor};
