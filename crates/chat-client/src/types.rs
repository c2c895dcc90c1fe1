//! Connection status and error types.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Derived status of the single live connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionStatus {
    #[default]
    Closed,
    Connecting,
    Open,
    /// The link failed; recovery is pending or was abandoned.
    Aborted,
}

impl fmt::Display for ConnectionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Closed => "closed",
            Self::Connecting => "connecting",
            Self::Open => "open",
            Self::Aborted => "aborted",
        };
        f.write_str(s)
    }
}

/// Errors from a [`TransportFactory`](crate::transport::TransportFactory) or
/// an established link.
#[derive(thiserror::Error, Debug)]
pub enum TransportError {
    #[error("websocket: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),
    #[error("connection closed")]
    Closed,
    #[error("{0}")]
    Other(String),
}

/// Top-level client error.
#[derive(thiserror::Error, Debug)]
pub enum ClientError {
    #[error("config: {0}")]
    Config(String),
    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("transport: {0}")]
    Transport(#[from] TransportError),
    #[error("not connected")]
    NotConnected,
    #[error("client not initialized")]
    NotInitialized,
    #[error("reconnect exhausted after {0} attempts")]
    ReconnectExhausted(u32),
    #[error("shutdown")]
    Shutdown,
}

pub type Result<T> = std::result::Result<T, ClientError>;
