//! Builder pattern for constructing a [`ChatClient`].

use std::sync::Arc;
use std::time::Duration;

use nm_protocol::{FrameParser, TextFilter};
use parking_lot::Mutex;
use tokio::sync::{mpsc, watch};

use crate::client::ChatClient;
use crate::config::ClientConfig;
use crate::connection::ConnectionManager;
use crate::reconnect::ReconnectPolicy;
use crate::session::{ExpiringSessionIds, SessionIdProvider};
use crate::state::{self, ChatState, StateSink};
use crate::transport::{TransportFactory, WebSocketTransport};
use crate::types::{ClientError, Result};

/// Fluent builder for [`ChatClient`].
///
/// # Example
///
/// ```rust,no_run
/// # use nm_chat_client::ChatClientBuilder;
/// # async fn demo() -> nm_chat_client::Result<()> {
/// let client = ChatClientBuilder::new()
///     .server_url("wss://devoauth.freenetworkmonitor.click/LLM/llm-stream")
///     .heartbeat_interval(std::time::Duration::from_secs(20))
///     .dashboard(true)
///     .build()?;
/// let descriptor = client.new_descriptor("TurboLLM", "Europe/London");
/// client.initialize(descriptor).await?;
/// # Ok(())
/// # }
/// ```
pub struct ChatClientBuilder {
    pub(crate) server_url: String,
    pub(crate) transport: Option<Arc<dyn TransportFactory>>,
    pub(crate) heartbeat_interval: Duration,
    pub(crate) reconnect_policy: ReconnectPolicy,
    pub(crate) dashboard: bool,
    pub(crate) text_filter: Option<TextFilter>,
    pub(crate) sink: Option<Arc<dyn StateSink>>,
    pub(crate) session_ids: Option<Arc<dyn SessionIdProvider>>,
}

impl ChatClientBuilder {
    pub fn new() -> Self {
        let defaults = ClientConfig::default();
        let heartbeat_interval = defaults.heartbeat_interval();
        Self {
            server_url: defaults.server_url,
            transport: None,
            heartbeat_interval,
            reconnect_policy: ReconnectPolicy::default(),
            dashboard: false,
            text_filter: None,
            sink: None,
            session_ids: None,
        }
    }

    /// Start from a loaded [`ClientConfig`].
    pub fn from_config(config: &ClientConfig) -> Self {
        let ids: Arc<dyn SessionIdProvider> = match &config.session.store_path {
            Some(path) => Arc::new(ExpiringSessionIds::with_store(config.session_ttl(), path)),
            None => Arc::new(ExpiringSessionIds::new(config.session_ttl())),
        };
        Self::new()
            .server_url(config.server_url.clone())
            .heartbeat_interval(config.heartbeat_interval())
            .reconnect_policy(config.reconnect_policy())
            .dashboard(config.dashboard)
            .session_ids(ids)
    }

    // ── Endpoint ─────────────────────────────────────────────────────

    pub fn server_url(mut self, url: impl Into<String>) -> Self {
        self.server_url = url.into();
        self
    }

    /// Replace the WebSocket transport, e.g. with a
    /// [`MemoryTransport`](crate::transport::MemoryTransport) in tests.
    pub fn transport(mut self, transport: Arc<dyn TransportFactory>) -> Self {
        self.transport = Some(transport);
        self
    }

    // ── Behavior ─────────────────────────────────────────────────────

    /// Override the heartbeat interval (default 20s).
    pub fn heartbeat_interval(mut self, d: Duration) -> Self {
        self.heartbeat_interval = d;
        self
    }

    pub fn reconnect_policy(mut self, policy: ReconnectPolicy) -> Self {
        self.reconnect_policy = policy;
        self
    }

    /// Forward function-data frames to the state consumer.
    pub fn dashboard(mut self, enabled: bool) -> Self {
        self.dashboard = enabled;
        self
    }

    /// Replace the built-in text filter rules.
    pub fn text_filter(mut self, filter: TextFilter) -> Self {
        self.text_filter = Some(filter);
        self
    }

    // ── Consumers ────────────────────────────────────────────────────

    /// Notified after each state change, in event order.
    pub fn state_sink(mut self, sink: Arc<dyn StateSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    pub fn session_ids(mut self, ids: Arc<dyn SessionIdProvider>) -> Self {
        self.session_ids = Some(ids);
        self
    }

    /// Build the [`ChatClient`].  Must be called inside a Tokio runtime
    /// because the state consumer task starts here.
    pub fn build(self) -> Result<ChatClient> {
        if self.server_url.is_empty() {
            return Err(ClientError::Config("server_url is required".into()));
        }
        if self.heartbeat_interval.is_zero() {
            return Err(ClientError::Config("heartbeat interval must be positive".into()));
        }
        if tokio::runtime::Handle::try_current().is_err() {
            return Err(ClientError::Config(
                "ChatClient must be built inside a Tokio runtime".into(),
            ));
        }

        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (state_tx, state_rx) = watch::channel(ChatState::default());
        let consumer = state::spawn_consumer(events_rx, state_tx, self.sink);

        let parser = FrameParser::new(self.text_filter.unwrap_or_default());
        let transport = self
            .transport
            .unwrap_or_else(|| Arc::new(WebSocketTransport));
        let conn = ConnectionManager::new(
            self.server_url,
            transport,
            self.reconnect_policy,
            parser,
            self.dashboard,
            events_tx,
        );

        Ok(ChatClient {
            conn: Arc::new(conn),
            session_ids: self
                .session_ids
                .unwrap_or_else(|| Arc::new(ExpiringSessionIds::default())),
            heartbeat_interval: self.heartbeat_interval,
            keepalive: Mutex::new(None),
            state: state_rx,
            consumer,
        })
    }
}

impl Default for ChatClientBuilder {
    fn default() -> Self {
        Self::new()
    }
}
