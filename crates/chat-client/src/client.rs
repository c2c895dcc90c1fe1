//! The caller-facing [`ChatClient`].

use std::sync::Arc;
use std::time::Duration;

use nm_protocol::{SessionDescriptor, STOP_SENTINEL};
use parking_lot::Mutex;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::builder::ChatClientBuilder;
use crate::connection::ConnectionManager;
use crate::keepalive;
use crate::session::SessionIdProvider;
use crate::state::{ChatState, ClientEvent};
use crate::types::{ClientError, ConnectionStatus, Result};

/// Client for one conversation with the LLM stream endpoint.
///
/// Owns the connection, the keep-alive task, and the state consumer.
/// Dropping the client cancels all of them.
pub struct ChatClient {
    pub(crate) conn: Arc<ConnectionManager>,
    pub(crate) session_ids: Arc<dyn SessionIdProvider>,
    pub(crate) heartbeat_interval: Duration,
    pub(crate) keepalive: Mutex<Option<JoinHandle<()>>>,
    pub(crate) state: watch::Receiver<ChatState>,
    pub(crate) consumer: JoinHandle<()>,
}

impl ChatClient {
    pub fn builder() -> ChatClientBuilder {
        ChatClientBuilder::new()
    }

    /// A descriptor for the current (or a freshly minted) session id.
    pub fn new_descriptor(
        &self,
        runner_type: impl Into<String>,
        time_zone: impl Into<String>,
    ) -> SessionDescriptor {
        SessionDescriptor::new(self.session_ids.current(), runner_type, time_zone)
    }

    /// Like [`new_descriptor`](Self::new_descriptor) but always mints a new id.
    pub fn fresh_descriptor(
        &self,
        runner_type: impl Into<String>,
        time_zone: impl Into<String>,
    ) -> SessionDescriptor {
        SessionDescriptor::new(self.session_ids.renew(), runner_type, time_zone)
    }

    // ── Session lifecycle ────────────────────────────────────────────

    /// Store the descriptor, start the keep-alive, connect, and send the
    /// initialization frame.  The history replay is armed for the next Ready.
    ///
    /// A failed first connect is returned, but the keep-alive keeps trying.
    pub async fn initialize(&self, descriptor: SessionDescriptor) -> Result<()> {
        tracing::info!(
            session_id = %descriptor.session_id,
            runner_type = %descriptor.runner_type,
            time_zone = %descriptor.time_zone,
            "initializing chat session"
        );
        let shutdown = self.conn.begin_session(descriptor);
        self.conn.close_link().await;
        self.start_keepalive(shutdown);
        self.conn.open().await
    }

    /// Tear the session down and start it again, optionally under a new
    /// session id.
    pub async fn reset(&self, create_new_session: bool) -> Result<()> {
        let current = self.conn.descriptor().ok_or(ClientError::NotInitialized)?;
        tracing::info!(create_new_session, "resetting chat session");

        self.teardown().await;
        self.conn.emit(ClientEvent::SessionReset);

        let descriptor = if create_new_session {
            current.with_session_id(self.session_ids.renew())
        } else {
            current
        };
        self.initialize(descriptor).await
    }

    /// Close the connection and stop background tasks.  `initialize` may be
    /// called again afterwards.
    pub async fn close(&self) {
        self.teardown().await;
    }

    async fn teardown(&self) {
        self.stop_keepalive();
        self.conn.close().await;
    }

    fn start_keepalive(&self, shutdown: CancellationToken) {
        let handle = keepalive::spawn(self.conn.clone(), self.heartbeat_interval, shutdown);
        if let Some(previous) = self.keepalive.lock().replace(handle) {
            previous.abort();
        }
    }

    fn stop_keepalive(&self) {
        if let Some(handle) = self.keepalive.lock().take() {
            handle.abort();
        }
    }

    // ── Outbound ─────────────────────────────────────────────────────

    /// Send a user message.  Reconnects first if the link is down.
    pub async fn send_message(&self, text: &str) -> Result<()> {
        self.conn.gate.send(&self.conn, text).await?;
        self.conn.emit(ClientEvent::MessageSent(text.to_string()));
        Ok(())
    }

    /// Ask the server to stop generating.
    pub async fn stop(&self) -> Result<()> {
        self.conn.gate.send(&self.conn, STOP_SENTINEL).await?;
        tracing::info!("sent stop request");
        Ok(())
    }

    // ── Observation ──────────────────────────────────────────────────

    /// Watch the chat state.  Each change is published after the event that
    /// caused it has been applied.
    pub fn state(&self) -> watch::Receiver<ChatState> {
        self.state.clone()
    }

    pub fn snapshot(&self) -> ChatState {
        self.state.borrow().clone()
    }

    pub fn status(&self) -> ConnectionStatus {
        self.conn.status()
    }

    pub fn watch_status(&self) -> watch::Receiver<ConnectionStatus> {
        self.conn.subscribe_status()
    }

    pub fn descriptor(&self) -> Option<SessionDescriptor> {
        self.conn.descriptor()
    }

    pub fn dashboard(&self) -> bool {
        self.conn.dashboard()
    }

    /// Toggle forwarding of function-data frames.
    pub fn set_dashboard(&self, enabled: bool) {
        self.conn.set_dashboard(enabled);
    }
}

impl Drop for ChatClient {
    fn drop(&mut self) {
        self.conn.shutdown_token().cancel();
        self.stop_keepalive();
        self.consumer.abort();
    }
}
