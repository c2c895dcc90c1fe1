//! Ownership of the single live connection: connect, close, the receive
//! loop, and the single-flight reconnect sequence.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures_util::future::BoxFuture;
use futures_util::{SinkExt, StreamExt};
use nm_protocol::{ControlEvent, FrameParser, SessionDescriptor};
use parking_lot::{Mutex, RwLock};
use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;

use crate::gate::OutboundGate;
use crate::reconnect::{ReconnectPolicy, ReconnectState};
use crate::state::ClientEvent;
use crate::transport::{FrameSink, FrameStream, TransportFactory};
use crate::types::{ClientError, ConnectionStatus, Result};

/// How long a close handshake may take before the handle is just dropped.
const CLOSE_TIMEOUT: Duration = Duration::from_secs(3);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ReconnectOutcome {
    Reconnected,
    /// Another sequence owns the slot; nothing was done.
    AlreadyInProgress,
    /// The attempt cap is exhausted for this session.
    Abandoned,
    Cancelled,
}

pub(crate) struct ConnectionManager {
    url: String,
    transport: Arc<dyn TransportFactory>,
    policy: ReconnectPolicy,
    parser: FrameParser,
    sink: tokio::sync::Mutex<Option<FrameSink>>,
    status: watch::Sender<ConnectionStatus>,
    reconnect: ReconnectState,
    session: RwLock<Option<SessionDescriptor>>,
    /// Cancelled when the logical session ends.
    shutdown: Mutex<CancellationToken>,
    /// Cancelled when the current link is replaced or closed.
    link: Mutex<CancellationToken>,
    dashboard: AtomicBool,
    events: mpsc::UnboundedSender<ClientEvent>,
    pub(crate) gate: OutboundGate,
}

impl ConnectionManager {
    pub(crate) fn new(
        url: String,
        transport: Arc<dyn TransportFactory>,
        policy: ReconnectPolicy,
        parser: FrameParser,
        dashboard: bool,
        events: mpsc::UnboundedSender<ClientEvent>,
    ) -> Self {
        Self {
            url,
            transport,
            policy,
            parser,
            sink: tokio::sync::Mutex::new(None),
            status: watch::channel(ConnectionStatus::Closed).0,
            reconnect: ReconnectState::default(),
            session: RwLock::new(None),
            shutdown: Mutex::new(CancellationToken::new()),
            link: Mutex::new(CancellationToken::new()),
            dashboard: AtomicBool::new(dashboard),
            events,
            gate: OutboundGate::default(),
        }
    }

    // ── Accessors ────────────────────────────────────────────────────

    pub(crate) fn status(&self) -> ConnectionStatus {
        *self.status.borrow()
    }

    pub(crate) fn is_open(&self) -> bool {
        self.status() == ConnectionStatus::Open
    }

    pub(crate) fn subscribe_status(&self) -> watch::Receiver<ConnectionStatus> {
        self.status.subscribe()
    }

    pub(crate) fn set_status(&self, next: ConnectionStatus) {
        let changed = self.status.send_if_modified(|current| {
            if *current == next {
                false
            } else {
                *current = next;
                true
            }
        });
        if changed {
            tracing::debug!(status = %next, "connection status changed");
            self.emit(ClientEvent::Status(next));
        }
    }

    pub(crate) fn emit(&self, event: ClientEvent) {
        if self.events.send(event).is_err() {
            tracing::debug!("state consumer is gone, dropping event");
        }
    }

    pub(crate) fn descriptor(&self) -> Option<SessionDescriptor> {
        self.session.read().clone()
    }

    pub(crate) fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.lock().clone()
    }

    pub(crate) fn policy(&self) -> &ReconnectPolicy {
        &self.policy
    }

    pub(crate) fn dashboard(&self) -> bool {
        self.dashboard.load(Ordering::Relaxed)
    }

    pub(crate) fn set_dashboard(&self, enabled: bool) {
        self.dashboard.store(enabled, Ordering::Relaxed);
    }

    // ── Session lifecycle ────────────────────────────────────────────

    /// Start a new logical session.  Cancels everything the previous session
    /// had running, resets the attempt counter, and re-arms the replay.
    pub(crate) fn begin_session(&self, descriptor: SessionDescriptor) -> CancellationToken {
        let token = CancellationToken::new();
        let previous = std::mem::replace(&mut *self.shutdown.lock(), token.clone());
        previous.cancel();
        *self.session.write() = Some(descriptor);
        self.reconnect.reset();
        self.gate.begin_session();
        token
    }

    pub(crate) fn is_exhausted(&self) -> bool {
        self.reconnect.is_exhausted()
    }

    /// Connect and send the initialization frame while holding the reconnect
    /// slot, so a concurrent send waits for this link instead of dialing its
    /// own.
    pub(crate) async fn open(self: &Arc<Self>) -> Result<()> {
        let shutdown = self.shutdown_token();
        let _guard = tokio::select! {
            guard = self.reconnect.begin() => guard,
            _ = shutdown.cancelled() => return Err(ClientError::Shutdown),
        };
        self.connect_under(shutdown).await?;
        self.send_initialization().await
    }

    /// Open the transport under the current session.
    pub(crate) async fn connect(self: &Arc<Self>) -> Result<()> {
        self.connect_under(self.shutdown_token()).await
    }

    /// Open the transport and start the receive loop.  Any previous link is
    /// retired first.  A failure leaves the status `Aborted`; no retry
    /// happens here.
    async fn connect_under(self: &Arc<Self>, shutdown: CancellationToken) -> Result<()> {
        if shutdown.is_cancelled() {
            return Err(ClientError::Shutdown);
        }

        self.set_status(ConnectionStatus::Connecting);
        tracing::info!(url = %self.url, "connecting to LLM stream");

        let connected = tokio::select! {
            r = self.transport.connect(&self.url) => r,
            _ = shutdown.cancelled() => return Err(ClientError::Shutdown),
        };
        let (sink, stream) = match connected {
            Ok(pair) => pair,
            Err(e) => {
                tracing::warn!(url = %self.url, error = %e, "connect failed");
                self.set_status(ConnectionStatus::Aborted);
                return Err(e.into());
            }
        };

        let link = shutdown.child_token();
        let previous = {
            let mut slot = self.sink.lock().await;
            if shutdown.is_cancelled() {
                return Err(ClientError::Shutdown);
            }
            std::mem::replace(&mut *self.link.lock(), link.clone()).cancel();
            slot.replace(sink)
        };
        self.set_status(ConnectionStatus::Open);
        tokio::spawn(self.clone().receive_loop(stream, link));

        if let Some(previous) = previous {
            tracing::debug!("retiring previous connection");
            close_sink(previous).await;
        }
        Ok(())
    }

    /// Send `"{time_zone},{runner_type},{session_id}"`.
    pub(crate) async fn send_initialization(&self) -> Result<()> {
        let Some(descriptor) = self.descriptor() else {
            tracing::warn!("no session descriptor, connection opened without initialization");
            return Ok(());
        };
        self.transmit(&descriptor.init_frame()).await?;
        tracing::info!(
            session_id = %descriptor.session_id,
            runner_type = %descriptor.runner_type,
            time_zone = %descriptor.time_zone,
            "sent initialization frame"
        );
        Ok(())
    }

    /// Write one frame on the current link.  No reconnect logic; callers
    /// decide how to recover.
    pub(crate) async fn transmit(&self, frame: &str) -> Result<()> {
        let mut slot = self.sink.lock().await;
        let sink = slot.as_mut().ok_or(ClientError::NotConnected)?;
        match sink.send(frame.to_string()).await {
            Ok(()) => {
                drop(slot);
                self.reconnect.reset_attempts();
                Ok(())
            }
            Err(e) => {
                *slot = None;
                drop(slot);
                self.set_status(ConnectionStatus::Aborted);
                Err(e.into())
            }
        }
    }

    /// Stop the receive loop and close the current handle, if any.
    pub(crate) async fn close_link(&self) {
        self.link.lock().cancel();
        let sink = self.sink.lock().await.take();
        if let Some(sink) = sink {
            close_sink(sink).await;
        }
    }

    /// End the session: cancel its tasks and close the link.
    pub(crate) async fn close(&self) {
        self.shutdown_token().cancel();
        self.close_link().await;
        self.set_status(ConnectionStatus::Closed);
        tracing::info!("connection closed");
    }

    // ── Recovery ─────────────────────────────────────────────────────

    pub(crate) async fn wait_for_reconnect(&self) {
        let shutdown = self.shutdown_token();
        tokio::select! {
            _ = self.reconnect.wait_idle() => {}
            _ = shutdown.cancelled() => {}
        }
    }

    /// Run the reconnect sequence unless one is already running.
    ///
    /// Each attempt waits `min(max_delay, base * 2^attempt)`, discards the old
    /// handle, connects and resends the initialization frame.  Failed
    /// attempts roll into the next one until the cap; exhaustion is reported
    /// once to the state consumer.
    pub(crate) fn reconnect(self: &Arc<Self>) -> BoxFuture<'_, ReconnectOutcome> {
        Box::pin(async move {
            let Some(_guard) = self.reconnect.try_begin() else {
                tracing::debug!("reconnect already in progress");
                return ReconnectOutcome::AlreadyInProgress;
            };
            let shutdown = self.shutdown_token();

            loop {
                if shutdown.is_cancelled() {
                    return ReconnectOutcome::Cancelled;
                }
                if self.reconnect.is_exhausted() {
                    return ReconnectOutcome::Abandoned;
                }

                let attempt = self.reconnect.next_attempt();
                if self.policy.should_give_up(attempt) {
                    if self.reconnect.mark_exhausted() {
                        let attempts = attempt - 1;
                        tracing::error!(attempts, "max reconnect attempts reached");
                        self.close_link().await;
                        self.set_status(ConnectionStatus::Aborted);
                        self.emit(ClientEvent::ReconnectExhausted { attempts });
                    }
                    return ReconnectOutcome::Abandoned;
                }

                self.gate.reset_ready();
                let delay = self.policy.delay_for_attempt(attempt);
                tracing::info!(attempt, delay_ms = delay.as_millis() as u64, "reconnecting");

                tokio::select! {
                    _ = tokio::time::sleep(delay) => {}
                    _ = shutdown.cancelled() => return ReconnectOutcome::Cancelled,
                }

                self.close_link().await;
                let result = match self.connect_under(shutdown.clone()).await {
                    Ok(()) => self.send_initialization().await,
                    Err(e) => Err(e),
                };

                match result {
                    Ok(()) => {
                        self.reconnect.reset_attempts();
                        tracing::info!(attempt, "reconnected");
                        return ReconnectOutcome::Reconnected;
                    }
                    Err(ClientError::Shutdown) => return ReconnectOutcome::Cancelled,
                    Err(e) => {
                        tracing::warn!(attempt, error = %e, "reconnect attempt failed");
                    }
                }
            }
        })
    }

    // ── Inbound ──────────────────────────────────────────────────────

    async fn receive_loop(self: Arc<Self>, mut stream: FrameStream, link: CancellationToken) {
        loop {
            let next = tokio::select! {
                biased;
                _ = link.cancelled() => return,
                next = stream.next() => next,
            };
            match next {
                Some(Ok(frame)) => self.dispatch(&frame).await,
                Some(Err(e)) => {
                    tracing::warn!(error = %e, "receive failed");
                    break;
                }
                None => {
                    tracing::info!("server closed the connection");
                    break;
                }
            }
        }

        if link.is_cancelled() {
            return;
        }
        link.cancel();
        self.set_status(ConnectionStatus::Aborted);
        self.reconnect().await;
    }

    /// Classify one frame and hand the event to the state consumer.
    pub(crate) async fn dispatch(self: &Arc<Self>, frame: &str) {
        tracing::trace!(frame, "received frame");
        let Some(event) = self.parser.parse(frame) else {
            return;
        };

        if let ControlEvent::FunctionData { name, records } = &event {
            if !self.dashboard() {
                tracing::debug!(
                    function = %name,
                    records = records.len(),
                    "dropping function data outside dashboard mode"
                );
                return;
            }
        }

        let ready = event == ControlEvent::Ready;
        if ready {
            self.gate.mark_ready();
        }
        self.emit(ClientEvent::Control(event));

        if ready {
            if let Err(e) = self.gate.release_pending_replay(self).await {
                tracing::warn!(error = %e, "failed to request history replay, reconnecting");
                self.reconnect().await;
            }
        }
    }
}

async fn close_sink(mut sink: FrameSink) {
    match tokio::time::timeout(CLOSE_TIMEOUT, sink.close()).await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => tracing::debug!(error = %e, "error closing previous connection"),
        Err(_) => tracing::debug!("close handshake timed out"),
    }
}
