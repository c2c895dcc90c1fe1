//! Outbound gate: the ready flag, the pending history replay, and the
//! "connect before sending" rule for user frames.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use nm_protocol::REPLAY_SENTINEL;
use parking_lot::Mutex;

use crate::connection::{ConnectionManager, ReconnectOutcome};
use crate::types::{ClientError, Result};

#[derive(Debug, Default)]
pub(crate) struct OutboundGate {
    ready: AtomicBool,
    pending_replay: Mutex<Option<String>>,
}

impl OutboundGate {
    /// Fresh session: not ready, replay armed.
    pub(crate) fn begin_session(&self) {
        self.reset_ready();
        self.enqueue_replay();
    }

    pub(crate) fn enqueue_replay(&self) {
        *self.pending_replay.lock() = Some(REPLAY_SENTINEL.to_string());
    }

    pub(crate) fn has_pending_replay(&self) -> bool {
        self.pending_replay.lock().is_some()
    }

    pub(crate) fn mark_ready(&self) {
        self.ready.store(true, Ordering::SeqCst);
    }

    pub(crate) fn reset_ready(&self) {
        self.ready.store(false, Ordering::SeqCst);
    }

    pub(crate) fn is_ready(&self) -> bool {
        self.ready.load(Ordering::SeqCst)
    }

    /// Send the queued replay request if the server has signalled ready.
    /// Returns whether a frame went out.  On failure the request stays queued.
    pub(crate) async fn release_pending_replay(&self, conn: &ConnectionManager) -> Result<bool> {
        if !self.is_ready() {
            return Ok(false);
        }
        let Some(replay) = self.pending_replay.lock().take() else {
            return Ok(false);
        };
        match conn.transmit(&replay).await {
            Ok(()) => {
                tracing::info!("requested history replay");
                Ok(true)
            }
            Err(e) => {
                self.pending_replay.lock().get_or_insert(replay);
                Err(e)
            }
        }
    }

    /// Send a user frame, reconnecting first if the link is not open.
    ///
    /// A write failure kicks off recovery and is still returned to the caller.
    pub(crate) async fn send(&self, conn: &Arc<ConnectionManager>, frame: &str) -> Result<()> {
        if !conn.is_open() {
            tracing::info!(status = %conn.status(), "connection not open, reconnecting before send");
            let exhausted = ClientError::ReconnectExhausted(conn.policy().max_attempts);
            match conn.reconnect().await {
                ReconnectOutcome::Reconnected => {}
                ReconnectOutcome::AlreadyInProgress => {
                    conn.wait_for_reconnect().await;
                    if conn.is_exhausted() {
                        return Err(exhausted);
                    }
                }
                ReconnectOutcome::Abandoned => return Err(exhausted),
                ReconnectOutcome::Cancelled => return Err(ClientError::Shutdown),
            }
            if !conn.is_open() {
                return Err(ClientError::NotConnected);
            }
        }

        if let Err(e) = conn.transmit(frame).await {
            tracing::warn!(error = %e, "send failed, reconnecting");
            conn.reconnect().await;
            return Err(e);
        }
        Ok(())
    }
}
