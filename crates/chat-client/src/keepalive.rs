use std::sync::Arc;
use std::time::Duration;

use nm_protocol::HEARTBEAT_FRAME;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::connection::ConnectionManager;
use crate::types::ConnectionStatus;

/// Heartbeat every `period` until `shutdown` fires.  The first beat is one
/// period after start.  A tick that finds the link down starts recovery.
pub(crate) fn spawn(
    conn: Arc<ConnectionManager>,
    period: Duration,
    shutdown: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = ticker.tick() => {}
            }
            beat(&conn).await;
        }
        tracing::debug!("keepalive stopped");
    })
}

async fn beat(conn: &Arc<ConnectionManager>) {
    match conn.status() {
        ConnectionStatus::Open => match conn.transmit(HEARTBEAT_FRAME).await {
            Ok(()) => tracing::trace!("heartbeat sent"),
            Err(e) => {
                tracing::warn!(error = %e, "heartbeat failed, reconnecting");
                conn.reconnect().await;
            }
        },
        // Someone is already dialing.
        ConnectionStatus::Connecting => {}
        status => {
            tracing::debug!(%status, "link down at heartbeat, reconnecting");
            conn.reconnect().await;
        }
    }
}
