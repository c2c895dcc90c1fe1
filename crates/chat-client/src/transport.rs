//! Transport factories: how a connection to the stream endpoint is opened.
//!
//! The client only ever deals in whole text frames, so a transport is a
//! pair of a `String` sink and a `String` stream.  The stream ends when
//! the peer closes the connection.

use std::pin::Pin;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures_util::{future, stream, Sink, SinkExt, Stream, StreamExt};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;

use crate::types::TransportError;

pub type FrameSink = Pin<Box<dyn Sink<String, Error = TransportError> + Send>>;
pub type FrameStream = Pin<Box<dyn Stream<Item = Result<String, TransportError>> + Send>>;

/// Opens duplex text connections.
#[async_trait::async_trait]
pub trait TransportFactory: Send + Sync + 'static {
    async fn connect(&self, url: &str) -> Result<(FrameSink, FrameStream), TransportError>;
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// WebSocket
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// `ws://` / `wss://` transport backed by `tokio-tungstenite`.
#[derive(Debug, Clone, Copy, Default)]
pub struct WebSocketTransport;

#[async_trait::async_trait]
impl TransportFactory for WebSocketTransport {
    async fn connect(&self, url: &str) -> Result<(FrameSink, FrameStream), TransportError> {
        let (ws, _response) = tokio_tungstenite::connect_async(url).await?;
        let (sink, stream) = ws.split();

        let sink = sink.with(|frame: String| {
            future::ready(Ok::<_, TransportError>(Message::Text(frame)))
        });

        let stream = stream
            .take_while(|msg| future::ready(!matches!(msg, Ok(Message::Close(_)))))
            .filter_map(|msg| {
                future::ready(match msg {
                    Ok(Message::Text(text)) => Some(Ok(text)),
                    Ok(_) => None,
                    Err(e) => Some(Err(TransportError::from(e))),
                })
            });

        Ok((Box::pin(sink), Box::pin(stream)))
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// In-memory
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Channel-backed transport for tests and embedding without a network.
///
/// Every successful `connect` hands a [`MemoryPeer`] to whoever holds the
/// receiver returned by [`MemoryTransport::new`].
#[derive(Clone)]
pub struct MemoryTransport {
    accepted: mpsc::UnboundedSender<MemoryPeer>,
    connects: Arc<AtomicU32>,
    failures_left: Arc<AtomicU32>,
    delay: Arc<parking_lot::Mutex<Duration>>,
}

impl MemoryTransport {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<MemoryPeer>) {
        let (accepted, rx) = mpsc::unbounded_channel();
        let transport = Self {
            accepted,
            connects: Arc::new(AtomicU32::new(0)),
            failures_left: Arc::new(AtomicU32::new(0)),
            delay: Arc::new(parking_lot::Mutex::new(Duration::ZERO)),
        };
        (transport, rx)
    }

    /// Make the next `n` connects fail.
    pub fn fail_next_connects(&self, n: u32) {
        self.failures_left.store(n, Ordering::SeqCst);
    }

    /// Hold every connect for `delay` before it resolves.
    pub fn delay_connects(&self, delay: Duration) {
        *self.delay.lock() = delay;
    }

    /// Connect calls so far, failed ones included.
    pub fn connect_count(&self) -> u32 {
        self.connects.load(Ordering::SeqCst)
    }
}

#[async_trait::async_trait]
impl TransportFactory for MemoryTransport {
    async fn connect(&self, url: &str) -> Result<(FrameSink, FrameStream), TransportError> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        let delay = *self.delay.lock();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        let refused = self
            .failures_left
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if refused {
            return Err(TransportError::Other(format!("connection refused: {url}")));
        }

        let (to_peer, from_client) = mpsc::unbounded_channel::<String>();
        let (to_client, from_peer) = mpsc::unbounded_channel::<Result<String, TransportError>>();

        let peer = MemoryPeer {
            url: url.to_string(),
            received: from_client,
            outbound: to_client,
        };
        self.accepted
            .send(peer)
            .map_err(|_| TransportError::Other("no peer is accepting connections".into()))?;

        let sink = futures_util::sink::unfold(to_peer, |tx, frame: String| async move {
            tx.send(frame).map_err(|_| TransportError::Closed)?;
            Ok::<_, TransportError>(tx)
        });
        let stream = stream::unfold(from_peer, |mut rx| async move {
            rx.recv().await.map(|item| (item, rx))
        });

        Ok((Box::pin(sink), Box::pin(stream)))
    }
}

/// Server side of one in-memory connection.  Dropping it closes the link.
#[derive(Debug)]
pub struct MemoryPeer {
    pub url: String,
    received: mpsc::UnboundedReceiver<String>,
    outbound: mpsc::UnboundedSender<Result<String, TransportError>>,
}

impl MemoryPeer {
    /// Push a frame to the client.  Returns `false` once the client is gone.
    pub fn send(&self, frame: impl Into<String>) -> bool {
        self.outbound.send(Ok(frame.into())).is_ok()
    }

    /// Inject a read error on the client side.
    pub fn fail(&self, reason: impl Into<String>) -> bool {
        self.outbound
            .send(Err(TransportError::Other(reason.into())))
            .is_ok()
    }

    /// Stop accepting frames: the client's next write fails while inbound
    /// frames still flow.
    pub fn stop_reading(&mut self) {
        self.received.close();
    }

    /// Next frame the client sent, or `None` once the client dropped its sink.
    pub async fn recv(&mut self) -> Option<String> {
        self.received.recv().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn memory_transport_relays_both_ways() {
        let (transport, mut accepted) = MemoryTransport::new();
        let (mut sink, mut stream) = transport.connect("mem://llm").await.unwrap();
        let mut peer = accepted.recv().await.unwrap();
        assert_eq!(peer.url, "mem://llm");

        sink.send("hello".to_string()).await.unwrap();
        assert_eq!(peer.recv().await.as_deref(), Some("hello"));

        assert!(peer.send("</llm-ready>"));
        assert_eq!(stream.next().await.unwrap().unwrap(), "</llm-ready>");

        drop(peer);
        assert!(stream.next().await.is_none());
        assert!(sink.send("late".to_string()).await.is_err());
    }

    #[tokio::test]
    async fn memory_transport_can_refuse() {
        let (transport, _accepted) = MemoryTransport::new();
        transport.fail_next_connects(2);
        assert!(transport.connect("mem://a").await.is_err());
        assert!(transport.connect("mem://a").await.is_err());
        assert!(transport.connect("mem://a").await.is_ok());
        assert_eq!(transport.connect_count(), 3);
    }
}
