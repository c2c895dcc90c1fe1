//! Integration test: boots an in-process WebSocket server that plays the
//! LLM stream endpoint, connects a real [`ChatClient`] over the network,
//! and walks a session through initialization, replay, a full turn, a
//! dropped connection, and recovery.

use std::net::SocketAddr;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use nm_chat_client::{
    ChatClient, ChatState, ConnectionStatus, ReconnectPolicy, SessionDescriptor,
};
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;

// ── Mini server: in-process WS endpoint ─────────────────────────────────

/// Handle to one accepted connection.  Dropping it closes the socket.
struct ServerConn {
    /// Frames to push to the client.
    send: mpsc::UnboundedSender<String>,
    /// Text frames the client sent.
    recv: mpsc::UnboundedReceiver<String>,
}

impl ServerConn {
    async fn next_text(&mut self) -> String {
        tokio::time::timeout(Duration::from_secs(5), self.recv.recv())
            .await
            .expect("timeout waiting for client frame")
            .expect("client disconnected")
    }

    /// Next frame that is not a heartbeat.
    async fn next_non_empty(&mut self) -> String {
        loop {
            let frame = self.next_text().await;
            if !frame.is_empty() {
                return frame;
            }
        }
    }

    fn push(&self, frame: &str) {
        self.send.send(frame.to_string()).unwrap();
    }
}

async fn start_mini_server() -> (SocketAddr, mpsc::UnboundedReceiver<ServerConn>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let (conn_tx, conn_rx) = mpsc::unbounded_channel();

    tokio::spawn(async move {
        while let Ok((stream, _peer)) = listener.accept().await {
            let conn_tx = conn_tx.clone();
            tokio::spawn(async move {
                let Ok(ws) = tokio_tungstenite::accept_async(stream).await else {
                    return;
                };
                let (mut sink, mut stream) = ws.split();
                let (push_tx, mut push_rx) = mpsc::unbounded_channel::<String>();
                let (recv_tx, recv_rx) = mpsc::unbounded_channel::<String>();

                if conn_tx
                    .send(ServerConn {
                        send: push_tx,
                        recv: recv_rx,
                    })
                    .is_err()
                {
                    return;
                }

                let read_task = tokio::spawn(async move {
                    while let Some(Ok(msg)) = stream.next().await {
                        if let Message::Text(text) = msg {
                            if recv_tx.send(text).is_err() {
                                break;
                            }
                        }
                    }
                });

                // Ends when the test drops its ServerConn; the socket drops with it.
                while let Some(frame) = push_rx.recv().await {
                    if sink.send(Message::Text(frame)).await.is_err() {
                        break;
                    }
                }
                read_task.abort();
            });
        }
    });

    (addr, conn_rx)
}

async fn accept(conns: &mut mpsc::UnboundedReceiver<ServerConn>) -> ServerConn {
    tokio::time::timeout(Duration::from_secs(5), conns.recv())
        .await
        .expect("timeout waiting for client connection")
        .expect("server stopped")
}

async fn wait_for(client: &ChatClient, pred: impl Fn(&ChatState) -> bool) -> ChatState {
    let mut rx = client.state();
    let state = tokio::time::timeout(Duration::from_secs(5), rx.wait_for(|s| pred(s)))
        .await
        .expect("timeout waiting for state")
        .expect("state channel closed")
        .clone();
    state
}

fn build_client(addr: SocketAddr, dashboard: bool) -> ChatClient {
    ChatClient::builder()
        .server_url(format!("ws://{addr}/LLM/llm-stream"))
        .heartbeat_interval(Duration::from_secs(60))
        .reconnect_policy(ReconnectPolicy {
            base_delay: Duration::from_millis(5),
            max_delay: Duration::from_millis(50),
            max_attempts: 5,
        })
        .dashboard(dashboard)
        .build()
        .unwrap()
}

const INIT_FRAME: &str = "America/New_York,TurboLLM,session-42";

fn descriptor() -> SessionDescriptor {
    SessionDescriptor::new("session-42", "TurboLLM", "America/New_York")
}

// ── Tests ───────────────────────────────────────────────────────────────

#[tokio::test]
async fn session_survives_server_drop() {
    let (addr, mut conns) = start_mini_server().await;
    let client = build_client(addr, false);

    client.initialize(descriptor()).await.unwrap();
    assert_eq!(client.status(), ConnectionStatus::Open);

    // ── Initialization + replay ──────────────────────────────────────
    let mut server = accept(&mut conns).await;
    assert_eq!(server.next_non_empty().await, INIT_FRAME);

    server.push("</llm-ready>");
    assert_eq!(server.next_non_empty().await, "<|REPLAY_HISTORY|>");
    server.push(
        r#"<history-display-name>[{"SessionId":"session-42","Name":"Disk alerts","StartUnixTime":1714557600,"History":[]}]</history-display-name>"#,
    );
    let state = wait_for(&client, |s| s.is_ready && !s.histories.is_empty()).await;
    assert_eq!(state.histories[0].name, "Disk alerts");

    // ── One full turn ────────────────────────────────────────────────
    client.send_message("add host example.com").await.unwrap();
    assert_eq!(server.next_non_empty().await, "add host example.com");

    server.push("</llm-busy>");
    server.push("</functioncall>");
    server.push("</functioncall-complete>");
    server.push("<|start_header_id|>assistant<|end_header_id|>\n\nDone<|eot_id|>");
    server.push("</llm-success>Host added");
    server.push("<end-of-line>");
    server.push("</llm-listening>");

    let state = wait_for(&client, |s| {
        s.message.text == "Host added" && !s.is_processing && !s.is_llm_busy
    })
    .await;
    assert_eq!(state.llm_feedback, "<Assistant:>Done\n");
    assert!(!state.is_calling_function);

    // Function data is dropped outside dashboard mode.
    server.push(
        r#"<function-data>{"Name":"add_host","DataJson":[{"Address":"example.com","UserID":"u-1"}]}</function-data>"#,
    );
    server.push("</llm-info>after function data");
    let state = wait_for(&client, |s| s.message.text == "after function data").await;
    assert!(state.link_data.is_empty());
    assert!(!state.is_drawer_open);

    // ── Server drops the connection ──────────────────────────────────
    drop(server);

    let mut server = accept(&mut conns).await;
    assert_eq!(server.next_non_empty().await, INIT_FRAME);

    // Replay was already delivered this session.
    server.push("</llm-ready>");
    client.send_message("still there?").await.unwrap();
    assert_eq!(server.next_non_empty().await, "still there?");

    let state = wait_for(&client, |s| s.status == ConnectionStatus::Open && s.is_ready).await;
    assert!(!state.connection_failed);

    client.close().await;
    assert_eq!(client.status(), ConnectionStatus::Closed);
}

#[tokio::test]
async fn dashboard_receives_host_list() {
    let (addr, mut conns) = start_mini_server().await;
    let client = build_client(addr, true);

    client.initialize(descriptor()).await.unwrap();
    let mut server = accept(&mut conns).await;
    assert_eq!(server.next_non_empty().await, INIT_FRAME);

    server.push(
        r#"<function-data>{"Name":"get_host_list","DataJson":[{"Address":"10.0.0.5","UserID":"u-7","DateStarted":"2024-03-02T08:00:00"},{"Address":"10.0.0.6","UserID":"default"}]}</function-data>"#,
    );
    let state = wait_for(&client, |s| s.is_drawer_open).await;
    assert_eq!(state.link_data.len(), 2);
    assert!(state.link_data[0].is_host_list);
    assert!(!state.link_data[1].is_host_list);

    server.push(
        r#"<history-display-name>[{"SessionId":"session-7","Name":"Host scan","StartUnixTime":1714557600,"History":[]}]</history-display-name>"#,
    );
    let state = wait_for(&client, |s| !s.histories.is_empty()).await;
    assert_eq!(state.histories[0].name, "Host scan");

    // A malformed history frame leaves the loaded list alone.
    server.push("<history-display-name>[{broken</history-display-name>");
    server.push("</llm-warning>marker");
    let state = wait_for(&client, |s| s.message.text == "marker").await;
    assert_eq!(state.histories.len(), 1);
    assert_eq!(state.histories[0].session_id, "session-7");

    client.close().await;
}

#[tokio::test]
async fn unreachable_server_exhausts_and_reports() {
    // Bind then drop to get a port nothing listens on.
    let addr = {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        listener.local_addr().unwrap()
    };
    let client = build_client(addr, false);

    assert!(client.initialize(descriptor()).await.is_err());
    assert_eq!(client.status(), ConnectionStatus::Aborted);

    assert!(client.send_message("hello?").await.is_err());
    let state = wait_for(&client, |s| s.connection_failed).await;
    assert_eq!(state.status, ConnectionStatus::Aborted);
    assert!(state.message.persist);
}
