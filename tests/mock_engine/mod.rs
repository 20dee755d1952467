//! In-process mock of the upstream conversational engine.
//!
//! Accepts WebSocket connections, answers the session handshake, records
//! every event the bridge sends, and replays whatever server events the test
//! scripts into it.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpListener;
use tokio::sync::{Mutex, mpsc};
use tokio_tungstenite::tungstenite::Message;

/// Scripted engine double listening on an ephemeral local port.
pub struct MockEngine {
    addr: SocketAddr,
    received: Arc<Mutex<Vec<serde_json::Value>>>,
    outbound_tx: mpsc::Sender<serde_json::Value>,
}

impl MockEngine {
    /// Bind and start serving connections.
    pub async fn spawn() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind mock engine");
        let addr = listener.local_addr().expect("mock engine addr");

        let received: Arc<Mutex<Vec<serde_json::Value>>> = Arc::new(Mutex::new(Vec::new()));
        let (outbound_tx, outbound_rx) = mpsc::channel::<serde_json::Value>(256);
        let outbound_rx = Arc::new(Mutex::new(outbound_rx));

        {
            let received = received.clone();
            tokio::spawn(async move {
                while let Ok((stream, _)) = listener.accept().await {
                    let ws = match tokio_tungstenite::accept_async(stream).await {
                        Ok(ws) => ws,
                        Err(_) => continue,
                    };
                    serve_connection(ws, received.clone(), outbound_rx.clone()).await;
                }
            });
        }

        Self {
            addr,
            received,
            outbound_tx,
        }
    }

    pub fn url(&self) -> String {
        format!("ws://{}", self.addr)
    }

    /// Push a server event to the connected bridge.
    pub async fn send(&self, event: serde_json::Value) {
        self.outbound_tx.send(event).await.expect("mock engine send");
    }

    /// Snapshot of everything received so far.
    pub async fn received(&self) -> Vec<serde_json::Value> {
        self.received.lock().await.clone()
    }

    /// Count of received events with the given `type`.
    pub async fn count_of(&self, event_type: &str) -> usize {
        self.received
            .lock()
            .await
            .iter()
            .filter(|event| event["type"] == event_type)
            .count()
    }

    /// Wait until at least `count` events of `type` were received.
    pub async fn wait_for_count(&self, event_type: &str, count: usize, timeout: Duration) -> bool {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            if self.count_of(event_type).await >= count {
                return true;
            }
            if tokio::time::Instant::now() >= deadline {
                return false;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    }
}

async fn serve_connection(
    ws: tokio_tungstenite::WebSocketStream<tokio::net::TcpStream>,
    received: Arc<Mutex<Vec<serde_json::Value>>>,
    outbound_rx: Arc<Mutex<mpsc::Receiver<serde_json::Value>>>,
) {
    let (mut sink, mut stream) = ws.split();
    let mut outbound = outbound_rx.lock().await;

    loop {
        tokio::select! {
            msg = stream.next() => match msg {
                Some(Ok(Message::Text(text))) => {
                    let Ok(event) = serde_json::from_str::<serde_json::Value>(&text) else {
                        continue;
                    };
                    let is_handshake = event["type"] == "session.update";
                    received.lock().await.push(event);
                    if is_handshake {
                        let ack = serde_json::json!({
                            "type": "session.created",
                            "session": {"id": "mock-session"}
                        });
                        if sink.send(Message::Text(ack.to_string().into())).await.is_err() {
                            break;
                        }
                    }
                }
                Some(Ok(Message::Ping(data))) => {
                    let _ = sink.send(Message::Pong(data)).await;
                }
                Some(Ok(Message::Close(_))) | None => break,
                Some(Err(_)) => break,
                Some(Ok(_)) => {}
            },
            event = outbound.recv() => match event {
                Some(event) => {
                    if sink.send(Message::Text(event.to_string().into())).await.is_err() {
                        break;
                    }
                }
                None => break,
            },
        }
    }
}
