//! Loopback servers shared by the crate's async tests.
//!
//! Both helpers bind `127.0.0.1:0` and run until the test runtime shuts down.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::Router;
use axum::http::{HeaderMap, Method, StatusCode, header};
use axum::response::IntoResponse;
use futures_util::StreamExt;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::time::timeout;
use tokio_tungstenite::WebSocketStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};

/// One request as seen by a stub HTTP server.
#[derive(Clone, Debug)]
pub struct Recorded {
    pub method: Method,
    pub authorization: Option<String>,
    pub body: String,
}

/// Requests seen by a stub HTTP server, in arrival order.
pub type Seen = Arc<Mutex<Vec<Recorded>>>;

/// Serve `body` with `status` for every request on any path.
pub async fn spawn_http_stub(status: StatusCode, body: serde_json::Value) -> (String, Seen) {
    spawn_slow_http_stub(status, body, Duration::ZERO).await
}

/// Like [`spawn_http_stub`], holding every response for `delay` after the
/// request has been recorded.
pub async fn spawn_slow_http_stub(
    status: StatusCode,
    body: serde_json::Value,
    delay: Duration,
) -> (String, Seen) {
    let seen: Seen = Arc::new(Mutex::new(Vec::new()));
    let recorded = Arc::clone(&seen);
    let reply = body.to_string();

    let app = Router::new().fallback(
        move |method: Method, headers: HeaderMap, request_body: String| {
            let recorded = Arc::clone(&recorded);
            let reply = reply.clone();
            async move {
                let authorization = headers
                    .get(header::AUTHORIZATION)
                    .and_then(|value| value.to_str().ok())
                    .map(ToOwned::to_owned);
                recorded.lock().expect("stub mutex should lock").push(Recorded {
                    method,
                    authorization,
                    body: request_body,
                });
                tokio::time::sleep(delay).await;
                (status, [(header::CONTENT_TYPE, "application/json")], reply).into_response()
            }
        },
    );

    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind stub");
    let addr = listener.local_addr().expect("stub addr");
    tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    });

    (format!("http://{addr}"), seen)
}

/// Server side of one accepted WebSocket connection.
pub struct Peer {
    /// Request target of the upgrade, e.g. `/ws?token=abc123`.
    pub uri: String,
    pub socket: WebSocketStream<TcpStream>,
}

impl Peer {
    /// Next text message from the client, skipping transport-level frames.
    pub async fn recv_text(&mut self) -> String {
        timeout(Duration::from_secs(2), async {
            loop {
                match self.socket.next().await {
                    Some(Ok(Message::Text(text))) => return text.as_str().to_owned(),
                    Some(Ok(Message::Ping(_) | Message::Pong(_))) => {}
                    other => panic!("expected text message, got {other:?}"),
                }
            }
        })
        .await
        .expect("peer receive timed out")
    }

    /// Wait until the client closes the connection.
    pub async fn expect_closed(&mut self) {
        timeout(Duration::from_secs(2), async {
            loop {
                match self.socket.next().await {
                    None | Some(Ok(Message::Close(_)) | Err(_)) => return,
                    Some(Ok(_)) => {}
                }
            }
        })
        .await
        .expect("peer close timed out");
    }
}

/// Accept WebSocket connections, handing each one to the test.
///
/// `handshake_delay` stalls every upgrade so tests can act while the client
/// is still connecting.
pub async fn spawn_ws_peer(handshake_delay: Duration) -> (String, mpsc::UnboundedReceiver<Peer>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind ws peer");
    let addr = listener.local_addr().expect("ws peer addr");
    let (tx, rx) = mpsc::unbounded_channel();

    tokio::spawn(async move {
        while let Ok((stream, _)) = listener.accept().await {
            let tx = tx.clone();
            tokio::spawn(async move {
                tokio::time::sleep(handshake_delay).await;
                let mut uri = String::new();
                let callback = |request: &Request, response: Response| {
                    uri = request.uri().to_string();
                    Ok::<_, ErrorResponse>(response)
                };
                let Ok(socket) = tokio_tungstenite::accept_hdr_async(stream, callback).await else {
                    return;
                };
                let _ = tx.send(Peer { uri, socket });
            });
        }
    });

    (format!("ws://{addr}/ws"), rx)
}

/// Wait for the next accepted peer.
pub async fn next_peer(peers: &mut mpsc::UnboundedReceiver<Peer>) -> Peer {
    timeout(Duration::from_secs(2), peers.recv())
        .await
        .expect("peer accept timed out")
        .expect("peer listener stopped")
}

/// An address nothing is listening on.
pub async fn dead_ws_address() -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("addr");
    drop(listener);
    format!("ws://{addr}/ws")
}
