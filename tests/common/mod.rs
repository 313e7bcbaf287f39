//! Local stand-ins for the backend: an HTTP API and a Phoenix socket.

#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::Json;
use axum::Router;
use axum::body::Bytes;
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode, Uri, header::AUTHORIZATION};
use fitcoin_session::channel::frame::Frame;
use fitcoin_session::{ClientConfig, WalletError, WalletProvider};
use futures_util::{SinkExt, StreamExt};
use serde_json::{Value, json};
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use url::Url;

// ── HTTP backend ───────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct Recorded {
    pub path: String,
    pub authorization: Option<String>,
    pub body: Value,
}

struct BackendState {
    status: StatusCode,
    body: Value,
    delay: Duration,
    requests: Mutex<Vec<Recorded>>,
}

pub struct MockBackend {
    pub url: Url,
    state: Arc<BackendState>,
}

impl MockBackend {
    pub fn requests(&self) -> Vec<Recorded> {
        self.state.requests.lock().unwrap().clone()
    }
}

/// Answers every POST with `status` and `body`.
pub async fn spawn_backend(status: StatusCode, body: Value) -> MockBackend {
    spawn_slow_backend(status, body, Duration::ZERO).await
}

pub async fn spawn_slow_backend(status: StatusCode, body: Value, delay: Duration) -> MockBackend {
    let state = Arc::new(BackendState {
        status,
        body,
        delay,
        requests: Mutex::new(Vec::new()),
    });

    let app = Router::new()
        .fallback(respond)
        .with_state(state.clone());

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    MockBackend {
        url: format!("http://{addr}").parse().unwrap(),
        state,
    }
}

async fn respond(
    State(state): State<Arc<BackendState>>,
    uri: Uri,
    headers: HeaderMap,
    body: Bytes,
) -> (StatusCode, Json<Value>) {
    state.requests.lock().unwrap().push(Recorded {
        path: uri.path().to_string(),
        authorization: headers
            .get(AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string),
        body: serde_json::from_slice(&body).unwrap_or(Value::Null),
    });
    if !state.delay.is_zero() {
        tokio::time::sleep(state.delay).await;
    }
    (state.status, Json(state.body.clone()))
}

pub fn grant_body(user_id: &str, jwt: &str) -> Value {
    json!({
        "success": true,
        "user": {"id": user_id, "fitcoins": 0},
        "jwt": jwt
    })
}

// ── Phoenix socket ─────────────────────────────────────────────────

/// How the mock socket treats each connection.
#[derive(Clone)]
pub struct SocketScript {
    /// `payload` of the `phx_reply` to the join: `{"status": .., "response": ..}`.
    pub join_reply: Value,
    /// `(event, payload)` pushed on the joined topic right after the reply.
    pub pushes: Vec<(String, Value)>,
    /// Close the socket once the pushes are sent.
    pub close_after_pushes: bool,
    /// Wait this long before answering the join.
    pub reply_delay: Duration,
}

impl SocketScript {
    pub fn join_ok(response: Value) -> Self {
        Self {
            join_reply: json!({"status": "ok", "response": response}),
            pushes: Vec::new(),
            close_after_pushes: false,
            reply_delay: Duration::ZERO,
        }
    }

    pub fn join_error(response: Value) -> Self {
        Self {
            join_reply: json!({"status": "error", "response": response}),
            pushes: Vec::new(),
            close_after_pushes: false,
            reply_delay: Duration::ZERO,
        }
    }

    pub fn push(mut self, event: &str, payload: Value) -> Self {
        self.pushes.push((event.to_string(), payload));
        self
    }

    pub fn then_close(mut self) -> Self {
        self.close_after_pushes = true;
        self
    }

    pub fn delay_reply(mut self, delay: Duration) -> Self {
        self.reply_delay = delay;
        self
    }
}

pub struct MockSocket {
    pub url: Url,
    pub joins: mpsc::UnboundedReceiver<Frame>,
    connections: Arc<AtomicUsize>,
}

impl MockSocket {
    pub fn connections(&self) -> usize {
        self.connections.load(Ordering::SeqCst)
    }
}

pub async fn spawn_socket(script: SocketScript) -> MockSocket {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let connections = Arc::new(AtomicUsize::new(0));
    let (joins_tx, joins) = mpsc::unbounded_channel();

    let counter = connections.clone();
    tokio::spawn(async move {
        while let Ok((stream, _)) = listener.accept().await {
            counter.fetch_add(1, Ordering::SeqCst);
            let script = script.clone();
            let joins_tx = joins_tx.clone();
            tokio::spawn(async move {
                let Ok(ws) = tokio_tungstenite::accept_async(stream).await else {
                    return;
                };
                serve_connection(ws, script, joins_tx).await;
            });
        }
    });

    MockSocket {
        url: format!("ws://{addr}/socket/websocket").parse().unwrap(),
        joins,
        connections,
    }
}

async fn serve_connection(
    ws: tokio_tungstenite::WebSocketStream<tokio::net::TcpStream>,
    script: SocketScript,
    joins_tx: mpsc::UnboundedSender<Frame>,
) {
    let (mut write, mut read) = ws.split();

    while let Some(Ok(message)) = read.next().await {
        let Message::Text(text) = message else {
            continue;
        };
        let Some(frame) = Frame::decode(text.as_str()) else {
            continue;
        };
        if frame.event != "phx_join" {
            continue;
        }

        let topic = frame.topic.clone();
        let reply = json!({
            "topic": topic,
            "event": "phx_reply",
            "payload": script.join_reply,
            "ref": frame.reference,
            "join_ref": frame.join_ref,
        });
        let _ = joins_tx.send(frame);
        if !script.reply_delay.is_zero() {
            tokio::time::sleep(script.reply_delay).await;
        }
        if write.send(Message::text(reply.to_string())).await.is_err() {
            return;
        }

        for (event, payload) in &script.pushes {
            let push = json!({
                "topic": topic,
                "event": event,
                "payload": payload,
                "ref": null,
            });
            if write.send(Message::text(push.to_string())).await.is_err() {
                return;
            }
        }

        if script.close_after_pushes {
            let _ = write.send(Message::Close(None)).await;
            return;
        }
    }
}

// ── Wiring ─────────────────────────────────────────────────────────

pub fn config(backend: &Url, socket: &Url) -> ClientConfig {
    ClientConfig::new(
        "test-client",
        "https://app.example.com/index.html".parse().unwrap(),
        backend.clone(),
        socket.clone(),
    )
    .with_http_timeout(Duration::from_secs(5))
    .with_connect_timeout(Duration::from_secs(5))
    .with_join_timeout(Duration::from_secs(5))
}

/// A socket URL nothing listens on.
pub fn unused_socket_url() -> Url {
    "ws://127.0.0.1:9/socket/websocket".parse().unwrap()
}

// ── Wallet ─────────────────────────────────────────────────────────

pub struct TestWallet {
    pub accounts: Result<Vec<String>, WalletError>,
    pub signature: Result<String, WalletError>,
    pub sign_calls: AtomicUsize,
}

impl TestWallet {
    pub fn signing(address: &str, signature: &str) -> Self {
        Self {
            accounts: Ok(vec![address.to_string()]),
            signature: Ok(signature.to_string()),
            sign_calls: AtomicUsize::new(0),
        }
    }
}

impl WalletProvider for TestWallet {
    async fn request_accounts(&self) -> Result<Vec<String>, WalletError> {
        self.accounts.clone()
    }

    async fn personal_sign(&self, _message: &str, _address: &str) -> Result<String, WalletError> {
        self.sign_calls.fetch_add(1, Ordering::SeqCst);
        self.signature.clone()
    }
}
