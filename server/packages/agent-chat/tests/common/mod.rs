#![allow(dead_code)]

use std::io::{Read, Write};
use std::net::{SocketAddr, TcpListener as StdTcpListener};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use agent_chat::{build_router, AppState, AuthConfig};
use agent_chat_upstream::{AgentClient, UpstreamConfig};
use axum::body::{Body, Bytes};
use axum::extract::State;
use axum::http::{header, HeaderMap, Method, StatusCode, Uri};
use axum::response::{IntoResponse, Response};
use axum::Router;
use futures::StreamExt;
use serde_json::{json, Value};
use tokio::sync::Notify;

pub const AGENT_ID: &str = "agent-7";
pub const API_KEY: &str = "key-123";
pub const CREATED_CHAT_ID: &str = "chat-42";
pub const MISSING_CHAT_ID: &str = "missing";

pub const REPLY_CHUNKS: &[&str] = &[
    "data: {\"content\":\"Hel\",\"at\":\"t0\"}\n\n",
    "data: {\"tool_call\":{\"id\":\"c1\",\"functionName\":\"lookup\",\"functionArguments\":\"{}\"}}\n\ndata: {\"content\":\"lo, wö",
    "rld\"}\n\ndata: {not json}\n\n",
];

#[derive(Debug, Clone)]
pub struct Recorded {
    pub method: Method,
    pub path: String,
    pub query: Option<String>,
    pub authorization: Option<String>,
    pub body: Vec<u8>,
}

/// Stand-in for the hosted agent API, bound to an ephemeral port.
#[derive(Clone)]
pub struct FakeUpstream {
    requests: Arc<Mutex<Vec<Recorded>>>,
    create_status: StatusCode,
    history: Value,
    /// When set, the reply pauses after its first chunk until notified.
    hold_reply: Option<Arc<Notify>>,
}

impl FakeUpstream {
    pub fn new() -> Self {
        Self {
            requests: Arc::new(Mutex::new(Vec::new())),
            create_status: StatusCode::CREATED,
            history: json!({ "data": [] }),
            hold_reply: None,
        }
    }

    pub fn with_create_status(mut self, status: StatusCode) -> Self {
        self.create_status = status;
        self
    }

    pub fn with_history(mut self, history: Value) -> Self {
        self.history = history;
        self
    }

    pub fn with_held_reply(mut self, release: Arc<Notify>) -> Self {
        self.hold_reply = Some(release);
        self
    }

    pub async fn start(self) -> (Self, String) {
        let app = Router::new().fallback(handle).with_state(self.clone());
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind fake upstream");
        let addr: SocketAddr = listener.local_addr().expect("fake upstream addr");
        tokio::spawn(async move {
            let _ = axum::serve(listener, app).await;
        });
        (self, format!("http://{addr}"))
    }

    pub fn requests(&self) -> Vec<Recorded> {
        self.requests.lock().expect("requests lock").clone()
    }

    pub fn paths(&self) -> Vec<String> {
        self.requests()
            .into_iter()
            .map(|request| request.path)
            .collect()
    }
}

async fn handle(
    State(fake): State<FakeUpstream>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    fake.requests.lock().expect("requests lock").push(Recorded {
        method,
        path: uri.path().to_string(),
        query: uri.query().map(str::to_string),
        authorization: headers
            .get(header::AUTHORIZATION)
            .and_then(|value| value.to_str().ok())
            .map(str::to_string),
        body: body.to_vec(),
    });

    let path = uri.path();
    if path == "/api/chats" {
        if !fake.create_status.is_success() {
            return (fake.create_status, "agent quota exceeded").into_response();
        }
        return (
            fake.create_status,
            axum::Json(json!({ "data": { "id": CREATED_CHAT_ID, "type": "chats" } })),
        )
            .into_response();
    }
    if let Some(chat_id) = path
        .strip_prefix("/api/chats/")
        .and_then(|rest| rest.strip_suffix("/continue"))
    {
        if chat_id == MISSING_CHAT_ID {
            return (StatusCode::NOT_FOUND, "chat not found").into_response();
        }
        return reply(fake.hold_reply.clone());
    }
    if path == format!("/api/agents/{AGENT_ID}/chats") {
        return axum::Json(fake.history.clone()).into_response();
    }
    (StatusCode::NOT_FOUND, "no such route").into_response()
}

fn reply(hold: Option<Arc<Notify>>) -> Response {
    let stream = futures::stream::unfold(0usize, move |index| {
        let hold = hold.clone();
        async move {
            let chunk = REPLY_CHUNKS.get(index)?;
            if index == 1 {
                if let Some(hold) = hold {
                    hold.notified().await;
                }
            }
            Some((Ok::<_, std::io::Error>(*chunk), index + 1))
        }
    });
    Response::builder()
        .header(header::CONTENT_TYPE, "text/event-stream")
        .body(Body::from_stream(stream))
        .expect("reply response")
}

/// Sets its flag when dropped.
struct DropFlag(Arc<AtomicBool>);

impl Drop for DropFlag {
    fn drop(&mut self) {
        self.0.store(true, Ordering::SeqCst);
    }
}

/// Upstream whose continue reply sends `first_chunk` and then never ends.
/// `dropped` is set once the reply body is released on this side.
pub async fn serve_endless_reply(first_chunk: &'static str, dropped: Arc<AtomicBool>) -> String {
    let app = Router::new().fallback(move || {
        let flag = DropFlag(dropped.clone());
        async move {
            let body = futures::stream::once(async move { Ok::<_, std::io::Error>(first_chunk) })
                .chain(futures::stream::pending())
                .map(move |chunk| {
                    let _held = &flag;
                    chunk
                });
            Response::builder()
                .header(header::CONTENT_TYPE, "text/event-stream")
                .body(Body::from_stream(body))
                .expect("endless reply")
        }
    });
    spawn_server(app).await
}

/// Answers one request with a response that promises more body than it
/// sends, then closes the connection.
pub fn serve_truncated_reply_once(partial: &'static str) -> String {
    let listener = StdTcpListener::bind("127.0.0.1:0").expect("bind truncating server");
    let address = listener.local_addr().expect("truncating server address");

    std::thread::spawn(move || {
        if let Ok((mut stream, _)) = listener.accept() {
            read_request(&mut stream);
            let response = format!(
                "HTTP/1.1 200 OK\r\nContent-Type: text/event-stream\r\nContent-Length: {}\r\n\r\n{}",
                partial.len() + 4096,
                partial
            );
            let _ = stream.write_all(response.as_bytes());
            let _ = stream.flush();
        }
    });

    format!("http://{address}")
}

fn read_request(stream: &mut std::net::TcpStream) {
    let mut received = Vec::new();
    let mut buffer = [0_u8; 4096];
    loop {
        let Ok(read) = stream.read(&mut buffer) else {
            return;
        };
        if read == 0 {
            return;
        }
        received.extend_from_slice(&buffer[..read]);
        let text = String::from_utf8_lossy(&received);
        let Some(header_end) = text.find("\r\n\r\n") else {
            continue;
        };
        let content_length = text[..header_end]
            .lines()
            .filter_map(|line| line.split_once(':'))
            .find(|(name, _)| name.trim().eq_ignore_ascii_case("content-length"))
            .and_then(|(_, value)| value.trim().parse::<usize>().ok())
            .unwrap_or(0);
        if received.len() >= header_end + 4 + content_length {
            return;
        }
    }
}

pub fn upstream_config(base_url: &str) -> UpstreamConfig {
    UpstreamConfig::new(base_url)
        .with_api_key(API_KEY)
        .with_agent_id(AGENT_ID)
}

pub fn app(base_url: &str, auth: AuthConfig) -> Router {
    app_with_config(upstream_config(base_url), auth)
}

pub fn app_with_config(config: UpstreamConfig, auth: AuthConfig) -> Router {
    let client = AgentClient::new(config).expect("agent client");
    build_router(AppState::new(auth, client))
}

/// Serves `router` on an ephemeral port and returns its base URL.
pub async fn spawn_server(router: Router) -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind chat server");
    let addr = listener.local_addr().expect("chat server addr");
    tokio::spawn(async move {
        let _ = axum::serve(listener, router).await;
    });
    format!("http://{addr}")
}
