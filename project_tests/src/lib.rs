//! # Gateway Test Fixtures
//!
//! A scripted stand-in for the recommendation backend plus helpers for
//! driving the real gateway router in-process.
//!
//! [`MockBackend`] is a genuine axum server on `127.0.0.1:0`. It answers both
//! backend endpoints with one scripted [`Reply`], counts calls, keeps every
//! request body, and notices when a streamed body is dropped by the client.

use anyhow::Result;
use axum::body::{Body, Bytes};
use axum::extract::State;
use axum::http::header::CONTENT_TYPE;
use axum::http::{HeaderValue, Request, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::post;
use axum::Router;
use futures_util::stream::{self, StreamExt};
use lib_common::admission::{AdmissionConfig, AdmissionGate};
use lib_common::retrieve::BackendClient;
use movie_logic::routes::router;
use movie_logic::state::AppState;
use serde_json::Value;
use std::io;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;

/// Pause between scripted chunks, so each one leaves in its own write.
const CHUNK_PAUSE: Duration = Duration::from_millis(5);

/// What the mock answers with.
#[derive(Debug, Clone)]
pub enum Reply {
    /// `200` line-delimited body, one chunk per entry.
    Lines(Vec<String>),
    /// `200` `application/json` body.
    Document(String),
    /// `200` body under an arbitrary `Content-Type`, or none at all.
    Labelled(Option<&'static str>, String),
    /// Any status with a JSON body.
    Status(u16, String),
    /// Sends the chunks, then breaks the connection mid-body.
    Truncated(Vec<String>),
    /// Error status whose body breaks off after the given prefix.
    BrokenStatus(u16, String),
    /// Streams `init` and then a fresh movie every few milliseconds, forever.
    Endless,
}

struct Shared {
    reply: Reply,
    calls: AtomicUsize,
    bodies: Mutex<Vec<Value>>,
    dropped: Arc<AtomicBool>,
}

/// Scripted recommendation backend.
pub struct MockBackend {
    /// Base URL to hand to the gateway.
    pub url: String,
    shared: Arc<Shared>,
    server: JoinHandle<()>,
}

impl MockBackend {
    /// Binds to an ephemeral port and starts serving `reply`.
    pub async fn start(reply: Reply) -> Result<Self> {
        let shared = Arc::new(Shared {
            reply,
            calls: AtomicUsize::new(0),
            bodies: Mutex::new(Vec::new()),
            dropped: Arc::new(AtomicBool::new(false)),
        });

        let app = Router::new()
            .route("/api/movies/recommendations", post(respond))
            .route("/api/providers/", post(respond))
            .with_state(shared.clone());

        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let url = format!("http://{}", listener.local_addr()?);
        let server = tokio::spawn(async move {
            let _ = axum::serve(listener, app).await;
        });

        Ok(Self { url, shared, server })
    }

    /// Requests received so far.
    pub fn calls(&self) -> usize {
        self.shared.calls.load(Ordering::SeqCst)
    }

    /// Request bodies received so far, parsed as JSON.
    pub fn bodies(&self) -> Vec<Value> {
        self.shared.bodies.lock().map(|b| b.clone()).unwrap_or_default()
    }

    /// Whether an [`Reply::Endless`] body has been dropped.
    pub fn stream_dropped(&self) -> bool {
        self.shared.dropped.load(Ordering::SeqCst)
    }

    /// Polls [`MockBackend::stream_dropped`] for up to `timeout`.
    pub async fn wait_for_drop(&self, timeout: Duration) -> bool {
        let deadline = tokio::time::Instant::now() + timeout;
        while tokio::time::Instant::now() < deadline {
            if self.stream_dropped() {
                return true;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        self.stream_dropped()
    }
}

impl Drop for MockBackend {
    fn drop(&mut self) {
        self.server.abort();
    }
}

// Flags the mock when the endless body is torn down.
struct DropFlag(Arc<AtomicBool>);

impl Drop for DropFlag {
    fn drop(&mut self) {
        self.0.store(true, Ordering::SeqCst);
    }
}

async fn respond(State(shared): State<Arc<Shared>>, body: Bytes) -> Response {
    shared.calls.fetch_add(1, Ordering::SeqCst);
    let parsed = serde_json::from_slice(&body).unwrap_or(Value::Null);
    if let Ok(mut bodies) = shared.bodies.lock() {
        bodies.push(parsed);
    }

    match shared.reply.clone() {
        Reply::Lines(chunks) => ndjson(Body::from_stream(paced(chunks))),
        Reply::Document(body) => json_response(StatusCode::OK, body),
        Reply::Labelled(content_type, body) => {
            let mut response = Body::from(body).into_response();
            if let Some(value) = content_type {
                response
                    .headers_mut()
                    .insert(CONTENT_TYPE, HeaderValue::from_static(value));
            }
            response
        }
        Reply::Status(status, body) => {
            json_response(StatusCode::from_u16(status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR), body)
        }
        Reply::Truncated(chunks) => {
            let broken = paced(chunks).chain(stream::once(async {
                Err(io::Error::new(io::ErrorKind::ConnectionAborted, "scripted truncation"))
            }));
            ndjson(Body::from_stream(broken))
        }
        Reply::BrokenStatus(status, prefix) => {
            let broken = paced(vec![prefix]).chain(stream::once(async {
                Err(io::Error::new(io::ErrorKind::ConnectionAborted, "scripted truncation"))
            }));
            let mut response = Body::from_stream(broken).into_response();
            *response.status_mut() = StatusCode::from_u16(status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
            response
        }
        Reply::Endless => {
            let flag = DropFlag(shared.dropped.clone());
            let endless = stream::unfold((flag, 0u64), |(flag, n)| async move {
                let line = if n == 0 {
                    "{\"type\":\"init\",\"query\":\"endless\"}\n".to_string()
                } else {
                    tokio::time::sleep(Duration::from_millis(10)).await;
                    format!("{{\"type\":\"movie\",\"data\":{{\"id\":{}}}}}\n", n)
                };
                Some((Ok::<_, io::Error>(Bytes::from(line)), (flag, n + 1)))
            });
            ndjson(Body::from_stream(endless))
        }
    }
}

fn paced(chunks: Vec<String>) -> impl futures_util::Stream<Item = io::Result<Bytes>> + Send + 'static {
    stream::iter(chunks).then(|chunk| async move {
        tokio::time::sleep(CHUNK_PAUSE).await;
        Ok::<_, io::Error>(Bytes::from(chunk))
    })
}

fn ndjson(body: Body) -> Response {
    let mut response = body.into_response();
    response
        .headers_mut()
        .insert(CONTENT_TYPE, HeaderValue::from_static("application/x-ndjson"));
    response
}

fn json_response(status: StatusCode, body: String) -> Response {
    let mut response = (status, body).into_response();
    response
        .headers_mut()
        .insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
    response
}

/// Builds the gateway router against `backend_url` with the given gate.
pub fn gateway(backend_url: &str, admission: AdmissionConfig) -> Result<Router> {
    let state = AppState::from_parts(
        Arc::new(AdmissionGate::new(admission)),
        BackendClient::new(backend_url)?,
        "/api/",
    );
    Ok(router(state))
}

/// A gateway whose gate never gets in the way of a single test.
pub fn open_gateway(backend_url: &str) -> Result<Router> {
    gateway(
        backend_url,
        AdmissionConfig {
            limit: 1_000,
            ..AdmissionConfig::default()
        },
    )
}

/// A movie event line for scripted streams.
pub fn movie_line(id: u64, title: &str) -> String {
    format!("{{\"type\":\"movie\",\"data\":{{\"id\":{},\"title\":\"{}\"}}}}\n", id, title)
}

/// An init event line for scripted streams.
pub fn init_line(query: &str) -> String {
    format!("{{\"type\":\"init\",\"query\":\"{}\"}}\n", query)
}

/// A JSON `POST` to the gateway.
pub fn post_json(path: &str, body: &Value) -> Request<Body> {
    let mut request = Request::new(Body::from(body.to_string()));
    *request.method_mut() = axum::http::Method::POST;
    *request.uri_mut() = path.parse().unwrap_or_default();
    request
        .headers_mut()
        .insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
    request
}

/// Reads a whole response body as UTF-8.
pub async fn body_text(response: Response) -> Result<String> {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await?;
    Ok(String::from_utf8(bytes.to_vec())?)
}
