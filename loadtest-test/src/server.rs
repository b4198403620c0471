//! Exposes an in-process mock endpoint for use in integration tests.
//!
//! ```
//! use loadtest_test::server::{Reply, TestServer};
//!
//! #[tokio::main]
//! async fn main() {
//!    let server = TestServer::new(Reply::ok("{}")).await;
//!    let url = server.url("/process");
//!    // point a load test at the URL...
//! }
//! ```

use std::net::{SocketAddr, TcpListener};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::Router;
use axum::body::Bytes;
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode, header};
use axum::response::{IntoResponse, Response};
use serde_json::Value;

/// The response the mock endpoint sends for a request.
#[derive(Clone, Debug)]
pub enum Reply {
    /// Responds with the given status code and body.
    Status(u16, String),
    /// Waits for the given duration before sending the inner reply.
    Delayed(Duration, Box<Reply>),
}

impl Reply {
    /// A `200 OK` response with the given body.
    pub fn ok(body: impl Into<String>) -> Self {
        Self::Status(200, body.into())
    }

    /// A response with the given status code and body.
    pub fn status(status: u16, body: impl Into<String>) -> Self {
        Self::Status(status, body.into())
    }

    /// Sends this reply after waiting for `delay`.
    pub fn after(self, delay: Duration) -> Self {
        Self::Delayed(delay, Box::new(self))
    }
}

/// A request as received by the mock endpoint.
#[derive(Clone, Debug)]
pub struct ReceivedRequest {
    /// The `Content-Type` header, if present.
    pub content_type: Option<String>,
    /// The JSON body, or [`Value::Null`] if the body was not valid JSON.
    pub body: Value,
}

type Responder = dyn Fn(&Value) -> Reply + Send + Sync;

struct Shared {
    responder: Box<Responder>,
    requests: Mutex<Vec<ReceivedRequest>>,
    in_flight: AtomicUsize,
    peak_in_flight: AtomicUsize,
}

/// An in-process mock of the endpoint under test.
///
/// The server listens on a random available port on localhost and answers every request according
/// to its responder. It records all received requests and tracks how many of them were being
/// handled at the same time.
pub struct TestServer {
    handle: tokio::task::JoinHandle<()>,
    socket: SocketAddr,
    shared: Arc<Shared>,
}

impl std::fmt::Debug for TestServer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TestServer")
            .field("socket", &self.socket)
            .finish_non_exhaustive()
    }
}

impl TestServer {
    /// Starts a server that sends the same reply to every request.
    pub async fn new(reply: Reply) -> Self {
        Self::with_responder(move |_| reply.clone()).await
    }

    /// Starts a server that computes a reply from the JSON body of each request.
    pub async fn with_responder(
        responder: impl Fn(&Value) -> Reply + Send + Sync + 'static,
    ) -> Self {
        let addr = SocketAddr::from(([127, 0, 0, 1], 0));
        let listener = TcpListener::bind(addr).unwrap();
        listener.set_nonblocking(true).unwrap();
        let socket = listener.local_addr().unwrap();

        let shared = Arc::new(Shared {
            responder: Box::new(responder),
            requests: Mutex::default(),
            in_flight: AtomicUsize::new(0),
            peak_in_flight: AtomicUsize::new(0),
        });

        let app = Router::new().fallback(handle).with_state(Arc::clone(&shared));

        let handle = tokio::spawn(async move {
            let listener = tokio::net::TcpListener::from_std(listener).unwrap();
            axum::serve(listener, app).await.unwrap();
        });

        Self {
            handle,
            socket,
            shared,
        }
    }

    /// Returns a full URL pointing to the given path.
    ///
    /// This URL uses `localhost` as hostname.
    pub fn url(&self, path: &str) -> String {
        let path = path.trim_start_matches('/');
        format!("http://localhost:{}/{}", self.socket.port(), path)
    }

    /// All requests received so far, in order of arrival.
    pub fn requests(&self) -> Vec<ReceivedRequest> {
        self.shared.requests.lock().unwrap().clone()
    }

    /// The highest number of requests that were handled at the same time.
    pub fn peak_in_flight(&self) -> usize {
        self.shared.peak_in_flight.load(Ordering::SeqCst)
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

async fn handle(State(shared): State<Arc<Shared>>, headers: HeaderMap, body: Bytes) -> Response {
    let body = serde_json::from_slice(&body).unwrap_or(Value::Null);
    let content_type = headers
        .get(header::CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .map(str::to_owned);

    let mut reply = (shared.responder)(&body);
    shared
        .requests
        .lock()
        .unwrap()
        .push(ReceivedRequest { content_type, body });

    let in_flight = shared.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
    shared.peak_in_flight.fetch_max(in_flight, Ordering::SeqCst);

    let (status, body) = loop {
        match reply {
            Reply::Status(status, body) => break (status, body),
            Reply::Delayed(delay, inner) => {
                tokio::time::sleep(delay).await;
                reply = *inner;
            }
        }
    };

    shared.in_flight.fetch_sub(1, Ordering::SeqCst);

    let status = StatusCode::from_u16(status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    (status, [(header::CONTENT_TYPE, "application/json")], body).into_response()
}
