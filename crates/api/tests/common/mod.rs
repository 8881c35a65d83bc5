//! Shared helpers for the integration tests.
//!
//! Every test runs against `InMemoryStore`, so no database is required.

#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use axum::Router;
use persistence::{InMemoryStore, Store};
use tokio::sync::Mutex;

use webhook_engine_api::app::{create_app, AppState};
use webhook_engine_api::config::Config;
use webhook_engine_api::services::transport::{OutboundRequest, TransportResponse};
use webhook_engine_api::services::{TransportError, WebhookTransport};

pub fn test_config(overrides: &[(&str, &str)]) -> Config {
    Config::load_for_test(overrides).expect("Failed to load test configuration")
}

/// Transport that replays a script of responses, then repeats `fallback`.
pub struct MockTransport {
    script: Mutex<VecDeque<Result<TransportResponse, TransportError>>>,
    fallback: Result<TransportResponse, TransportError>,
    /// Never answer; the caller's timeout has to end the request.
    hang: bool,
    calls: AtomicUsize,
    requests: Mutex<Vec<OutboundRequest>>,
}

impl MockTransport {
    pub fn always_status(status: u16) -> Self {
        Self::new(Ok(TransportResponse {
            status,
            body: String::new(),
        }))
    }

    pub fn always_timeout() -> Self {
        Self::new(Err(TransportError::Timeout))
    }

    pub fn hanging() -> Self {
        Self {
            hang: true,
            ..Self::always_timeout()
        }
    }

    fn new(fallback: Result<TransportResponse, TransportError>) -> Self {
        Self {
            script: Mutex::new(VecDeque::new()),
            fallback,
            hang: false,
            calls: AtomicUsize::new(0),
            requests: Mutex::new(Vec::new()),
        }
    }

    pub async fn push_status(&self, status: u16) {
        self.script.lock().await.push_back(Ok(TransportResponse {
            status,
            body: String::new(),
        }));
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub async fn requests(&self) -> Vec<OutboundRequest> {
        self.requests.lock().await.clone()
    }
}

#[async_trait]
impl WebhookTransport for MockTransport {
    async fn send(&self, request: OutboundRequest) -> Result<TransportResponse, TransportError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.requests.lock().await.push(request);
        if self.hang {
            std::future::pending::<()>().await;
        }
        match self.script.lock().await.pop_front() {
            Some(scripted) => scripted,
            None => self.fallback.clone(),
        }
    }
}

/// Engine state plus direct handles to the store and transport.
pub struct TestHarness {
    pub state: AppState,
    pub store: Arc<InMemoryStore>,
}

impl TestHarness {
    pub fn new(config: Config, transport: Arc<dyn WebhookTransport>) -> Self {
        let store = Arc::new(InMemoryStore::new());
        let dyn_store: Arc<dyn Store> = store.clone();
        let state = AppState::new(config, dyn_store, transport);
        Self { state, store }
    }

    pub fn app(&self) -> Router {
        create_app(self.state.clone())
    }
}

pub fn create_test_app(transport: Arc<dyn WebhookTransport>) -> (Router, TestHarness) {
    let harness = TestHarness::new(test_config(&[]), transport);
    (harness.app(), harness)
}

pub fn json_request(
    method: axum::http::Method,
    uri: &str,
    body: serde_json::Value,
) -> axum::http::Request<axum::body::Body> {
    use axum::{
        body::Body,
        http::{header, Request},
    };

    Request::builder()
        .method(method)
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(serde_json::to_string(&body).unwrap()))
        .unwrap()
}

pub fn get_request(uri: &str) -> axum::http::Request<axum::body::Body> {
    axum::http::Request::builder()
        .method(axum::http::Method::GET)
        .uri(uri)
        .body(axum::body::Body::empty())
        .unwrap()
}

pub fn delete_request(uri: &str) -> axum::http::Request<axum::body::Body> {
    axum::http::Request::builder()
        .method(axum::http::Method::DELETE)
        .uri(uri)
        .body(axum::body::Body::empty())
        .unwrap()
}

pub async fn parse_response_body(response: axum::response::Response) -> serde_json::Value {
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    serde_json::from_slice(&body).unwrap_or(serde_json::Value::Null)
}

/// A request captured by [`spawn_receiver`].
#[derive(Debug, Clone)]
pub struct ReceivedWebhook {
    pub headers: axum::http::HeaderMap,
    pub body: String,
}

/// Starts a local receiver on an ephemeral port that sleeps `delay` and then
/// answers `status`. Returns its URL and the captured requests.
pub async fn spawn_receiver(
    status: u16,
    delay: std::time::Duration,
) -> (String, Arc<Mutex<Vec<ReceivedWebhook>>>) {
    use axum::{http::HeaderMap, http::StatusCode, routing::post};

    let received = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&received);

    let app = Router::new().route(
        "/hook",
        post(move |headers: HeaderMap, body: String| {
            let sink = Arc::clone(&sink);
            async move {
                tokio::time::sleep(delay).await;
                sink.lock().await.push(ReceivedWebhook { headers, body });
                StatusCode::from_u16(status).unwrap_or(StatusCode::OK)
            }
        }),
    );

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    (format!("http://{addr}/hook"), received)
}
