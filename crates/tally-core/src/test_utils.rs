//! Test utilities for tally-core
//!
//! Provides a mock sync backend that can be used for development and
//! integration tests.

use std::collections::VecDeque;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};

use axum::{
    extract::{Json, State},
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::post,
    Router,
};
use tokio::sync::oneshot;

use crate::sync::{BulkUploadRequest, BulkUploadResponse};

#[derive(Default)]
struct MockState {
    /// Status codes to answer with, in order; 201 once exhausted
    script: Mutex<VecDeque<u16>>,
    received: Mutex<Vec<BulkUploadRequest>>,
    auth_headers: Mutex<Vec<Option<String>>>,
    expected_token: Option<String>,
    /// Raw text sent instead of the JSON reply on success
    success_text: Mutex<Option<String>>,
}

/// Mock sync backend for testing and development
pub struct MockSyncServer {
    addr: SocketAddr,
    state: Arc<MockState>,
    shutdown_tx: Option<oneshot::Sender<()>>,
}

impl MockSyncServer {
    /// Start the mock server on an available port
    pub async fn start() -> Self {
        Self::start_with_state(MockState::default()).await
    }

    /// Start a server that answers 401 unless the bearer token matches
    pub async fn with_token(token: &str) -> Self {
        Self::start_with_state(MockState {
            expected_token: Some(token.to_string()),
            ..Default::default()
        })
        .await
    }

    async fn start_with_state(state: MockState) -> Self {
        let state = Arc::new(state);
        let app = Router::new()
            .route("/transactions/bulk", post(handle_bulk))
            .with_state(state.clone());

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let (shutdown_tx, shutdown_rx) = oneshot::channel();

        tokio::spawn(async move {
            axum::serve(listener, app)
                .with_graceful_shutdown(async {
                    shutdown_rx.await.ok();
                })
                .await
                .unwrap();
        });

        Self {
            addr,
            state,
            shutdown_tx: Some(shutdown_tx),
        }
    }

    /// Get the base URL for this mock server
    pub fn url(&self) -> String {
        format!("http://{}", self.addr)
    }

    /// Queue status codes for the next requests
    pub fn script(&self, statuses: impl IntoIterator<Item = u16>) {
        self.state.script.lock().unwrap().extend(statuses);
    }

    /// Answer successful uploads with this plain-text body instead of JSON
    pub fn reply_with_text(&self, body: &str) {
        *self.state.success_text.lock().unwrap() = Some(body.to_string());
    }

    /// Every request body received so far
    pub fn received(&self) -> Vec<BulkUploadRequest> {
        self.state.received.lock().unwrap().clone()
    }

    /// `Authorization` header of every request, in order
    pub fn auth_headers(&self) -> Vec<Option<String>> {
        self.state.auth_headers.lock().unwrap().clone()
    }

    pub fn call_count(&self) -> usize {
        self.state.received.lock().unwrap().len()
    }

    /// Stop the mock server
    pub fn stop(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
    }
}

impl Drop for MockSyncServer {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Bulk upload endpoint
async fn handle_bulk(
    State(state): State<Arc<MockState>>,
    headers: HeaderMap,
    Json(request): Json<BulkUploadRequest>,
) -> Response {
    let auth = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);
    state.auth_headers.lock().unwrap().push(auth.clone());
    state.received.lock().unwrap().push(request.clone());

    if let Some(expected) = &state.expected_token {
        if auth.as_deref() != Some(format!("Bearer {}", expected).as_str()) {
            return (StatusCode::UNAUTHORIZED, "invalid token").into_response();
        }
    }

    let status = state.script.lock().unwrap().pop_front().unwrap_or(201);
    let status = StatusCode::from_u16(status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);

    if status.is_success() {
        if let Some(text) = state.success_text.lock().unwrap().clone() {
            return (status, text).into_response();
        }
        let inserted_ids: Vec<String> = request
            .transactions
            .iter()
            .map(|t| t.client_id.clone())
            .collect();
        let body = BulkUploadResponse {
            message: Some("Transactions created".to_string()),
            count: inserted_ids.len(),
            inserted_ids,
        };
        (status, Json(body)).into_response()
    } else {
        (status, format!("mock status {}", status.as_u16())).into_response()
    }
}
