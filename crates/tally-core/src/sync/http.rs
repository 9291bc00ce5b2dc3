//! HTTP implementation of the sync endpoint
//!
//! Posts chunks to `{endpoint}/transactions/bulk` with an optional bearer
//! token. Status codes map onto [`UploadOutcome`]; transport failures are
//! returned as errors so the caller can mark the chunk for retry.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use tracing::{debug, warn};

use super::{status_message, BulkUploadRequest, BulkUploadResponse, SyncEndpoint, UploadOutcome};
use crate::config::SyncConfig;
use crate::error::{Error, Result};

/// Sync backend reached over HTTP
#[derive(Clone)]
pub struct HttpSyncEndpoint {
    http_client: Client,
    base_url: String,
    token: Option<String>,
}

impl HttpSyncEndpoint {
    pub fn new(base_url: &str, token: Option<String>, timeout: Duration) -> Result<Self> {
        let http_client = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            http_client,
            base_url: base_url.trim_end_matches('/').to_string(),
            token: token.filter(|t| !t.trim().is_empty()),
        })
    }

    /// Build from config; the endpoint URL is required
    pub fn from_config(config: &SyncConfig) -> Result<Self> {
        let endpoint = config.endpoint.as_deref().ok_or_else(|| {
            Error::Config(format!(
                "No sync endpoint configured (set [sync] endpoint or {})",
                crate::config::SYNC_URL_ENV
            ))
        })?;
        Self::new(endpoint, config.token.clone(), config.timeout)
    }

    pub fn bulk_url(&self) -> String {
        format!("{}/transactions/bulk", self.base_url)
    }
}

#[async_trait]
impl SyncEndpoint for HttpSyncEndpoint {
    async fn upload(&self, request: &BulkUploadRequest) -> Result<UploadOutcome> {
        let mut req_builder = self.http_client.post(self.bulk_url()).json(request);
        if let Some(ref token) = self.token {
            req_builder = req_builder.bearer_auth(token);
        }

        let response = req_builder.send().await?;
        let status = response.status();
        debug!("Bulk upload of {} -> {}", request.transactions.len(), status);

        match status {
            s if s.is_success() => {
                // The backend accepted the chunk; an odd reply body does not change that
                let body = response.text().await.unwrap_or_default();
                let parsed = if body.trim().is_empty() {
                    BulkUploadResponse::default()
                } else {
                    serde_json::from_str(&body).unwrap_or_else(|e| {
                        warn!("Bulk upload returned {} with an unreadable body: {}", s, e);
                        BulkUploadResponse::default()
                    })
                };
                Ok(UploadOutcome::Inserted(parsed))
            }
            StatusCode::CONFLICT => Ok(UploadOutcome::AlreadyExists),
            StatusCode::UNAUTHORIZED => Ok(UploadOutcome::Unauthorized),
            s => {
                let body = response.text().await.unwrap_or_default();
                let mut message = status_message(s.as_u16());
                if !body.trim().is_empty() {
                    message = format!("{}: {}", message, body.trim());
                }
                Ok(UploadOutcome::Rejected {
                    status: s.as_u16(),
                    message,
                })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sync::SyncItem;
    use crate::test_utils::MockSyncServer;
    use rust_decimal::Decimal;

    fn request() -> BulkUploadRequest {
        BulkUploadRequest {
            transactions: vec![SyncItem {
                amount: Decimal::from(649),
                kind: "EXPENSE".to_string(),
                category: "entertainment".to_string(),
                source: "BANK".to_string(),
                description: "NETFLIX".to_string(),
                transaction_date: "2025-01-05T09:30:00.000Z".to_string(),
                client_id: "c1".to_string(),
            }],
        }
    }

    fn endpoint(server: &MockSyncServer) -> HttpSyncEndpoint {
        HttpSyncEndpoint::new(&server.url(), Some("token".to_string()), Duration::from_secs(5))
            .unwrap()
    }

    #[test]
    fn test_bulk_url_trims_trailing_slash() {
        let endpoint =
            HttpSyncEndpoint::new("http://localhost:9000/v1/", None, Duration::from_secs(1))
                .unwrap();
        assert_eq!(endpoint.bulk_url(), "http://localhost:9000/v1/transactions/bulk");
    }

    #[test]
    fn test_from_config_requires_endpoint() {
        let result = HttpSyncEndpoint::from_config(&SyncConfig::default());
        assert!(matches!(result, Err(Error::Config(_))));
    }

    #[tokio::test]
    async fn test_upload_parses_inserted_ids() {
        let server = MockSyncServer::start().await;
        let outcome = endpoint(&server).upload(&request()).await.unwrap();
        match outcome {
            UploadOutcome::Inserted(response) => {
                assert_eq!(response.count, 1);
                assert_eq!(response.inserted_ids, vec!["c1".to_string()]);
            }
            other => panic!("expected Inserted, got {:?}", other),
        }
        assert_eq!(server.auth_headers(), vec![Some("Bearer token".to_string())]);
    }

    #[tokio::test]
    async fn test_plain_text_success_still_counts_as_inserted() {
        let server = MockSyncServer::start().await;
        server.reply_with_text("OK");
        server.script([200]);

        let outcome = endpoint(&server).upload(&request()).await.unwrap();
        assert_eq!(outcome, UploadOutcome::Inserted(BulkUploadResponse::default()));
    }

    #[tokio::test]
    async fn test_status_mapping() {
        let server = MockSyncServer::start().await;
        server.script([409, 429, 502]);
        let endpoint = endpoint(&server);

        assert_eq!(
            endpoint.upload(&request()).await.unwrap(),
            UploadOutcome::AlreadyExists
        );
        match endpoint.upload(&request()).await.unwrap() {
            UploadOutcome::Rejected { status, message } => {
                assert_eq!(status, 429);
                assert!(message.starts_with("Too many requests"));
            }
            other => panic!("expected Rejected, got {:?}", other),
        }
        match endpoint.upload(&request()).await.unwrap() {
            UploadOutcome::Rejected { status, message } => {
                assert_eq!(status, 502);
                assert!(message.starts_with("Server error (502)"));
            }
            other => panic!("expected Rejected, got {:?}", other),
        }
    }
}
