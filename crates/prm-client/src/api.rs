use std::time::Duration;

use prm_core::{ListedReview, Paginated, PropertyWithStats};
use reqwest::{Method, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

pub const DEFAULT_API_URL: &str = "http://localhost:3001";

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("HTTP error! status: {status}: {message}")]
    Status { status: u16, message: String },
    #[error("undecodable response from {endpoint}: {source}")]
    Decode {
        endpoint: String,
        #[source]
        source: serde_json::Error,
    },
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IngestionMetadata {
    pub total_reviews: usize,
    pub new_reviews: usize,
    pub source: String,
    pub fetched_at: String,
    pub channels: Vec<String>,
}

/// The parts of the ingestion report the store consumes.
#[derive(Debug, Clone, Deserialize)]
pub struct IngestedReviews {
    pub reviews: Vec<ListedReview>,
    pub metadata: IngestionMetadata,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApprovalResult {
    pub review_id: String,
    pub approved: bool,
    pub updated_at: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Health {
    pub service: String,
    pub version: String,
    pub timestamp: String,
    pub uptime: f64,
}

#[derive(Debug, Deserialize)]
struct DataEnvelope<T> {
    data: T,
}

#[derive(Debug, Deserialize)]
struct ErrorEnvelope {
    #[serde(default)]
    error: String,
    #[serde(default)]
    message: String,
}

#[derive(Debug, Serialize)]
struct ApprovalRequest {
    approved: bool,
}

/// Thin JSON client for the review API.
#[derive(Debug, Clone)]
pub struct ApiClient {
    http: reqwest::Client,
    base_url: String,
}

impl ApiClient {
    pub fn new(base_url: impl Into<String>) -> Result<Self, ClientError> {
        let http = reqwest::Client::builder().timeout(Duration::from_secs(30)).build()?;
        Ok(Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    pub fn from_env() -> Result<Self, ClientError> {
        Self::new(std::env::var("PRM_API_URL").unwrap_or_else(|_| DEFAULT_API_URL.to_string()))
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    async fn request<T: DeserializeOwned>(
        &self,
        method: Method,
        endpoint: &str,
        body: Option<&ApprovalRequest>,
    ) -> Result<T, ClientError> {
        let url = format!("{}/api{endpoint}", self.base_url);
        debug!(%method, url = %url, "api request");
        let mut request = self.http.request(method, &url);
        if let Some(body) = body {
            request = request.json(body);
        }
        let response = request.send().await?;
        let status = response.status();
        let bytes = response.bytes().await?;
        if !status.is_success() {
            return Err(status_error(status, &bytes));
        }
        serde_json::from_slice(&bytes).map_err(|source| ClientError::Decode {
            endpoint: endpoint.to_string(),
            source,
        })
    }

    /// Triggers ingestion and returns every stored review.
    pub async fn hostaway_reviews(&self) -> Result<IngestedReviews, ClientError> {
        let envelope: DataEnvelope<IngestedReviews> =
            self.request(Method::GET, "/reviews/hostaway", None).await?;
        Ok(envelope.data)
    }

    pub async fn properties(&self) -> Result<Paginated<PropertyWithStats>, ClientError> {
        self.request(Method::GET, "/properties", None).await
    }

    pub async fn reviews_page(
        &self,
        page: u32,
        limit: u32,
    ) -> Result<Paginated<ListedReview>, ClientError> {
        let endpoint = format!("/reviews?page={page}&limit={limit}");
        self.request(Method::GET, &endpoint, None).await
    }

    pub async fn approve_review(
        &self,
        review_id: &str,
        approved: bool,
    ) -> Result<ApprovalResult, ClientError> {
        let envelope: DataEnvelope<ApprovalResult> = self
            .request(
                Method::POST,
                &format!("/reviews/{review_id}/approve"),
                Some(&ApprovalRequest { approved }),
            )
            .await?;
        Ok(envelope.data)
    }

    pub async fn health(&self) -> Result<Health, ClientError> {
        self.request(Method::GET, "/health", None).await
    }
}

fn status_error(status: StatusCode, body: &[u8]) -> ClientError {
    let message = match serde_json::from_slice::<ErrorEnvelope>(body) {
        Ok(envelope) if !envelope.message.is_empty() => envelope.message,
        Ok(envelope) if !envelope.error.is_empty() => envelope.error,
        _ => String::from_utf8_lossy(body).into_owned(),
    };
    ClientError::Status {
        status: status.as_u16(),
        message,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_errors_prefer_the_envelope_message() {
        let body = br#"{"success":false,"error":"Invalid request body","message":"\"approved\" is required"}"#;
        match status_error(StatusCode::BAD_REQUEST, body) {
            ClientError::Status { status, message } => {
                assert_eq!(status, 400);
                assert_eq!(message, "\"approved\" is required");
            }
            other => panic!("unexpected {other:?}"),
        }

        match status_error(StatusCode::BAD_GATEWAY, b"upstream down") {
            ClientError::Status { message, .. } => assert_eq!(message, "upstream down"),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn base_url_is_normalized() {
        let client = ApiClient::new("http://localhost:3001/").unwrap();
        assert_eq!(client.base_url(), "http://localhost:3001");
    }
}
