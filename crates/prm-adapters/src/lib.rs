//! Review source contracts, the Hostaway adapter, and the bundled fallback dataset.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use prm_storage::{HttpClientConfig, HttpFetcher};
use serde::Deserialize;
use thiserror::Error;
use tracing::{info, warn};

pub mod normalize;

pub use normalize::{
    normalize_review, CanonicalReview, HostawayCategory, HostawayReview, NormalizeError,
    CHANNEL_LABEL, DEFAULT_REVIEW_TYPE, SOURCE_LABEL,
};

pub const CRATE_NAME: &str = "prm-adapters";

pub const DEFAULT_HOSTAWAY_BASE_URL: &str = "https://api.hostaway.com/v1";

const BUNDLED_REVIEWS: &str = include_str!("../../../fixtures/hostaway/sample/reviews.json");

#[derive(Debug, Error)]
pub enum SourceError {
    #[error("invalid review fixture: {0}")]
    Fixture(#[from] serde_json::Error),
    #[error(transparent)]
    Anyhow(#[from] anyhow::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatchOrigin {
    Live,
    Fallback,
}

/// One pull of raw review records from a source.
#[derive(Debug, Clone)]
pub struct SourceBatch {
    pub records: Vec<HostawayReview>,
    pub origin: BatchOrigin,
    pub fetched_at: DateTime<Utc>,
}

#[async_trait]
pub trait ReviewSource: Send + Sync {
    fn label(&self) -> &'static str;

    async fn fetch(&self) -> Result<SourceBatch, SourceError>;
}

/// Hostaway review list wrapper: `{"status": "...", "result": [...]}`.
/// Records stay untyped here so one malformed entry cannot sink the batch.
#[derive(Debug, Deserialize)]
struct HostawayEnvelope {
    #[serde(default)]
    result: Vec<serde_json::Value>,
}

/// Decodes each record on its own; undecodable entries are logged and skipped.
pub fn decode_records(values: Vec<serde_json::Value>) -> Vec<HostawayReview> {
    values
        .into_iter()
        .enumerate()
        .filter_map(|(index, value)| match serde_json::from_value(value) {
            Ok(record) => Some(record),
            Err(err) => {
                warn!(index, error = %err, "skipping undecodable review record");
                None
            }
        })
        .collect()
}

pub fn parse_review_fixture(json: &str) -> Result<Vec<HostawayReview>, SourceError> {
    let values: Vec<serde_json::Value> = serde_json::from_str(json)?;
    Ok(decode_records(values))
}

/// Review records compiled into the binary.
pub fn bundled_reviews() -> Result<Vec<HostawayReview>, SourceError> {
    parse_review_fixture(BUNDLED_REVIEWS)
}

/// Serves the bundled dataset, or any records it was built with.
#[derive(Debug, Clone)]
pub struct FixtureSource {
    records: Vec<HostawayReview>,
}

impl FixtureSource {
    pub fn bundled() -> Result<Self, SourceError> {
        Ok(Self::new(bundled_reviews()?))
    }

    pub fn new(records: Vec<HostawayReview>) -> Self {
        Self { records }
    }
}

#[async_trait]
impl ReviewSource for FixtureSource {
    fn label(&self) -> &'static str {
        SOURCE_LABEL
    }

    async fn fetch(&self) -> Result<SourceBatch, SourceError> {
        Ok(SourceBatch {
            records: self.records.clone(),
            origin: BatchOrigin::Fallback,
            fetched_at: Utc::now(),
        })
    }
}

#[derive(Debug, Clone)]
pub struct HostawayConfig {
    pub base_url: String,
    pub access_token: Option<String>,
    pub http: HttpClientConfig,
}

impl Default for HostawayConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_HOSTAWAY_BASE_URL.to_string(),
            access_token: None,
            http: HttpClientConfig::default(),
        }
    }
}

/// Live Hostaway reviews with the bundled dataset behind them. Upstream
/// failures never surface to the caller; they are logged and the fallback
/// batch is returned instead.
#[derive(Debug, Clone)]
pub struct HostawaySource {
    http: HttpFetcher,
    reviews_url: String,
    access_token: Option<String>,
    fallback: FixtureSource,
}

impl HostawaySource {
    pub fn new(config: HostawayConfig) -> Result<Self, SourceError> {
        Self::with_fallback(config, FixtureSource::bundled()?)
    }

    pub fn with_fallback(
        config: HostawayConfig,
        fallback: FixtureSource,
    ) -> Result<Self, SourceError> {
        let http = HttpFetcher::new(config.http)?;
        Ok(Self {
            http,
            reviews_url: format!("{}/reviews", config.base_url.trim_end_matches('/')),
            access_token: config.access_token,
            fallback,
        })
    }

    pub fn reviews_url(&self) -> &str {
        &self.reviews_url
    }

    async fn fetch_live(&self) -> Option<Vec<HostawayReview>> {
        let Some(token) = self.access_token.as_deref() else {
            info!("no Hostaway access token configured; using bundled reviews");
            return None;
        };
        let envelope = match self
            .http
            .fetch_json::<HostawayEnvelope>(&self.reviews_url, Some(token))
            .await
        {
            Ok(envelope) => envelope,
            Err(err) => {
                warn!(error = %err, "Hostaway request failed; using bundled reviews");
                return None;
            }
        };
        let received = envelope.result.len();
        let records = decode_records(envelope.result);
        if records.is_empty() {
            warn!(
                url = %self.reviews_url,
                received,
                "Hostaway returned no usable reviews; using bundled reviews"
            );
            return None;
        }
        info!(count = records.len(), received, "fetched reviews from Hostaway");
        Some(records)
    }
}

#[async_trait]
impl ReviewSource for HostawaySource {
    fn label(&self) -> &'static str {
        SOURCE_LABEL
    }

    async fn fetch(&self) -> Result<SourceBatch, SourceError> {
        match self.fetch_live().await {
            Some(records) => Ok(SourceBatch {
                records,
                origin: BatchOrigin::Live,
                fetched_at: Utc::now(),
            }),
            None => {
                let batch = self.fallback.fetch().await?;
                info!(count = batch.records.len(), "serving bundled reviews");
                Ok(batch)
            }
        }
    }
}
