//! Review ingestion: fetch, normalize, resolve properties, upsert, report.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use prm_adapters::{
    normalize_review, HostawayConfig, HostawaySource, ReviewSource, DEFAULT_HOSTAWAY_BASE_URL,
};
use prm_core::{iso_timestamp, ListedReview, Review};
use prm_storage::{BackoffPolicy, Database, HttpClientConfig};
use serde::Serialize;
use tracing::{info, info_span, warn, Instrument};

pub const CRATE_NAME: &str = "prm-sync";

pub const DEFAULT_DATABASE_URL: &str = "sqlite://prm.db?mode=rwc";

/// What re-ingesting an already stored review does to its `approved` flag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ApprovalPolicy {
    /// Every ingested review lands unapproved, replacing earlier decisions.
    #[default]
    Reset,
    /// Existing rows keep their flag; only new rows start unapproved.
    Preserve,
}

#[derive(Debug, Clone)]
pub struct SyncConfig {
    pub database_url: String,
    pub hostaway_base_url: String,
    pub hostaway_access_token: Option<String>,
    pub user_agent: String,
    pub http_timeout_secs: u64,
    pub http_max_retries: usize,
    pub approval_policy: ApprovalPolicy,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            database_url: DEFAULT_DATABASE_URL.to_string(),
            hostaway_base_url: DEFAULT_HOSTAWAY_BASE_URL.to_string(),
            hostaway_access_token: None,
            user_agent: "prm-ingest/0.1".to_string(),
            http_timeout_secs: 20,
            http_max_retries: BackoffPolicy::default().max_retries,
            approval_policy: ApprovalPolicy::Reset,
        }
    }
}

impl SyncConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            database_url: std::env::var("DATABASE_URL").unwrap_or(defaults.database_url),
            hostaway_base_url: std::env::var("HOSTAWAY_BASE_URL")
                .unwrap_or(defaults.hostaway_base_url),
            hostaway_access_token: std::env::var("HOSTAWAY_ACCESS_TOKEN")
                .ok()
                .filter(|token| !token.trim().is_empty()),
            user_agent: std::env::var("PRM_USER_AGENT").unwrap_or(defaults.user_agent),
            http_timeout_secs: std::env::var("PRM_HTTP_TIMEOUT_SECS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.http_timeout_secs),
            http_max_retries: std::env::var("PRM_HTTP_MAX_RETRIES")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.http_max_retries),
            approval_policy: std::env::var("PRM_PRESERVE_APPROVAL")
                .map(|v| {
                    if matches!(v.as_str(), "1" | "true" | "TRUE" | "True") {
                        ApprovalPolicy::Preserve
                    } else {
                        ApprovalPolicy::Reset
                    }
                })
                .unwrap_or_default(),
        }
    }

    pub fn hostaway(&self) -> HostawayConfig {
        HostawayConfig {
            base_url: self.hostaway_base_url.clone(),
            access_token: self.hostaway_access_token.clone(),
            http: HttpClientConfig {
                timeout: Duration::from_secs(self.http_timeout_secs),
                user_agent: Some(self.user_agent.clone()),
                backoff: BackoffPolicy {
                    max_retries: self.http_max_retries,
                    ..BackoffPolicy::default()
                },
            },
        }
    }
}

/// Stored reviews of one property, as reported after an ingestion run.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PropertyReviewGroup {
    pub property_id: String,
    pub listing_name: Option<String>,
    pub reviews: Vec<ListedReview>,
    pub total_reviews: usize,
    pub average_rating: f64,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IngestionMetadata {
    pub total_reviews: usize,
    pub new_reviews: usize,
    pub source: String,
    pub fetched_at: String,
    pub channels: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct IngestionReport {
    pub reviews: Vec<ListedReview>,
    pub properties: Vec<PropertyReviewGroup>,
    pub metadata: IngestionMetadata,
}

pub struct IngestionPipeline {
    db: Database,
    source: Arc<dyn ReviewSource>,
    policy: ApprovalPolicy,
}

impl IngestionPipeline {
    pub fn new(config: &SyncConfig, db: Database) -> Result<Self> {
        let source = HostawaySource::new(config.hostaway()).context("building Hostaway source")?;
        Ok(Self::with_source(db, Arc::new(source)).with_policy(config.approval_policy))
    }

    pub fn with_source(db: Database, source: Arc<dyn ReviewSource>) -> Self {
        Self {
            db,
            source,
            policy: ApprovalPolicy::default(),
        }
    }

    pub fn with_policy(mut self, policy: ApprovalPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn policy(&self) -> ApprovalPolicy {
        self.policy
    }

    pub async fn run_once(&self) -> Result<IngestionReport> {
        let span = info_span!("ingestion", source = self.source.label(), policy = ?self.policy);
        self.ingest().instrument(span).await
    }

    async fn ingest(&self) -> Result<IngestionReport> {
        let batch = self
            .source
            .fetch()
            .await
            .with_context(|| format!("fetching reviews from {}", self.source.label()))?;
        info!(count = batch.records.len(), origin = ?batch.origin, "fetched review batch");

        let properties = self.db.properties();
        let mut stored = 0usize;
        for raw in &batch.records {
            let canonical = match normalize_review(raw) {
                Ok(canonical) => canonical,
                Err(err) => {
                    warn!(error = %err, "skipping review");
                    continue;
                }
            };
            let review_id = canonical.id.clone();
            let lookup = properties
                .resolve_id_by_listing_name(&canonical.listing_name)
                .await;
            let property_id = match lookup {
                Ok(property_id) => property_id,
                Err(err) => {
                    warn!(
                        review_id = %review_id,
                        error = %err,
                        "property lookup failed; skipping review"
                    );
                    continue;
                }
            };
            if property_id.is_none() {
                warn!(
                    review_id = %review_id,
                    listing = %canonical.listing_name,
                    "no property for listing; storing as orphan"
                );
            }
            match self.store(&canonical.into_review(property_id)).await {
                Ok(()) => stored += 1,
                Err(err) => warn!(review_id = %review_id, error = %err, "failed to store review"),
            }
        }

        let reviews = self
            .db
            .reviews()
            .list_all()
            .await
            .context("listing stored reviews")?;
        info!(stored, total = reviews.len(), "ingestion finished");

        Ok(IngestionReport {
            properties: group_by_property(&reviews),
            metadata: IngestionMetadata {
                total_reviews: reviews.len(),
                new_reviews: stored,
                source: self.source.label().to_string(),
                fetched_at: iso_timestamp(batch.fetched_at),
                channels: distinct_channels(&reviews),
            },
            reviews,
        })
    }

    async fn store(&self, review: &Review) -> Result<(), prm_storage::StorageError> {
        let repo = self.db.reviews();
        match self.policy {
            ApprovalPolicy::Reset => repo.upsert(review).await,
            ApprovalPolicy::Preserve => repo.upsert_preserving_approval(review).await,
        }
    }
}

/// Groups in order of first appearance; orphans are left out.
pub fn group_by_property(reviews: &[ListedReview]) -> Vec<PropertyReviewGroup> {
    let mut groups: Vec<PropertyReviewGroup> = Vec::new();
    for listed in reviews {
        let Some(property_id) = listed.review.property_id.as_deref() else {
            continue;
        };
        let idx = match groups.iter().position(|g| g.property_id == property_id) {
            Some(idx) => idx,
            None => {
                groups.push(PropertyReviewGroup {
                    property_id: property_id.to_string(),
                    listing_name: listed.listing_name.clone(),
                    reviews: Vec::new(),
                    total_reviews: 0,
                    average_rating: 0.0,
                });
                groups.len() - 1
            }
        };
        groups[idx].reviews.push(listed.clone());
        groups[idx].total_reviews += 1;
    }

    for group in &mut groups {
        let rated = group
            .reviews
            .iter()
            .map(|r| r.review.rating)
            .filter(|rating| *rating > 0.0)
            .collect::<Vec<_>>();
        group.average_rating = if rated.is_empty() {
            0.0
        } else {
            rated.iter().sum::<f64>() / rated.len() as f64
        };
    }
    groups
}

fn distinct_channels(reviews: &[ListedReview]) -> Vec<String> {
    let mut channels: Vec<String> = Vec::new();
    for listed in reviews {
        if !channels.contains(&listed.review.channel) {
            channels.push(listed.review.channel.clone());
        }
    }
    channels
}

pub async fn run_ingestion_once_from_env() -> Result<IngestionReport> {
    let config = SyncConfig::from_env();
    let db = Database::bootstrap(&config.database_url)
        .await
        .with_context(|| format!("opening {}", config.database_url))?;
    let report = IngestionPipeline::new(&config, db.clone())?.run_once().await;
    db.close().await;
    report
}
