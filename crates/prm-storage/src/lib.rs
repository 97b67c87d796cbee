//! SQLite persistence, listing queries, and HTTP fetch utilities for PRM.

use std::str::FromStr;
use std::time::Duration;

use anyhow::Context;
use prm_core::Property;
use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use thiserror::Error;
use tracing::{info, info_span, warn, Instrument};

mod properties;
pub mod query;
mod reviews;

pub use properties::PropertyRepository;
pub use reviews::{ApprovalUpdate, ReviewRepository};

pub const CRATE_NAME: &str = "prm-storage";

const BUNDLED_PROPERTIES: &str =
    include_str!("../../../fixtures/properties/sample/properties.json");

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("migration failed: {0}")]
    Migrate(#[from] sqlx::migrate::MigrateError),
    #[error("stored {column} for {id} is not valid JSON: {source}")]
    CorruptColumn {
        column: &'static str,
        id: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("serializing {column}: {source}")]
    Encode {
        column: &'static str,
        #[source]
        source: serde_json::Error,
    },
    #[error("invalid property fixture: {0}")]
    Fixture(#[source] serde_json::Error),
}

/// Owned handle over the SQLite pool. Lifecycle is `open` -> `migrate` ->
/// serve requests through the repositories -> `close`.
#[derive(Debug, Clone)]
pub struct Database {
    pool: SqlitePool,
}

impl Database {
    pub async fn open(url: &str) -> Result<Self, StorageError> {
        let options = SqliteConnectOptions::from_str(url)?
            .create_if_missing(true)
            .foreign_keys(true);

        // Every connection to `:memory:` is a separate database, so keep
        // exactly one connection alive for the lifetime of the pool.
        let pool_options = if is_in_memory(url) {
            SqlitePoolOptions::new()
                .max_connections(1)
                .min_connections(1)
                .idle_timeout(None::<Duration>)
                .max_lifetime(None::<Duration>)
        } else {
            SqlitePoolOptions::new().max_connections(8)
        };

        let pool = pool_options.connect_with(options).await?;
        info!(url, "opened database");
        Ok(Self { pool })
    }

    pub async fn open_in_memory() -> Result<Self, StorageError> {
        Self::open("sqlite::memory:").await
    }

    /// Opens, migrates, and seeds the bundled properties when the table is empty.
    pub async fn bootstrap(url: &str) -> Result<Self, StorageError> {
        let db = Self::open(url).await?;
        db.migrate().await?;
        let seeded = db.properties().seed_if_empty(&bundled_properties()?).await?;
        if seeded > 0 {
            info!(seeded, "inserted sample properties");
        }
        Ok(db)
    }

    pub async fn migrate(&self) -> Result<(), StorageError> {
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        Ok(())
    }

    pub fn properties(&self) -> PropertyRepository {
        PropertyRepository::new(self.pool.clone())
    }

    pub fn reviews(&self) -> ReviewRepository {
        ReviewRepository::new(self.pool.clone())
    }

    pub async fn close(&self) {
        self.pool.close().await;
        info!("database connection closed");
    }
}

fn is_in_memory(url: &str) -> bool {
    url.contains(":memory:") || url.contains("mode=memory")
}

/// Listing record as exported by the property-management system.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListingFixture {
    pub id: u64,
    pub name: String,
    pub internal_listing_name: String,
    pub address: String,
    pub description: String,
    pub price: i64,
    pub bedrooms_number: i64,
    pub bathrooms_number: i64,
    pub person_capacity: i64,
    #[serde(default)]
    pub listing_images: Vec<ListingImage>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ListingImage {
    pub url: String,
}

impl From<ListingFixture> for Property {
    fn from(listing: ListingFixture) -> Self {
        Property {
            id: listing.id.to_string(),
            name: listing.name,
            internal_listing_name: listing.internal_listing_name,
            address: listing.address,
            description: listing.description,
            price: listing.price,
            bedrooms: listing.bedrooms_number,
            bathrooms: listing.bathrooms_number,
            guests: listing.person_capacity,
            images: listing.listing_images.into_iter().map(|image| image.url).collect(),
        }
    }
}

pub fn parse_property_fixture(json: &str) -> Result<Vec<Property>, StorageError> {
    let listings: Vec<ListingFixture> = serde_json::from_str(json).map_err(StorageError::Fixture)?;
    Ok(listings.into_iter().map(Property::from).collect())
}

/// Sample properties compiled into the binary.
pub fn bundled_properties() -> Result<Vec<Property>, StorageError> {
    parse_property_fixture(BUNDLED_PROPERTIES)
}

/// Upstream statuses worth another attempt.
fn is_transient_status(status: StatusCode) -> bool {
    status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS
}

fn is_transient_error(err: &reqwest::Error) -> bool {
    err.is_timeout() || err.is_connect()
}

/// Retry budget for transient upstream failures; the wait doubles after
/// each retry and never exceeds `delay_cap`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackoffPolicy {
    pub max_retries: usize,
    pub initial_delay: Duration,
    pub delay_cap: Duration,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            max_retries: 2,
            initial_delay: Duration::from_millis(200),
            delay_cap: Duration::from_secs(2),
        }
    }
}

impl BackoffPolicy {
    /// Wait before retry number `retry`, counted from zero.
    pub fn delay(&self, retry: usize) -> Duration {
        let doubling = u32::try_from(retry)
            .ok()
            .and_then(|n| 2u32.checked_pow(n))
            .unwrap_or(u32::MAX);
        self.initial_delay.saturating_mul(doubling).min(self.delay_cap)
    }
}

#[derive(Debug, Clone)]
pub struct HttpClientConfig {
    pub timeout: Duration,
    pub user_agent: Option<String>,
    pub backoff: BackoffPolicy,
}

impl Default for HttpClientConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(20),
            user_agent: None,
            backoff: BackoffPolicy::default(),
        }
    }
}

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("request failed after retries: {0}")]
    Request(#[from] reqwest::Error),
    #[error("http status {status} for {url}")]
    HttpStatus { status: u16, url: String },
    #[error("undecodable response from {url}: {source}")]
    Decode {
        url: String,
        #[source]
        source: serde_json::Error,
    },
}

/// JSON-over-HTTP client with bounded exponential retry.
#[derive(Debug, Clone)]
pub struct HttpFetcher {
    client: reqwest::Client,
    backoff: BackoffPolicy,
}

impl HttpFetcher {
    pub fn new(config: HttpClientConfig) -> anyhow::Result<Self> {
        let mut builder = reqwest::Client::builder()
            .gzip(true)
            .brotli(true)
            .timeout(config.timeout);

        if let Some(user_agent) = &config.user_agent {
            builder = builder.user_agent(user_agent.clone());
        }

        let client = builder.build().context("building reqwest client")?;
        Ok(Self {
            client,
            backoff: config.backoff,
        })
    }

    pub async fn fetch_json<T: DeserializeOwned>(
        &self,
        url: &str,
        bearer_token: Option<&str>,
    ) -> Result<T, FetchError> {
        let span = info_span!("http_fetch", url);
        async move {
            let body = self.fetch_bytes(url, bearer_token).await?;
            serde_json::from_slice(&body).map_err(|source| FetchError::Decode {
                url: url.to_string(),
                source,
            })
        }
        .instrument(span)
        .await
    }

    async fn fetch_bytes(
        &self,
        url: &str,
        bearer_token: Option<&str>,
    ) -> Result<Vec<u8>, FetchError> {
        let mut retry = 0usize;
        loop {
            let mut request = self
                .client
                .get(url)
                .header(reqwest::header::CONTENT_TYPE, "application/json");
            if let Some(token) = bearer_token {
                request = request.bearer_auth(token);
            }

            let retries_left = retry < self.backoff.max_retries;
            match request.send().await {
                Ok(resp) if resp.status().is_success() => return Ok(resp.bytes().await?.to_vec()),
                Ok(resp) => {
                    let status = resp.status();
                    if !retries_left || !is_transient_status(status) {
                        return Err(FetchError::HttpStatus {
                            status: status.as_u16(),
                            url: url.to_string(),
                        });
                    }
                    warn!(%status, retry, "upstream answered with a transient status");
                }
                Err(err) => {
                    if !retries_left || !is_transient_error(&err) {
                        return Err(FetchError::Request(err));
                    }
                    warn!(error = %err, retry, "upstream request failed");
                }
            }

            tokio::time::sleep(self.backoff.delay(retry)).await;
            retry += 1;
        }
    }
}
