//! JSON HTTP surface for property and review management.

use std::sync::Arc;
use std::time::Instant;

use anyhow::Context;
use axum::{
    body::Bytes,
    extract::{rejection::QueryRejection, Path, Query, State},
    http::{
        header::{AUTHORIZATION, CONTENT_TYPE},
        Method, Uri,
    },
    routing::{get, post},
    Json, Router,
};
use chrono::Utc;
use prm_core::{iso_timestamp, ListedReview, Paginated, PropertyDetails, PropertyWithStats};
use prm_storage::Database;
use prm_sync::{IngestionPipeline, IngestionReport, SyncConfig};
use serde::Serialize;
use tokio::net::TcpListener;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::info;

mod error;
mod params;

pub use error::{ApiError, FieldIssue};
pub use params::{parse_approval_body, validate_id, PropertyListParams, ReviewListParams};

pub const CRATE_NAME: &str = "prm-web";

pub const DEFAULT_SERVICE_NAME: &str = "The Flex Reviews API";
pub const DEFAULT_WEB_PORT: u16 = 3001;

#[derive(Debug, Clone)]
pub struct WebConfig {
    pub port: u16,
    pub service_name: String,
}

impl Default for WebConfig {
    fn default() -> Self {
        Self {
            port: DEFAULT_WEB_PORT,
            service_name: DEFAULT_SERVICE_NAME.to_string(),
        }
    }
}

impl WebConfig {
    pub fn from_env() -> Self {
        Self {
            port: std::env::var("PRM_WEB_PORT")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(DEFAULT_WEB_PORT),
            service_name: std::env::var("PRM_SERVICE_NAME")
                .unwrap_or_else(|_| DEFAULT_SERVICE_NAME.to_string()),
        }
    }
}

pub struct AppState {
    pub db: Database,
    pub pipeline: IngestionPipeline,
    pub service_name: String,
    pub started_at: Instant,
}

impl AppState {
    pub fn new(db: Database, pipeline: IngestionPipeline, service_name: impl Into<String>) -> Self {
        Self {
            db,
            pipeline,
            service_name: service_name.into(),
            started_at: Instant::now(),
        }
    }
}

type SharedState = Arc<AppState>;

pub fn app(state: AppState) -> Router {
    Router::new()
        .route("/api/properties", get(list_properties_handler))
        .route("/api/properties/{propertyId}", get(property_details_handler))
        .route("/api/reviews", get(list_reviews_handler))
        .route("/api/reviews/hostaway", get(ingest_reviews_handler))
        .route("/api/reviews/{reviewId}/approve", post(approve_review_handler))
        .route("/api/health", get(health_handler))
        .fallback(not_found_handler)
        .method_not_allowed_fallback(not_found_handler)
        .with_state(Arc::new(state))
        .layer(TraceLayer::new_for_http())
        .layer(cors_layer())
}

/// The dashboard is served from a different origin than the API.
fn cors_layer() -> CorsLayer {
    CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([CONTENT_TYPE, AUTHORIZATION])
}

pub async fn serve_from_env() -> anyhow::Result<()> {
    let web = WebConfig::from_env();
    let sync = SyncConfig::from_env();
    let db = Database::bootstrap(&sync.database_url)
        .await
        .with_context(|| format!("opening {}", sync.database_url))?;
    let pipeline = IngestionPipeline::new(&sync, db.clone())?;
    let state = AppState::new(db.clone(), pipeline, web.service_name.clone());

    let listener = TcpListener::bind(("0.0.0.0", web.port))
        .await
        .with_context(|| format!("binding port {}", web.port))?;
    info!(port = web.port, service = %web.service_name, "listening");
    let served = axum::serve(listener, app(state))
        .with_graceful_shutdown(shutdown_signal())
        .await;
    db.close().await;
    served.context("serving http")
}

async fn shutdown_signal() {
    if tokio::signal::ctrl_c().await.is_ok() {
        info!("shutdown requested");
    }
}

#[derive(Debug, Serialize)]
struct Envelope<T> {
    success: bool,
    #[serde(flatten)]
    payload: T,
}

fn ok<T: Serialize>(payload: T) -> Json<Envelope<T>> {
    Json(Envelope { success: true, payload })
}

#[derive(Debug, Serialize)]
struct DataPayload<T> {
    data: T,
}

#[derive(Debug, Serialize)]
struct ApprovalPayload {
    message: &'static str,
    data: ApprovalData,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ApprovalData {
    review_id: String,
    approved: bool,
    updated_at: String,
    database: &'static str,
}

#[derive(Debug, Serialize)]
struct HealthPayload {
    service: String,
    version: &'static str,
    timestamp: String,
    uptime: f64,
}

fn query_rejected(rejection: QueryRejection) -> ApiError {
    ApiError::InvalidQuery(vec![FieldIssue::new("query", rejection.body_text())])
}

async fn list_properties_handler(
    State(state): State<SharedState>,
    query: Result<Query<PropertyListParams>, QueryRejection>,
) -> Result<Json<Envelope<Paginated<PropertyWithStats>>>, ApiError> {
    let Query(params) = query.map_err(query_rejected)?;
    let (filters, page) = params.validate()?;
    let result = state
        .db
        .properties()
        .list_with_stats(&filters, &page)
        .await
        .map_err(|err| ApiError::internal("Failed to fetch properties", err))?;
    Ok(ok(result))
}

async fn property_details_handler(
    State(state): State<SharedState>,
    Path(property_id): Path<String>,
) -> Result<Json<Envelope<DataPayload<Option<PropertyDetails>>>>, ApiError> {
    validate_id("propertyId", &property_id)?;
    let details = state
        .db
        .properties()
        .get_details(&property_id)
        .await
        .map_err(|err| ApiError::internal("Failed to fetch property", err))?;
    Ok(ok(DataPayload { data: details }))
}

async fn list_reviews_handler(
    State(state): State<SharedState>,
    query: Result<Query<ReviewListParams>, QueryRejection>,
) -> Result<Json<Envelope<Paginated<ListedReview>>>, ApiError> {
    let Query(params) = query.map_err(query_rejected)?;
    let (filters, page) = params.validate()?;
    let result = state
        .db
        .reviews()
        .list_paginated(&filters, &page)
        .await
        .map_err(|err| ApiError::internal("Failed to fetch reviews", err))?;
    Ok(ok(result))
}

async fn ingest_reviews_handler(
    State(state): State<SharedState>,
) -> Result<Json<Envelope<DataPayload<IngestionReport>>>, ApiError> {
    let report = state
        .pipeline
        .run_once()
        .await
        .map_err(|err| ApiError::internal("Failed to fetch and store reviews", err))?;
    info!(
        new_reviews = report.metadata.new_reviews,
        total_reviews = report.metadata.total_reviews,
        "reviews ingested"
    );
    Ok(ok(DataPayload { data: report }))
}

async fn approve_review_handler(
    State(state): State<SharedState>,
    Path(review_id): Path<String>,
    body: Bytes,
) -> Result<Json<Envelope<ApprovalPayload>>, ApiError> {
    validate_id("reviewId", &review_id)?;
    let approved = parse_approval_body(&body)?;
    let update = state
        .db
        .reviews()
        .set_approval(&review_id, approved)
        .await
        .map_err(|err| ApiError::internal("Failed to update review approval", err))?;
    info!(review_id = %review_id, approved, rows = update.rows_affected, "review approval updated");

    Ok(ok(ApprovalPayload {
        message: if approved {
            "Review approved successfully"
        } else {
            "Review disapproved successfully"
        },
        data: ApprovalData {
            review_id,
            approved,
            updated_at: iso_timestamp(Utc::now()),
            database: "SQLite",
        },
    }))
}

async fn health_handler(State(state): State<SharedState>) -> Json<Envelope<HealthPayload>> {
    ok(HealthPayload {
        service: state.service_name.clone(),
        version: env!("CARGO_PKG_VERSION"),
        timestamp: iso_timestamp(Utc::now()),
        uptime: state.started_at.elapsed().as_secs_f64(),
    })
}

async fn not_found_handler(method: Method, uri: Uri) -> ApiError {
    let path = uri
        .path_and_query()
        .map(|pq| pq.as_str().to_string())
        .unwrap_or_else(|| uri.path().to_string());
    ApiError::NotFound {
        method: method.to_string(),
        path,
    }
}
