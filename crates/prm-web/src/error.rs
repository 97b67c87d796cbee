use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;
use tracing::error;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FieldIssue {
    pub field: String,
    pub message: String,
}

impl FieldIssue {
    pub fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }
}

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("invalid path parameters")]
    InvalidParams(Vec<FieldIssue>),
    #[error("invalid query parameters")]
    InvalidQuery(Vec<FieldIssue>),
    #[error("invalid request body")]
    InvalidBody(Vec<FieldIssue>),
    #[error("{method} {path} not found")]
    NotFound { method: String, path: String },
    #[error("{operation}: {source:#}")]
    Internal {
        operation: &'static str,
        #[source]
        source: anyhow::Error,
    },
}

impl ApiError {
    pub fn internal(operation: &'static str, source: impl Into<anyhow::Error>) -> Self {
        Self::Internal {
            operation,
            source: source.into(),
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            Self::InvalidParams(_) | Self::InvalidQuery(_) | Self::InvalidBody(_) => {
                StatusCode::BAD_REQUEST
            }
            Self::NotFound { .. } => StatusCode::NOT_FOUND,
            Self::Internal { .. } => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    success: bool,
    error: String,
    message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    details: Option<Vec<FieldIssue>>,
}

fn validation_body(error: &str, details: Vec<FieldIssue>) -> ErrorBody {
    ErrorBody {
        success: false,
        error: error.to_string(),
        message: details
            .first()
            .map(|issue| issue.message.clone())
            .unwrap_or_else(|| error.to_string()),
        details: Some(details),
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let body = match self {
            Self::InvalidParams(details) => validation_body("Invalid parameters", details),
            Self::InvalidQuery(details) => validation_body("Invalid query parameters", details),
            Self::InvalidBody(details) => validation_body("Invalid request body", details),
            Self::NotFound { method, path } => ErrorBody {
                success: false,
                error: "Not Found".to_string(),
                message: format!("{method} {path} not found"),
                details: None,
            },
            Self::Internal { operation, source } => {
                error!(operation, error = %format!("{source:#}"), "request failed");
                ErrorBody {
                    success: false,
                    error: operation.to_string(),
                    message: format!("{source:#}"),
                    details: None,
                }
            }
        };
        (status, Json(body)).into_response()
    }
}
