//! Error types for the aggregation core and its HTTP surface.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

use crate::types::{Category, SourceAttempt};

/// Failures that propagate out of `Aggregator::aggregate`.
///
/// Per-source failures (timeouts, provider errors, rate limiting) never surface
/// here directly; they show up in `attempts`.
#[derive(Debug, Clone, Error)]
pub enum AggregateError {
    #[error("quality insufficient for {category}: score {score:.2} below threshold {threshold:.2}")]
    QualityInsufficient {
        category: Category,
        score: f64,
        threshold: f64,
        issues: Vec<String>,
        attempts: Vec<SourceAttempt>,
    },

    #[error("no sources available for {category}")]
    NoSourcesAvailable {
        category: Category,
        attempts: Vec<SourceAttempt>,
    },
}

impl AggregateError {
    pub fn code(&self) -> &'static str {
        match self {
            AggregateError::QualityInsufficient { .. } => "QUALITY_INSUFFICIENT",
            AggregateError::NoSourcesAvailable { .. } => "NO_SOURCES_AVAILABLE",
        }
    }

    pub fn issues(&self) -> &[String] {
        match self {
            AggregateError::QualityInsufficient { issues, .. } => issues,
            AggregateError::NoSourcesAvailable { .. } => &[],
        }
    }

    pub fn attempts(&self) -> &[SourceAttempt] {
        match self {
            AggregateError::QualityInsufficient { attempts, .. }
            | AggregateError::NoSourcesAvailable { attempts, .. } => attempts,
        }
    }
}

/// Error returned by a `SourceClient` for a single request.
#[derive(Debug, Error)]
pub enum SourceError {
    /// Non-success HTTP-equivalent status.
    #[error("provider returned status {0}")]
    Status(u16),

    /// Payload arrived but could not be decoded.
    #[error("malformed payload: {0}")]
    Malformed(String),

    /// Connection / transport level problem.
    #[error("transport error: {0}")]
    Transport(String),
}

/// API error type
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("Invalid request: {0}")]
    BadRequest(String),

    #[error(transparent)]
    Aggregate(#[from] AggregateError),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        match self {
            ApiError::BadRequest(msg) => {
                let body = Json(json!({
                    "error": {
                        "code": "BAD_REQUEST",
                        "message": msg,
                    }
                }));
                (StatusCode::BAD_REQUEST, body).into_response()
            }
            ApiError::Aggregate(err) => {
                let status = match err {
                    AggregateError::QualityInsufficient { .. } => StatusCode::UNPROCESSABLE_ENTITY,
                    AggregateError::NoSourcesAvailable { .. } => StatusCode::SERVICE_UNAVAILABLE,
                };
                let body = Json(json!({
                    "error": {
                        "code": err.code(),
                        "message": err.to_string(),
                        "issues": err.issues(),
                        "attempts": err.attempts(),
                    }
                }));
                (status, body).into_response()
            }
        }
    }
}

/// Result type for API handlers
pub type ApiResult<T> = Result<T, ApiError>;
