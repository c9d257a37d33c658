//! Stable error taxonomy for the request pipeline (see spec §7).
//!
//! Every failure that can reach a client is funneled through [`ServerError`],
//! which carries a stable `code` string alongside the HTTP status it maps to.
//! Internal components (resolver, cache, transform, single-flight) return
//! their own native errors; the pipeline is the single place that converts
//! them into this taxonomy.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

#[derive(Error, Debug, Clone)]
pub enum ServerError {
    #[error("transform failed: {0}")]
    Processing(String),

    #[error("source image unreadable: {0}")]
    CorruptedSource(String),

    #[error("unsupported format: {0}")]
    UnsupportedFormat(String),

    #[error("request timed out")]
    Timeout,

    #[error("validation error: {0}")]
    Validation(String),
}

impl ServerError {
    pub fn code(&self) -> &'static str {
        match self {
            ServerError::Processing(_) => "PROCESSING_ERROR",
            ServerError::CorruptedSource(_) => "CORRUPTED_SOURCE",
            ServerError::UnsupportedFormat(_) => "UNSUPPORTED_FORMAT",
            ServerError::Timeout => "TIMEOUT",
            ServerError::Validation(_) => "VALIDATION_ERROR",
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            ServerError::Processing(_) => StatusCode::INTERNAL_SERVER_ERROR,
            ServerError::CorruptedSource(_) => StatusCode::UNPROCESSABLE_ENTITY,
            ServerError::UnsupportedFormat(_) => StatusCode::UNSUPPORTED_MEDIA_TYPE,
            ServerError::Timeout => StatusCode::GATEWAY_TIMEOUT,
            ServerError::Validation(_) => StatusCode::BAD_REQUEST,
        }
    }
}

impl IntoResponse for ServerError {
    fn into_response(self) -> Response {
        let status = self.status();
        let body = Json(json!({
            "error": {
                "code": self.code(),
                "message": self.to_string(),
            }
        }));
        (status, body).into_response()
    }
}
