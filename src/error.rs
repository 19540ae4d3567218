//! Crate-wide error type for everything above the dispatch boundary.
//!
//! `GatewayError` covers ingress-facing failures (bad request, auth, storage);
//! failures specific to talking to an upstream provider live in
//! [`crate::dispatcher::error::DispatchError`] and get folded into this type
//! at the dispatcher/server seam.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;

#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    #[error("invalid request: {0}")]
    BadRequest(String),

    #[error("authentication failed: {0}")]
    Unauthorized(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("upstream dispatch failed: {0}")]
    Dispatch(#[from] crate::dispatcher::error::DispatchError),

    #[error("storage error: {0}")]
    Storage(#[from] rusqlite::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),
}

impl GatewayError {
    fn status(&self) -> StatusCode {
        match self {
            GatewayError::BadRequest(_) => StatusCode::BAD_REQUEST,
            GatewayError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            GatewayError::NotFound(_) => StatusCode::NOT_FOUND,
            GatewayError::Dispatch(e) => e.status(),
            GatewayError::Storage(_) | GatewayError::Io(_) | GatewayError::Serde(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

impl IntoResponse for GatewayError {
    fn into_response(self) -> Response {
        let status = self.status();
        if let GatewayError::Dispatch(dispatch_err) = &self {
            crate::logger::error("gateway", &format!("dispatch failed: {dispatch_err}"));
            return crate::error_mapper::openai_error_response(status, &dispatch_err.to_string());
        }
        crate::logger::error("gateway", &self.to_string());
        let body = json!({
            "error": {
                "message": self.to_string(),
                "type": "api_error",
                "param": null,
                "code": null,
            }
        });
        (status, Json(body)).into_response()
    }
}

pub type Result<T> = std::result::Result<T, GatewayError>;
