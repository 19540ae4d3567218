//! Errors specific to a single upstream dispatch attempt.

use axum::http::StatusCode;

#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    #[error("no active official key available for this channel")]
    NoKeyAvailable,

    #[error("exclusive key not found or disabled")]
    InvalidExclusiveKey,

    #[error("channel not found")]
    ChannelNotFound,

    #[error("unsupported or unmapped model: {0}")]
    UnsupportedModel(String),

    #[error("failed to reach upstream: {0}")]
    Network(#[from] reqwest::Error),

    #[error("upstream returned {status}: {body}")]
    Upstream { status: StatusCode, body: String },

    #[error("failed to translate request/response: {0}")]
    Conversion(String),
}

impl DispatchError {
    pub fn status(&self) -> StatusCode {
        match self {
            DispatchError::NoKeyAvailable => StatusCode::SERVICE_UNAVAILABLE,
            DispatchError::InvalidExclusiveKey => StatusCode::UNAUTHORIZED,
            DispatchError::ChannelNotFound => StatusCode::NOT_FOUND,
            DispatchError::UnsupportedModel(_) => StatusCode::BAD_REQUEST,
            DispatchError::Network(_) => StatusCode::BAD_GATEWAY,
            DispatchError::Upstream { status, .. } => *status,
            DispatchError::Conversion(_) => StatusCode::BAD_REQUEST,
        }
    }

    /// The status code an official key outcome should be recorded under,
    /// distinct from the status returned to the caller: a local network
    /// failure still counts against the key even though we answer 502.
    pub fn key_outcome_status(&self) -> u16 {
        match self {
            DispatchError::Upstream { status, .. } => status.as_u16(),
            DispatchError::Network(_) => 599,
            _ => 0,
        }
    }
}
