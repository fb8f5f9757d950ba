//! Gateway error taxonomy.
//!
//! Admission-layer errors are terminal and produced before any network call.
//! Reconciliation failures fail closed into `DuplicateUsername`; fetch
//! failures after exhausting retries surface as `UpstreamUnavailable`.

use axum::http::StatusCode;

#[derive(Debug, thiserror::Error)]
pub enum GateError {
    #[error("client temporarily banned")]
    Banned { until_ms: u64 },

    #[error("too many requests, client temporarily banned")]
    RateLimited { until_ms: u64 },

    #[error("cooldown active")]
    CooldownActive { until_ms: u64, remaining_ms: u64 },

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("username already exists")]
    DuplicateUsername,

    #[error("upstream unavailable: {0}")]
    UpstreamUnavailable(String),

    #[error("upstream rejected the request: {0}")]
    UpstreamRejected(String),

    #[error("internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl GateError {
    #[must_use]
    pub const fn status_code(&self) -> StatusCode {
        match self {
            Self::Banned { .. } => StatusCode::FORBIDDEN,
            Self::RateLimited { .. } | Self::CooldownActive { .. } => {
                StatusCode::TOO_MANY_REQUESTS
            }
            Self::InvalidInput(_) => StatusCode::BAD_REQUEST,
            Self::DuplicateUsername => StatusCode::CONFLICT,
            Self::UpstreamUnavailable(_) | Self::UpstreamRejected(_) => StatusCode::BAD_GATEWAY,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Stable machine-readable slug for response bodies and logs.
    #[must_use]
    pub const fn reason(&self) -> &'static str {
        match self {
            Self::Banned { .. } => "banned",
            Self::RateLimited { .. } => "rate_limited",
            Self::CooldownActive { .. } => "cooldown_active",
            Self::InvalidInput(_) => "invalid_input",
            Self::DuplicateUsername => "duplicate_username",
            Self::UpstreamUnavailable(_) => "upstream_unavailable",
            Self::UpstreamRejected(_) => "upstream_rejected",
            Self::Internal(_) => "internal_error",
        }
    }

    /// Epoch-millis timestamp at which the restriction lifts, where one exists.
    #[must_use]
    pub const fn lifts_at_ms(&self) -> Option<u64> {
        match self {
            Self::Banned { until_ms }
            | Self::RateLimited { until_ms }
            | Self::CooldownActive { until_ms, .. } => Some(*until_ms),
            _ => None,
        }
    }
}
