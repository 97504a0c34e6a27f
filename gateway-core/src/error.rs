use http::StatusCode;
use serde::Serialize;
use thiserror::Error;

/// Unified error taxonomy for the dataplane pipeline (spec §7).
///
/// Every variant maps to exactly one HTTP status and one stable `code`
/// string used in the error envelope (§6). Secret material must never
/// be interpolated into a variant's message.
#[derive(Error, Debug)]
pub enum GatewayError {
    #[error("authentication required")]
    Unauthenticated,

    #[error("access denied: {0}")]
    Forbidden(String),

    #[error("no configuration resolved for this route")]
    ConfigNotFound,

    #[error("validation failed: {0}")]
    ValidationFailed(String),

    #[error("request exceeds the configured size limit")]
    RequestTooLarge,

    #[error("rate limit exceeded, retry after {retry_after_s}s")]
    RateLimited { retry_after_s: u64 },

    #[error("quota exceeded, retry after {retry_after_s}s")]
    QuotaExceeded { retry_after_s: u64 },

    #[error("upstream host is not permitted: {0}")]
    SsrfBlocked(String),

    #[error("upstream request timed out")]
    UpstreamTimeout,

    #[error("upstream unavailable: {0}")]
    UpstreamUnavailable(String),

    #[error("circuit open for connector {0}, retry after cooldown")]
    CircuitOpen(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl GatewayError {
    /// HTTP status per spec §7.
    pub fn status_code(&self) -> StatusCode {
        match self {
            GatewayError::Unauthenticated => StatusCode::UNAUTHORIZED,
            GatewayError::Forbidden(_) => StatusCode::FORBIDDEN,
            GatewayError::ConfigNotFound => StatusCode::NOT_FOUND,
            GatewayError::ValidationFailed(_) => StatusCode::BAD_REQUEST,
            GatewayError::RequestTooLarge => StatusCode::PAYLOAD_TOO_LARGE,
            GatewayError::RateLimited { .. } | GatewayError::QuotaExceeded { .. } => {
                StatusCode::TOO_MANY_REQUESTS
            }
            GatewayError::SsrfBlocked(_) => StatusCode::FORBIDDEN,
            GatewayError::UpstreamTimeout => StatusCode::GATEWAY_TIMEOUT,
            GatewayError::UpstreamUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            GatewayError::CircuitOpen(_) => StatusCode::SERVICE_UNAVAILABLE,
            GatewayError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Stable machine-readable code, matching the `Kind` column of spec §7.
    pub fn code(&self) -> &'static str {
        match self {
            GatewayError::Unauthenticated => "UNAUTHENTICATED",
            GatewayError::Forbidden(_) => "FORBIDDEN",
            GatewayError::ConfigNotFound => "CONFIG_NOT_FOUND",
            GatewayError::ValidationFailed(_) => "VALIDATION_FAILED",
            GatewayError::RequestTooLarge => "REQUEST_TOO_LARGE",
            GatewayError::RateLimited { .. } => "RATE_LIMITED",
            GatewayError::QuotaExceeded { .. } => "QUOTA_EXCEEDED",
            GatewayError::SsrfBlocked(_) => "SSRF_BLOCKED",
            GatewayError::UpstreamTimeout => "UPSTREAM_TIMEOUT",
            GatewayError::UpstreamUnavailable(_) => "UPSTREAM_UNAVAILABLE",
            GatewayError::CircuitOpen(_) => "CIRCUIT_OPEN",
            GatewayError::Internal(_) => "INTERNAL",
        }
    }

    /// Does a dispatch failure of this kind count as a circuit-breaker failure?
    /// SSRF rejections never reach the dispatch, so they must not count (spec §4.6).
    pub fn counts_as_breaker_failure(&self) -> bool {
        matches!(
            self,
            GatewayError::UpstreamTimeout | GatewayError::UpstreamUnavailable(_)
        )
    }

    pub fn retry_after_s(&self) -> Option<u64> {
        match self {
            GatewayError::RateLimited { retry_after_s } => Some(*retry_after_s),
            GatewayError::QuotaExceeded { retry_after_s } => Some(*retry_after_s),
            _ => None,
        }
    }

    /// Render the §6 error envelope. Never includes secret material: callers
    /// must ensure messages passed into variants are already safe to surface.
    pub fn to_envelope(&self) -> ErrorEnvelope {
        ErrorEnvelope {
            success: false,
            error: ErrorBody {
                code: self.code(),
                message: match self {
                    GatewayError::Internal(_) => "an internal error occurred".to_string(),
                    other => other.to_string(),
                },
            },
            meta: Meta {
                timestamp: chrono::Utc::now().to_rfc3339(),
            },
        }
    }
}

#[derive(Debug, Serialize)]
pub struct ErrorEnvelope {
    pub success: bool,
    pub error: ErrorBody,
    pub meta: Meta,
}

#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub code: &'static str,
    pub message: String,
}

#[derive(Debug, Serialize)]
pub struct Meta {
    pub timestamp: String,
}
