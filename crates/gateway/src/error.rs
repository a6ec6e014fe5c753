//! Error taxonomy for authenticated gateway calls

use reqwest::StatusCode;

/// Errors surfaced to callers of the gateway.
///
/// Every variant maps to the HTTP status a route handler should propagate to
/// the browser via [`Error::status`].
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Session store or network unavailable. Not retried by the gateway.
    #[error("infrastructure failure: {0}")]
    Infrastructure(String),

    /// Upstream still answered 401 after a successful refresh and retry.
    #[error("upstream rejected credentials: {0}")]
    Unauthorized(String),

    /// Refresh failed or the session had no refresh credential. The session
    /// has been cleared; the browser must log in again.
    #[error("session expired, re-authentication required: {0}")]
    RefreshExhausted(String),

    /// Any other non-success upstream status.
    #[error("upstream returned {status}: {message}")]
    Upstream { status: u16, message: String },

    /// A nominally successful response whose body was not the expected JSON.
    #[error("malformed upstream response: {0}")]
    MalformedResponse(String),

    /// The caller's payload could not be encoded.
    #[error("invalid request: {0}")]
    InvalidRequest(String),
}

impl Error {
    /// Status code to hand back to the browser for this error.
    pub fn status(&self) -> StatusCode {
        match self {
            Error::Infrastructure(_) => StatusCode::BAD_GATEWAY,
            Error::Unauthorized(_) | Error::RefreshExhausted(_) => StatusCode::UNAUTHORIZED,
            Error::Upstream { status, .. } => {
                StatusCode::from_u16(*status).unwrap_or(StatusCode::BAD_GATEWAY)
            }
            Error::MalformedResponse(_) => StatusCode::BAD_GATEWAY,
            Error::InvalidRequest(_) => StatusCode::BAD_REQUEST,
        }
    }

    /// Short label for metrics and structured error bodies.
    pub fn kind(&self) -> &'static str {
        match self {
            Error::Infrastructure(_) => "infrastructure",
            Error::Unauthorized(_) => "unauthorized",
            Error::RefreshExhausted(_) => "refresh_exhausted",
            Error::Upstream { .. } => "upstream",
            Error::MalformedResponse(_) => "malformed_response",
            Error::InvalidRequest(_) => "invalid_request",
        }
    }
}

impl From<session_auth::Error> for Error {
    fn from(e: session_auth::Error) -> Self {
        Error::Infrastructure(e.to_string())
    }
}

/// Result alias for gateway operations.
pub type Result<T> = std::result::Result<T, Error>;
