//! Error types for session and token operations

/// Errors from session storage and upstream token calls.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("HTTP request failed: {0}")]
    Http(String),

    #[error("token exchange failed: {0}")]
    TokenExchange(String),

    #[error("invalid credentials: {0}")]
    InvalidCredentials(String),

    #[error("credential parse error: {0}")]
    CredentialParse(String),

    #[error("session store unavailable: {0}")]
    Store(String),
}

impl Error {
    /// Whether the failure came from the session store rather than upstream.
    pub fn is_store(&self) -> bool {
        matches!(self, Error::Store(_) | Error::CredentialParse(_))
    }
}

/// Result alias for session operations.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn store_errors_are_classified() {
        assert!(Error::Store("disk full".into()).is_store());
        assert!(Error::CredentialParse("bad json".into()).is_store());
        assert!(!Error::Http("connection refused".into()).is_store());
        assert!(!Error::InvalidCredentials("401".into()).is_store());
    }
}
