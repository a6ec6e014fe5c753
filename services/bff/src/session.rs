//! Session cookie handling
//!
//! The browser only ever sees an opaque session id; the token pair stays in
//! the server-side store. The cookie is `HttpOnly`, `SameSite=Lax`, scoped to
//! `/`, lives as long as the refresh token, and is `Secure` unless disabled
//! for local development.

use std::sync::Arc;

use axum::http::header::COOKIE;
use axum::http::{HeaderMap, HeaderValue};
use session_auth::{CredentialStore, REFRESH_TOKEN_TTL_SECS, SESSION_COOKIE, SessionId, SessionStore};

/// Cookie attributes shared by every Set-Cookie the gateway emits.
#[derive(Debug, Clone, Copy)]
pub struct CookieSettings {
    pub secure: bool,
}

impl CookieSettings {
    /// Set-Cookie value binding the browser to `id`.
    pub fn issue(&self, id: &SessionId) -> HeaderValue {
        self.build(id.as_str(), REFRESH_TOKEN_TTL_SECS)
    }

    /// Set-Cookie value that makes the browser drop its session cookie.
    pub fn expire(&self) -> HeaderValue {
        self.build("", 0)
    }

    fn build(&self, value: &str, max_age: u64) -> HeaderValue {
        let mut cookie =
            format!("{SESSION_COOKIE}={value}; Path=/; Max-Age={max_age}; HttpOnly; SameSite=Lax");
        if self.secure {
            cookie.push_str("; Secure");
        }
        // Session ids are URL-safe base64, so the value is always visible ASCII
        HeaderValue::from_str(&cookie).unwrap_or_else(|_| HeaderValue::from_static(""))
    }
}

/// Session id from the request's `Cookie` header(s), if present and well-formed.
///
/// A forged or truncated value is treated as no session at all.
pub fn session_id(headers: &HeaderMap) -> Option<SessionId> {
    headers
        .get_all(COOKIE)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|value| value.split(';'))
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(name, _)| *name == SESSION_COOKIE)
        .and_then(|(_, value)| SessionId::parse(value.trim()))
}

/// Credential handle for the request's session.
///
/// Requests without a valid cookie get a throwaway session: reads find
/// nothing, so upstream calls go out unauthenticated.
pub fn resolve(headers: &HeaderMap, backend: &Arc<dyn SessionStore>) -> CredentialStore {
    let id = session_id(headers).unwrap_or_else(SessionId::generate);
    CredentialStore::new(id, Arc::clone(backend))
}
