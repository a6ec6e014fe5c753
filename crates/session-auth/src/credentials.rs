//! Credential and session identifier types
//!
//! A `Credential` is the access/refresh token pair held server-side for one
//! browser session. Expiry is tracked per token, the way a browser would expire
//! two independent cookies: an expired access token reads as absent while the
//! refresh token may still be usable.

use std::fmt;

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use common::Secret;
use rand::RngExt;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::constants::{REFRESH_TOKEN_TTL_SECS, SESSION_ID_BYTES};
use crate::token::TokenResponse;

/// Current wall clock as unix milliseconds.
pub fn now_millis() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

/// Absolute expiry `secs` seconds after `now` (ms), saturating at `u64::MAX`.
fn expires_at(now: u64, secs: u64) -> u64 {
    now.saturating_add(secs.saturating_mul(1000))
}

/// A session's upstream credentials.
///
/// `access_expires_at` and `refresh_expires_at` are unix timestamps in
/// milliseconds (absolute, not deltas), computed at storage time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credential {
    pub access_token: Secret<String>,
    pub refresh_token: Secret<String>,
    pub access_expires_at: u64,
    pub refresh_expires_at: u64,
}

impl Credential {
    /// Build a fresh credential from a login response.
    ///
    /// Returns `None` when the response carries no refresh token.
    pub fn issue(tokens: TokenResponse, now: u64) -> Option<Self> {
        let refresh = tokens.refresh_token?;
        Some(Self {
            access_token: Secret::new(tokens.access_token),
            refresh_token: Secret::new(refresh),
            access_expires_at: expires_at(now, tokens.expires_in),
            refresh_expires_at: expires_at(now, REFRESH_TOKEN_TTL_SECS),
        })
    }

    /// Apply a refresh response on top of this credential.
    ///
    /// The access token is always replaced. The refresh token (and its 30 day
    /// lifetime) is only reset when the upstream returned a new one.
    pub fn rotated(&self, tokens: TokenResponse, now: u64) -> Self {
        let (refresh_token, refresh_expires_at) = match tokens.refresh_token {
            Some(refresh) => (
                Secret::new(refresh),
                expires_at(now, REFRESH_TOKEN_TTL_SECS),
            ),
            None => (self.refresh_token.clone(), self.refresh_expires_at),
        };
        Self {
            access_token: Secret::new(tokens.access_token),
            refresh_token,
            access_expires_at: expires_at(now, tokens.expires_in),
            refresh_expires_at,
        }
    }

    /// The access token, unless it has expired.
    pub fn access(&self, now: u64) -> Option<&Secret<String>> {
        (self.access_expires_at > now).then_some(&self.access_token)
    }

    /// The refresh token, unless it has expired.
    pub fn refresh(&self, now: u64) -> Option<&Secret<String>> {
        (self.refresh_expires_at > now).then_some(&self.refresh_token)
    }

    /// Both tokens expired; nothing left worth keeping.
    pub fn is_expired(&self, now: u64) -> bool {
        self.access(now).is_none() && self.refresh(now).is_none()
    }
}

/// Opaque browser session identifier carried in the session cookie.
///
/// 32 random bytes, URL-safe base64 without padding (43 characters).
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct SessionId(String);

impl SessionId {
    /// Generate a new random session identifier.
    pub fn generate() -> Self {
        let mut bytes = [0u8; SESSION_ID_BYTES];
        rand::rng().fill(&mut bytes);
        Self(URL_SAFE_NO_PAD.encode(bytes))
    }

    /// Accept a cookie value only if it has the shape of a generated id.
    pub fn parse(value: &str) -> Option<Self> {
        let decoded = URL_SAFE_NO_PAD.decode(value).ok()?;
        (decoded.len() == SESSION_ID_BYTES).then(|| Self(value.to_string()))
    }

    /// Raw value for the session cookie.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Key under which durable backends persist this session.
    ///
    /// `BASE64URL(SHA256(id))`, so a leaked store file does not hand out live
    /// session cookies.
    pub fn storage_key(&self) -> String {
        URL_SAFE_NO_PAD.encode(Sha256::digest(self.0.as_bytes()))
    }
}

// Session ids are bearer material for the browser side; keep them out of logs.
impl fmt::Debug for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SessionId({}…)", &self.0[..6.min(self.0.len())])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const NOW: u64 = 1_735_500_000_000;

    fn login_tokens() -> TokenResponse {
        TokenResponse {
            access_token: "AT1".into(),
            refresh_token: Some("RT1".into()),
            expires_in: 3600,
        }
    }

    #[test]
    fn issue_computes_absolute_expiry() {
        let cred = Credential::issue(login_tokens(), NOW).unwrap();
        assert_eq!(cred.access_token.expose(), "AT1");
        assert_eq!(cred.refresh_token.expose(), "RT1");
        assert_eq!(cred.access_expires_at, NOW + 3_600_000);
        assert_eq!(cred.refresh_expires_at, NOW + 30 * 24 * 3_600_000);
    }

    #[test]
    fn issue_requires_refresh_token() {
        let tokens = TokenResponse {
            access_token: "AT1".into(),
            refresh_token: None,
            expires_in: 3600,
        };
        assert!(Credential::issue(tokens, NOW).is_none());
    }

    #[test]
    fn rotation_without_refresh_token_keeps_old_one() {
        let cred = Credential::issue(login_tokens(), NOW).unwrap();
        let later = NOW + 4_000_000;
        let rotated = cred.rotated(
            TokenResponse {
                access_token: "AT2".into(),
                refresh_token: None,
                expires_in: 3600,
            },
            later,
        );
        assert_eq!(rotated.access_token.expose(), "AT2");
        assert_eq!(rotated.access_expires_at, later + 3_600_000);
        assert_eq!(rotated.refresh_token.expose(), "RT1");
        assert_eq!(rotated.refresh_expires_at, cred.refresh_expires_at);
    }

    #[test]
    fn rotation_with_refresh_token_resets_lifetime() {
        let cred = Credential::issue(login_tokens(), NOW).unwrap();
        let later = NOW + 10_000;
        let rotated = cred.rotated(
            TokenResponse {
                access_token: "AT2".into(),
                refresh_token: Some("RT2".into()),
                expires_in: 60,
            },
            later,
        );
        assert_eq!(rotated.refresh_token.expose(), "RT2");
        assert_eq!(rotated.refresh_expires_at, later + 30 * 24 * 3_600_000);
    }

    #[test]
    fn huge_expires_in_saturates() {
        let tokens = TokenResponse {
            access_token: "AT1".into(),
            refresh_token: Some("RT1".into()),
            expires_in: u64::MAX / 100,
        };
        let cred = Credential::issue(tokens, NOW).unwrap();
        assert_eq!(cred.access_expires_at, u64::MAX);
        assert!(cred.access(NOW).is_some());

        let rotated = cred.rotated(
            TokenResponse {
                access_token: "AT2".into(),
                refresh_token: None,
                expires_in: u64::MAX,
            },
            NOW,
        );
        assert_eq!(rotated.access_expires_at, u64::MAX);
        assert!(rotated.access(NOW + 1).is_some());
    }

    #[test]
    fn expired_access_reads_as_absent() {
        let cred = Credential::issue(login_tokens(), NOW).unwrap();
        let after_access = NOW + 3_600_000;
        assert!(cred.access(NOW).is_some());
        assert!(cred.access(after_access).is_none());
        assert!(cred.refresh(after_access).is_some());
        assert!(!cred.is_expired(after_access));
        assert!(cred.is_expired(cred.refresh_expires_at));
    }

    #[test]
    fn generated_session_ids_are_well_formed_and_unique() {
        let a = SessionId::generate();
        let b = SessionId::generate();
        assert_ne!(a, b, "two session ids must not collide");
        assert_eq!(a.as_str().len(), 43);
        assert!(
            a.as_str()
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
        );
        assert_eq!(SessionId::parse(a.as_str()), Some(a));
    }

    #[test]
    fn parse_rejects_foreign_values() {
        assert!(SessionId::parse("").is_none());
        assert!(SessionId::parse("not a session").is_none());
        assert!(SessionId::parse("c2hvcnQ").is_none());
    }

    #[test]
    fn storage_key_hides_raw_id() {
        let id = SessionId::generate();
        let key = id.storage_key();
        assert_ne!(key, id.as_str());
        assert_eq!(key, id.storage_key(), "storage key must be deterministic");
        assert_eq!(key.len(), 43);
    }

    #[test]
    fn debug_does_not_print_full_id() {
        let id = SessionId::generate();
        let debug = format!("{id:?}");
        assert!(!debug.contains(id.as_str()), "got: {debug}");
    }
}
