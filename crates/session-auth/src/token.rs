//! Upstream login and token refresh
//!
//! Handles the two token endpoint interactions:
//! 1. Password login (initial session creation)
//! 2. Token refresh (request-time, after the upstream rejects an access token)
//!
//! Both operations POST JSON to paths under the configured API base.

use serde::{Deserialize, Serialize};

use crate::constants::{LOGIN_PATH, REFRESH_PATH};
use crate::error::{Error, Result};

/// Response from the login and refresh endpoints.
///
/// `expires_in` is a delta in seconds from the response time. The refresh
/// endpoint may omit `refresh_token`, in which case the stored one is kept.
#[derive(Debug, Deserialize, Serialize)]
pub struct TokenResponse {
    pub access_token: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
    /// Seconds until the access token expires (delta, not absolute)
    pub expires_in: u64,
}

#[derive(Serialize)]
struct LoginRequest<'a> {
    email: &'a str,
    password: &'a str,
}

#[derive(Serialize)]
struct RefreshRequest<'a> {
    refresh_token: &'a str,
}

/// Join the API base and an endpoint path without doubling slashes.
pub fn endpoint_url(api_base: &str, path: &str) -> String {
    format!("{}{}", api_base.trim_end_matches('/'), path)
}

/// Exchange an email/password pair for a token pair.
///
/// The login response must carry a refresh token; a session without one could
/// never recover from access token expiry.
pub async fn login(
    client: &reqwest::Client,
    api_base: &str,
    email: &str,
    password: &str,
) -> Result<TokenResponse> {
    let response = client
        .post(endpoint_url(api_base, LOGIN_PATH))
        .json(&LoginRequest { email, password })
        .send()
        .await
        .map_err(|e| Error::Http(format!("login request failed: {e}")))?;

    let tokens = parse_token_response(response, "login").await?;
    if tokens.refresh_token.is_none() {
        return Err(Error::TokenExchange(
            "login response did not include a refresh token".into(),
        ));
    }
    Ok(tokens)
}

/// Exchange a refresh token for a new access token.
pub async fn refresh_token(
    client: &reqwest::Client,
    api_base: &str,
    refresh: &str,
) -> Result<TokenResponse> {
    let response = client
        .post(endpoint_url(api_base, REFRESH_PATH))
        .json(&RefreshRequest {
            refresh_token: refresh,
        })
        .send()
        .await
        .map_err(|e| Error::Http(format!("token refresh request failed: {e}")))?;

    parse_token_response(response, "refresh").await
}

async fn parse_token_response(response: reqwest::Response, op: &str) -> Result<TokenResponse> {
    let status = response.status();
    if !status.is_success() {
        let body = response
            .text()
            .await
            .unwrap_or_else(|_| String::from("<no body>"));

        // 401/403 means the credentials or refresh token are revoked or invalid
        if status.as_u16() == 401 || status.as_u16() == 403 {
            return Err(Error::InvalidCredentials(format!(
                "{op} rejected ({status}): {body}"
            )));
        }

        return Err(Error::TokenExchange(format!(
            "{op} returned {status}: {body}"
        )));
    }

    response
        .json::<TokenResponse>()
        .await
        .map_err(|e| Error::TokenExchange(format!("invalid {op} response: {e}")))
}
