//! Authenticated upstream calls with one-shot refresh and retry
//!
//! Per logical call:
//!
//! ```text
//! INITIAL --(401)--> REFRESHING --(new token)--> RETRIED   (terminal)
//!                    REFRESHING --(absent)-----> FAILED    (terminal, original 401)
//! INITIAL --(anything else)--> DONE                        (terminal)
//! ```
//!
//! A call is retried at most once, so the worst case is three upstream requests:
//! the original, the refresh, and the retry. A 401 on the retry is returned
//! verbatim.

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use common::Secret;
use reqwest::header::{AUTHORIZATION, CONTENT_TYPE, HeaderMap, HeaderValue};
use reqwest::{Method, StatusCode};
use session_auth::{Credential, CredentialStore, endpoint_url, now_millis};
use tracing::{debug, info, instrument, warn};

use crate::error::{Error, Result};
use crate::refresh::RefreshCoordinator;

/// A request against the upstream API. Bodies are opaque bytes.
#[derive(Debug, Clone)]
pub struct ApiRequest {
    pub method: Method,
    /// Path (and optional query) appended to the API base, e.g. `/profile?x=1`
    pub endpoint: String,
    pub body: Option<Bytes>,
    pub headers: HeaderMap,
}

impl ApiRequest {
    pub fn new(method: Method, endpoint: impl Into<String>) -> Self {
        Self {
            method,
            endpoint: endpoint.into(),
            body: None,
            headers: HeaderMap::new(),
        }
    }

    /// Attach a JSON-encoded body.
    pub fn json<T: serde::Serialize + ?Sized>(mut self, data: &T) -> Result<Self> {
        let body = serde_json::to_vec(data)
            .map_err(|e| Error::InvalidRequest(format!("encoding request body: {e}")))?;
        self.body = Some(Bytes::from(body));
        Ok(self)
    }

    pub fn body(mut self, body: Bytes) -> Self {
        self.body = (!body.is_empty()).then_some(body);
        self
    }

    pub fn headers(mut self, headers: HeaderMap) -> Self {
        self.headers = headers;
        self
    }
}

/// Terminal state of a logical call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Attempt {
    /// First response returned as-is (not a 401)
    Initial,
    /// Refreshed and retried once; this is the retry's response
    Retried,
    /// Got a 401 and no new token could be obtained; this is the original 401
    RefreshFailed,
}

/// Raw upstream response, body fully buffered.
#[derive(Debug, Clone)]
pub struct UpstreamResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Bytes,
    pub attempt: Attempt,
}

/// Issues upstream calls on behalf of a browser session.
pub struct AuthenticatedClient {
    http: reqwest::Client,
    api_base: String,
    timeout: Duration,
    coordinator: Arc<RefreshCoordinator>,
}

impl AuthenticatedClient {
    pub fn new(
        http: reqwest::Client,
        api_base: impl Into<String>,
        timeout: Duration,
        coordinator: Arc<RefreshCoordinator>,
    ) -> Self {
        Self {
            http,
            api_base: api_base.into(),
            timeout,
            coordinator,
        }
    }

    pub fn coordinator(&self) -> &RefreshCoordinator {
        &self.coordinator
    }

    /// Perform one logical call for the session behind `store`.
    ///
    /// A missing credential is not an error; the call goes out without an
    /// Authorization header and the upstream decides.
    #[instrument(skip_all, fields(method = %request.method, endpoint = %request.endpoint))]
    pub async fn request(
        &self,
        store: &CredentialStore,
        request: &ApiRequest,
    ) -> Result<UpstreamResponse> {
        let access = store
            .read()
            .await?
            .and_then(|cred| cred.access(now_millis()).cloned());

        let first = self.send(request, access.as_ref()).await?;
        if first.status != StatusCode::UNAUTHORIZED {
            return Ok(first);
        }

        info!("upstream rejected access token, refreshing");
        match self.coordinator.refresh(store).await? {
            Some(renewed) => {
                debug!("retrying with refreshed access token");
                let mut retried = self.send(request, Some(&renewed)).await?;
                retried.attempt = Attempt::Retried;
                if retried.status == StatusCode::UNAUTHORIZED {
                    warn!("upstream rejected refreshed access token");
                }
                Ok(retried)
            }
            None => Ok(UpstreamResponse {
                attempt: Attempt::RefreshFailed,
                ..first
            }),
        }
    }

    /// Log in upstream and store the resulting credential in `store`.
    pub async fn login(&self, store: &CredentialStore, email: &str, password: &str) -> Result<()> {
        let tokens = session_auth::login(&self.http, &self.api_base, email, password)
            .await
            .map_err(|e| match e {
                session_auth::Error::InvalidCredentials(msg)
                | session_auth::Error::TokenExchange(msg) => Error::Upstream {
                    status: StatusCode::UNAUTHORIZED.as_u16(),
                    message: msg,
                },
                other => Error::Infrastructure(other.to_string()),
            })?;

        let credential = Credential::issue(tokens, now_millis()).ok_or_else(|| {
            Error::MalformedResponse("login response without refresh token".into())
        })?;
        store.write(credential).await?;
        info!("session logged in");
        Ok(())
    }

    /// Drop the session's credential.
    pub async fn logout(&self, store: &CredentialStore) -> Result<()> {
        store.clear().await?;
        info!("session logged out");
        Ok(())
    }

    async fn send(
        &self,
        request: &ApiRequest,
        access: Option<&Secret<String>>,
    ) -> Result<UpstreamResponse> {
        let mut headers = request.headers.clone();
        if request.body.is_some() && !headers.contains_key(CONTENT_TYPE) {
            headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        }
        if let Some(token) = access {
            let mut value = HeaderValue::from_str(&format!("Bearer {}", token.expose()))
                .map_err(|e| Error::Infrastructure(format!("invalid access token value: {e}")))?;
            value.set_sensitive(true);
            headers.insert(AUTHORIZATION, value);
        }

        let mut builder = self
            .http
            .request(
                request.method.clone(),
                endpoint_url(&self.api_base, &request.endpoint),
            )
            .headers(headers)
            .timeout(self.timeout);
        if let Some(body) = &request.body {
            builder = builder.body(body.clone());
        }

        let response = builder
            .send()
            .await
            .map_err(|e| Error::Infrastructure(format!("upstream request failed: {e}")))?;

        let status = response.status();
        let headers = response.headers().clone();
        let body = response
            .bytes()
            .await
            .map_err(|e| Error::Infrastructure(format!("reading upstream response: {e}")))?;

        debug!(status = status.as_u16(), "upstream responded");
        Ok(UpstreamResponse {
            status,
            headers,
            body,
            attempt: Attempt::Initial,
        })
    }
}
