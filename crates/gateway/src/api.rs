//! Convenience API for server-side callers
//!
//! Wraps `AuthenticatedClient` + `translate` behind verb helpers. Callers pass
//! the session explicitly; nothing is looked up from ambient request state.

use std::sync::Arc;

use reqwest::Method;
use reqwest::header::HeaderMap;
use serde::Serialize;
use serde::de::DeserializeOwned;
use session_auth::CredentialStore;

use crate::client::{ApiRequest, AuthenticatedClient, UpstreamResponse};
use crate::error::Result;
use crate::translate::translate;

/// Per-call options.
#[derive(Debug, Clone, Default)]
pub struct RequestOptions {
    /// Extra headers merged into the upstream request
    pub headers: HeaderMap,
}

#[derive(Clone)]
pub struct ServerApi {
    client: Arc<AuthenticatedClient>,
}

impl ServerApi {
    pub fn new(client: Arc<AuthenticatedClient>) -> Self {
        Self { client }
    }

    pub async fn get<T: DeserializeOwned>(
        &self,
        session: &CredentialStore,
        endpoint: &str,
        options: RequestOptions,
    ) -> Result<Option<T>> {
        self.call(session, Method::GET, endpoint, None::<&()>, options)
            .await
    }

    pub async fn post<T: DeserializeOwned, D: Serialize + ?Sized>(
        &self,
        session: &CredentialStore,
        endpoint: &str,
        data: &D,
        options: RequestOptions,
    ) -> Result<Option<T>> {
        self.call(session, Method::POST, endpoint, Some(data), options)
            .await
    }

    pub async fn put<T: DeserializeOwned, D: Serialize + ?Sized>(
        &self,
        session: &CredentialStore,
        endpoint: &str,
        data: &D,
        options: RequestOptions,
    ) -> Result<Option<T>> {
        self.call(session, Method::PUT, endpoint, Some(data), options)
            .await
    }

    pub async fn delete<T: DeserializeOwned>(
        &self,
        session: &CredentialStore,
        endpoint: &str,
        options: RequestOptions,
    ) -> Result<Option<T>> {
        self.call(session, Method::DELETE, endpoint, None::<&()>, options)
            .await
    }

    /// Escape hatch: the untranslated response, for callers that need the
    /// original status code and headers.
    pub async fn raw(
        &self,
        session: &CredentialStore,
        request: &ApiRequest,
    ) -> Result<UpstreamResponse> {
        self.client.request(session, request).await
    }

    async fn call<T: DeserializeOwned, D: Serialize + ?Sized>(
        &self,
        session: &CredentialStore,
        method: Method,
        endpoint: &str,
        data: Option<&D>,
        options: RequestOptions,
    ) -> Result<Option<T>> {
        let mut request = ApiRequest::new(method, endpoint).headers(options.headers);
        if let Some(data) = data {
            request = request.json(data)?;
        }
        let response = self.client.request(session, &request).await?;
        translate(response)
    }
}
