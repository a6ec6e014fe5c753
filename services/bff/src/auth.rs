//! Login and logout routes
//!
//! Login exchanges the browser's email/password for an upstream token pair,
//! stores it under a freshly generated session id, and hands the browser only
//! the session cookie. Any session id the browser already held is discarded,
//! so a pre-login cookie can never be promoted into an authenticated session.

use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::time::Instant;

use axum::body::Bytes;
use axum::http::header::{CONTENT_TYPE, SET_COOKIE};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use common::Secret;
use serde::Deserialize;
use session_auth::{CredentialStore, SessionId};
use tracing::{error, info, instrument, warn};

use crate::metrics::{record_request, record_upstream_error};
use crate::proxy::{GatewayState, InFlightGuard};
use crate::session;

#[derive(Deserialize)]
struct LoginRequest {
    email: String,
    password: Secret<String>,
}

fn json_response(status: StatusCode, body: serde_json::Value) -> Response {
    (status, [(CONTENT_TYPE, "application/json")], body.to_string()).into_response()
}

fn login_failed() -> Response {
    json_response(
        StatusCode::UNAUTHORIZED,
        serde_json::json!({"error": "Login failed"}),
    )
}

fn internal_error() -> Response {
    json_response(
        StatusCode::INTERNAL_SERVER_ERROR,
        serde_json::json!({"error": "Internal server error"}),
    )
}

/// `POST /api/passport/login`
#[instrument(skip_all, fields(request_id = %request_id))]
pub async fn login(
    state: &GatewayState,
    headers: &HeaderMap,
    body: Bytes,
    request_id: String,
) -> Response {
    state.requests_total.fetch_add(1, Ordering::Relaxed);
    let _in_flight = InFlightGuard::new(&state.in_flight);
    let started = Instant::now();

    let response = match serde_json::from_slice::<LoginRequest>(&body) {
        Ok(credentials) => perform_login(state, headers, credentials).await,
        Err(e) => {
            warn!(error = %e, "rejecting malformed login body");
            json_response(
                StatusCode::BAD_REQUEST,
                serde_json::json!({"error": "Invalid request body"}),
            )
        }
    };

    if !response.status().is_success() {
        state.errors_total.fetch_add(1, Ordering::Relaxed);
    }
    record_request(
        response.status().as_u16(),
        "POST",
        started.elapsed().as_secs_f64(),
    );
    response
}

async fn perform_login(
    state: &GatewayState,
    headers: &HeaderMap,
    credentials: LoginRequest,
) -> Response {
    if let Some(previous) = session::session_id(headers) {
        let previous = CredentialStore::new(previous, Arc::clone(&state.sessions));
        if let Err(e) = previous.clear().await {
            warn!(error = %e, "failed to discard previous session");
        }
    }

    let id = SessionId::generate();
    let store = CredentialStore::new(id.clone(), Arc::clone(&state.sessions));

    match state
        .client
        .login(&store, &credentials.email, credentials.password.expose())
        .await
    {
        Ok(()) => {
            info!("login succeeded, issuing session cookie");
            let mut response =
                json_response(StatusCode::OK, serde_json::json!({"success": true}));
            response
                .headers_mut()
                .insert(SET_COOKIE, state.cookies.issue(&id));
            response
        }
        Err(gateway::Error::Upstream { status, message }) => {
            info!(status, reason = %message, "upstream rejected login");
            login_failed()
        }
        Err(e) => {
            record_upstream_error(e.kind());
            error!(error = %e, "login failed");
            internal_error()
        }
    }
}

/// `POST /api/passport/logout`
#[instrument(skip_all, fields(request_id = %request_id))]
pub async fn logout(state: &GatewayState, headers: &HeaderMap, request_id: String) -> Response {
    state.requests_total.fetch_add(1, Ordering::Relaxed);
    let _in_flight = InFlightGuard::new(&state.in_flight);
    let started = Instant::now();

    let result = match session::session_id(headers) {
        Some(id) => {
            let store = CredentialStore::new(id, Arc::clone(&state.sessions));
            state.client.logout(&store).await
        }
        None => Ok(()),
    };

    let response = match result {
        Ok(()) => {
            let mut response = StatusCode::NO_CONTENT.into_response();
            response
                .headers_mut()
                .insert(SET_COOKIE, state.cookies.expire());
            response
        }
        Err(e) => {
            state.errors_total.fetch_add(1, Ordering::Relaxed);
            error!(error = %e, "logout failed");
            internal_error()
        }
    };

    record_request(
        response.status().as_u16(),
        "POST",
        started.elapsed().as_secs_f64(),
    );
    response
}
