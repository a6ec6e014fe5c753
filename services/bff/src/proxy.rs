//! Browser-facing API proxy
//!
//! Receives `/api/*` requests from the browser, strips the `/api` prefix and
//! browser-only headers, and forwards through the authenticated client, which
//! attaches the session's bearer token and handles refresh and retry. The
//! upstream response (status, headers, body) is returned verbatim.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

use axum::body::Body;
use axum::http::header::{CONTENT_TYPE, SET_COOKIE};
use axum::http::{HeaderMap, Request, StatusCode};
use axum::response::{IntoResponse, Response};
use gateway::{ApiRequest, Attempt, AuthenticatedClient};
use session_auth::SessionStore;
use tracing::{error, info, instrument, warn};

use crate::metrics::{record_request, record_upstream_error};
use crate::session::{self, CookieSettings};

/// Headers to strip before forwarding (hop-by-hop per RFC 2616 Section 13.5.1)
const HOP_BY_HOP_HEADERS: &[&str] = &[
    "connection",
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "te",
    "trailer",
    "transfer-encoding",
    "upgrade",
];

/// Browser headers that must not reach the upstream. The bearer token comes
/// from the session store, never from the browser.
const BROWSER_ONLY_HEADERS: &[&str] = &["host", "cookie", "authorization", "content-length"];

/// Largest request body accepted from the browser
const MAX_BODY_BYTES: usize = 10 * 1024 * 1024;

/// Shared state for the proxy and auth handlers
#[derive(Clone)]
pub struct GatewayState {
    pub client: Arc<AuthenticatedClient>,
    pub sessions: Arc<dyn SessionStore>,
    pub cookies: CookieSettings,
    pub requests_total: Arc<AtomicU64>,
    pub errors_total: Arc<AtomicU64>,
    pub in_flight: Arc<AtomicU64>,
}

/// Tracks one in-flight request; decrements on drop, including on panic.
pub struct InFlightGuard(Arc<AtomicU64>);

impl InFlightGuard {
    pub fn new(counter: &Arc<AtomicU64>) -> Self {
        counter.fetch_add(1, Ordering::Relaxed);
        Self(Arc::clone(counter))
    }
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::Relaxed);
    }
}

/// JSON error response: {"error":{"type":"gateway_error","message":"...","request_id":"req_..."}}
pub fn error_response(status: StatusCode, message: &str, request_id: &str) -> Response {
    let body = serde_json::json!({
        "error": {
            "type": "gateway_error",
            "message": message,
            "request_id": request_id,
        }
    });
    (status, [(CONTENT_TYPE, "application/json")], body.to_string()).into_response()
}

/// Forward a browser request to the upstream on behalf of its session.
#[instrument(skip_all, fields(request_id = %request_id, method = %request.method(), path = %request.uri().path()))]
pub async fn proxy_request(
    state: &GatewayState,
    request: Request<Body>,
    request_id: String,
) -> Response {
    state.requests_total.fetch_add(1, Ordering::Relaxed);
    let _in_flight = InFlightGuard::new(&state.in_flight);
    let started = Instant::now();

    let method = request.method().clone();
    let endpoint = upstream_endpoint(request.uri());
    let session = session::resolve(request.headers(), &state.sessions);
    let headers = forwarded_headers(request.headers());

    let body = match axum::body::to_bytes(request.into_body(), MAX_BODY_BYTES).await {
        Ok(b) => b,
        Err(e) => {
            state.errors_total.fetch_add(1, Ordering::Relaxed);
            error!(error = %e, "failed to read request body");
            let response = error_response(
                StatusCode::BAD_REQUEST,
                &format!("invalid request body: {e}"),
                &request_id,
            );
            record_request(
                response.status().as_u16(),
                method.as_str(),
                started.elapsed().as_secs_f64(),
            );
            return response;
        }
    };

    let api_request = ApiRequest::new(method.clone(), endpoint)
        .headers(headers)
        .body(body);

    let response = match state.client.request(&session, &api_request).await {
        Ok(upstream) => {
            let mut response = Response::builder().status(upstream.status);
            for (name, value) in &upstream.headers {
                if !is_hop_by_hop(name.as_str()) {
                    response = response.header(name, value);
                }
            }
            if upstream.attempt == Attempt::RefreshFailed {
                info!("session could not be refreshed, expiring browser cookie");
                response = response.header(SET_COOKIE, state.cookies.expire());
            }
            response
                .body(Body::from(upstream.body))
                .unwrap_or_else(|e| {
                    error_response(
                        StatusCode::INTERNAL_SERVER_ERROR,
                        &format!("response build error: {e}"),
                        &request_id,
                    )
                })
        }
        Err(e) => {
            state.errors_total.fetch_add(1, Ordering::Relaxed);
            record_upstream_error(e.kind());
            warn!(error = %e, kind = e.kind(), "upstream call failed");
            error_response(e.status(), &e.to_string(), &request_id)
        }
    };

    record_request(
        response.status().as_u16(),
        method.as_str(),
        started.elapsed().as_secs_f64(),
    );
    response
}

/// Upstream endpoint for a browser URI: `/api/users?id=1` → `/users?id=1`.
fn upstream_endpoint(uri: &axum::http::Uri) -> String {
    let path = uri.path();
    let path = path.strip_prefix("/api").unwrap_or(path);
    let path = if path.is_empty() { "/" } else { path };
    match uri.query() {
        Some(query) => format!("{path}?{query}"),
        None => path.to_string(),
    }
}

/// End-to-end headers safe to send upstream.
fn forwarded_headers(inbound: &HeaderMap) -> HeaderMap {
    let mut headers = HeaderMap::new();
    for (name, value) in inbound {
        if !is_hop_by_hop(name.as_str()) && !is_browser_only(name.as_str()) {
            headers.append(name.clone(), value.clone());
        }
    }
    headers
}

/// Check if a header is hop-by-hop (should be stripped before forwarding)
pub fn is_hop_by_hop(name: &str) -> bool {
    HOP_BY_HOP_HEADERS
        .iter()
        .any(|h| h.eq_ignore_ascii_case(name))
}

fn is_browser_only(name: &str) -> bool {
    BROWSER_ONLY_HEADERS
        .iter()
        .any(|h| h.eq_ignore_ascii_case(name))
}
