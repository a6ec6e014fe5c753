//! Scripted upstream API for gateway tests
//!
//! Binds an axum router on `127.0.0.1:0` that behaves like the upstream auth
//! API: login, refresh, and bearer-protected resources. Only tokens the mock
//! has issued (or that a test explicitly accepts) are honoured.

use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::Json;
use axum::body::Body;
use axum::extract::State;
use axum::http::{HeaderMap, Request, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::post;
use common::Secret;
use session_auth::{Credential, CredentialStore, MemoryStore, SessionId, now_millis};
use tokio::net::TcpListener;

/// How the mock answers `POST /auth/refresh`.
#[derive(Debug, Clone, Copy)]
pub enum RefreshBehavior {
    /// New access token, no new refresh token
    Renew,
    /// New access and refresh tokens
    Rotate,
    /// 500 Internal Server Error
    Fail,
    /// 401, refresh token revoked
    Reject,
    /// Never answers
    Hang,
}

pub struct MockState {
    behavior: RefreshBehavior,
    refresh_delay: Duration,
    refresh_calls: AtomicUsize,
    resource_calls: AtomicUsize,
    valid: Mutex<HashSet<String>>,
    seen_auth: Mutex<Vec<Option<String>>>,
    seen_refresh_tokens: Mutex<Vec<String>>,
}

pub struct MockUpstream {
    pub base: String,
    state: Arc<MockState>,
}

impl MockUpstream {
    pub async fn start(behavior: RefreshBehavior) -> Self {
        Self::start_with_delay(behavior, Duration::ZERO).await
    }

    pub async fn start_with_delay(behavior: RefreshBehavior, refresh_delay: Duration) -> Self {
        let state = Arc::new(MockState {
            behavior,
            refresh_delay,
            refresh_calls: AtomicUsize::new(0),
            resource_calls: AtomicUsize::new(0),
            valid: Mutex::new(HashSet::new()),
            seen_auth: Mutex::new(Vec::new()),
            seen_refresh_tokens: Mutex::new(Vec::new()),
        });

        let app = axum::Router::new()
            .route("/passport/login", post(login))
            .route("/auth/refresh", post(refresh))
            .fallback(resource)
            .with_state(state.clone());

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        Self {
            base: format!("http://{addr}"),
            state,
        }
    }

    /// Treat `token` as a valid access token.
    pub fn accept(&self, token: &str) {
        self.state.valid.lock().unwrap().insert(token.to_string());
    }

    /// Stop honouring `token`, as if it had expired upstream.
    pub fn revoke(&self, token: &str) {
        self.state.valid.lock().unwrap().remove(token);
    }

    pub fn refresh_calls(&self) -> usize {
        self.state.refresh_calls.load(Ordering::SeqCst)
    }

    pub fn resource_calls(&self) -> usize {
        self.state.resource_calls.load(Ordering::SeqCst)
    }

    /// Authorization headers seen on resource calls, in arrival order.
    pub fn seen_auth(&self) -> Vec<Option<String>> {
        self.state.seen_auth.lock().unwrap().clone()
    }

    /// Refresh tokens presented to `/auth/refresh`, in arrival order.
    pub fn seen_refresh_tokens(&self) -> Vec<String> {
        self.state.seen_refresh_tokens.lock().unwrap().clone()
    }
}

/// A session holding `access`/`refresh`, both valid for an hour.
pub async fn session_with(access: &str, refresh: &str) -> CredentialStore {
    let store = empty_session();
    let now = now_millis();
    store
        .write(Credential {
            access_token: Secret::new(access.to_string()),
            refresh_token: Secret::new(refresh.to_string()),
            access_expires_at: now + 3_600_000,
            refresh_expires_at: now + 7_200_000,
        })
        .await
        .unwrap();
    store
}

pub fn empty_session() -> CredentialStore {
    CredentialStore::new(SessionId::generate(), Arc::new(MemoryStore::new()))
}

async fn login(
    State(state): State<Arc<MockState>>,
    Json(body): Json<serde_json::Value>,
) -> Response {
    if body["email"] == "a@b.com" && body["password"] == "x" {
        state.valid.lock().unwrap().insert("AT1".into());
        Json(serde_json::json!({
            "access_token": "AT1",
            "refresh_token": "RT1",
            "expires_in": 3600
        }))
        .into_response()
    } else {
        (
            StatusCode::UNAUTHORIZED,
            Json(serde_json::json!({"message": "invalid email or password"})),
        )
            .into_response()
    }
}

async fn refresh(
    State(state): State<Arc<MockState>>,
    Json(body): Json<serde_json::Value>,
) -> Response {
    let n = state.refresh_calls.fetch_add(1, Ordering::SeqCst) + 1;
    state
        .seen_refresh_tokens
        .lock()
        .unwrap()
        .push(body["refresh_token"].as_str().unwrap_or_default().to_string());

    if !state.refresh_delay.is_zero() {
        tokio::time::sleep(state.refresh_delay).await;
    }

    let access = format!("AT{}", n + 1);
    match state.behavior {
        RefreshBehavior::Renew => {
            state.valid.lock().unwrap().insert(access.clone());
            Json(serde_json::json!({"access_token": access, "expires_in": 3600})).into_response()
        }
        RefreshBehavior::Rotate => {
            state.valid.lock().unwrap().insert(access.clone());
            Json(serde_json::json!({
                "access_token": access,
                "refresh_token": format!("RT{}", n + 1),
                "expires_in": 3600
            }))
            .into_response()
        }
        RefreshBehavior::Fail => (StatusCode::INTERNAL_SERVER_ERROR, "refresh backend down").into_response(),
        RefreshBehavior::Reject => (StatusCode::UNAUTHORIZED, "refresh token revoked").into_response(),
        RefreshBehavior::Hang => {
            std::future::pending::<()>().await;
            StatusCode::OK.into_response()
        }
    }
}

async fn resource(State(state): State<Arc<MockState>>, request: Request<Body>) -> Response {
    state.resource_calls.fetch_add(1, Ordering::SeqCst);
    let path = request.uri().path().to_string();
    let query = request.uri().query().unwrap_or_default().to_string();
    let method = request.method().to_string();
    let headers = request.headers().clone();
    let auth = bearer(&headers);
    state.seen_auth.lock().unwrap().push(auth.clone());

    let body = axum::body::to_bytes(request.into_body(), 1024 * 1024)
        .await
        .unwrap();

    match path.as_str() {
        "/always-401" => {
            return (
                StatusCode::UNAUTHORIZED,
                Json(serde_json::json!({"message": "forbidden resource"})),
            )
                .into_response();
        }
        "/public" => {
            return Json(serde_json::json!({"code": "OK", "data": "public"})).into_response();
        }
        _ => {}
    }

    let authorized = auth
        .as_deref()
        .and_then(|a| a.strip_prefix("Bearer "))
        .is_some_and(|token| state.valid.lock().unwrap().contains(token));
    if !authorized {
        return (
            StatusCode::UNAUTHORIZED,
            Json(serde_json::json!({"message": "token expired"})),
        )
            .into_response();
    }

    match path.as_str() {
        "/no-content" => StatusCode::NO_CONTENT.into_response(),
        "/malformed" => (StatusCode::OK, "{\"code\": \"OK\", ").into_response(),
        "/missing" => (
            StatusCode::NOT_FOUND,
            Json(serde_json::json!({"message": "no such thing"})),
        )
            .into_response(),
        "/broken" => (StatusCode::INTERNAL_SERVER_ERROR, "<html>oops</html>").into_response(),
        _ => Json(serde_json::json!({
            "code": "OK",
            "data": {
                "path": path,
                "query": query,
                "method": method,
                "authorization": auth,
                "content_type": headers
                    .get("content-type")
                    .and_then(|v| v.to_str().ok()),
                "x_trace": headers.get("x-trace").and_then(|v| v.to_str().ok()),
                "body": String::from_utf8_lossy(&body),
            }
        }))
        .into_response(),
    }
}

fn bearer(headers: &HeaderMap) -> Option<String> {
    headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
}
