//! BFF Gateway
//!
//! Single-binary Rust service that:
//! 1. Logs the browser in upstream and keeps the token pair server-side
//! 2. Binds the browser to that pair with an opaque session cookie
//! 3. Proxies `/api/*` to the upstream with the session's bearer token
//! 4. Refreshes an expired access token once per session and retries

mod auth;
mod config;
mod metrics;
mod proxy;
mod session;

use anyhow::{Context, Result};
use axum::Router;
use axum::body::{Body, Bytes};
use axum::extract::State;
use axum::http::{HeaderMap, Request};
use axum::response::{IntoResponse, Response};
use axum::routing::{any, get, post};
use gateway::{AuthenticatedClient, RefreshCoordinator};
use session_auth::{FileStore, MemoryStore, SessionStore, spawn_sweeper};
use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::time::Duration;
use tokio::net::TcpListener;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use metrics_exporter_prometheus::PrometheusHandle;

use crate::config::{Config, SessionBackend};
use crate::metrics::ServiceMetrics;
use crate::proxy::GatewayState;
use crate::session::CookieSettings;

/// How long in-flight requests get to finish after a shutdown signal
const DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

/// Shared application state accessible from all handlers
#[derive(Clone)]
struct AppState {
    gateway: GatewayState,
    metrics: ServiceMetrics,
    prometheus: PrometheusHandle,
}

/// Build the axum router with all routes and shared state.
///
/// Login and logout are matched before the `/api/{*path}` catch-all.
fn build_router(state: AppState, max_connections: usize) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/metrics", get(metrics_handler))
        .route("/api/passport/login", post(login_handler))
        .route("/api/passport/logout", post(logout_handler))
        .route("/api/{*path}", any(proxy_handler))
        .layer(tower::limit::ConcurrencyLimitLayer::new(max_connections))
        .with_state(state)
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing with JSON output and LOG_LEVEL / RUST_LOG support
    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_env("LOG_LEVEL")
                .or_else(|_| EnvFilter::try_from_default_env())
                .unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with(tracing_subscriber::fmt::layer().json())
        .init();

    info!("starting bff-gateway");

    // Install Prometheus metrics recorder before any metrics are emitted
    let prometheus_handle =
        metrics::install_recorder().context("failed to install Prometheus recorder")?;

    // CLI: simple --config flag parsing
    let args: Vec<String> = std::env::args().collect();
    let cli_config_path = args
        .iter()
        .position(|a| a == "--config")
        .and_then(|i| args.get(i + 1))
        .map(|s| s.as_str());

    let config_path = Config::resolve_path(cli_config_path);
    info!(path = %config_path.display(), "loading configuration");

    let config = Config::load(&config_path)
        .with_context(|| format!("failed to load config from {}", config_path.display()))?;

    info!(
        listen_addr = %config.server.listen_addr,
        api_base = %config.upstream.api_base,
        session_backend = ?config.session.backend,
        secure_cookies = config.session.secure_cookies,
        "configuration loaded"
    );

    let sessions: Arc<dyn SessionStore> = match config.session.backend {
        SessionBackend::Memory => Arc::new(MemoryStore::new()),
        SessionBackend::File => {
            let path = config
                .session
                .path
                .clone()
                .context("session backend \"file\" requires session.path")?;
            let store = FileStore::load(path.clone())
                .await
                .with_context(|| format!("failed to open session store {}", path.display()))?;
            info!(path = %path.display(), sessions = store.len().await, "session store loaded");
            Arc::new(store)
        }
    };

    let sweeper = spawn_sweeper(Arc::clone(&sessions), config.session.sweep_interval());

    let http = reqwest::Client::new();
    let coordinator = Arc::new(RefreshCoordinator::new(
        http.clone(),
        config.upstream.api_base.clone(),
        config.upstream.refresh_deadline(),
    ));
    let client = Arc::new(AuthenticatedClient::new(
        http,
        config.upstream.api_base.clone(),
        config.upstream.timeout(),
        coordinator,
    ));

    let metrics = ServiceMetrics::new();
    let app_state = AppState {
        gateway: GatewayState {
            client,
            sessions,
            cookies: CookieSettings {
                secure: config.session.secure_cookies,
            },
            requests_total: metrics.requests_total.clone(),
            errors_total: metrics.errors_total.clone(),
            in_flight: metrics.in_flight.clone(),
        },
        metrics: metrics.clone(),
        prometheus: prometheus_handle,
    };

    let app = build_router(app_state, config.server.max_connections);

    let listen_addr = config.server.listen_addr;
    let listener = TcpListener::bind(listen_addr)
        .await
        .with_context(|| format!("failed to bind to {listen_addr}"))?;
    info!(addr = %listen_addr, "accepting requests");

    let in_flight = metrics.in_flight.clone();

    // The drain timeout starts when the shutdown signal fires, not when the
    // server starts: signal the server to drain, then race it against the timer.
    let (shutdown_tx, shutdown_rx) = tokio::sync::oneshot::channel::<()>();

    let server_handle = tokio::spawn(async move {
        axum::serve(listener, app)
            .with_graceful_shutdown(async {
                let _ = shutdown_rx.await;
            })
            .await
    });

    shutdown_signal().await;
    let _ = shutdown_tx.send(());

    match tokio::time::timeout(DRAIN_TIMEOUT, server_handle).await {
        Ok(Ok(Ok(()))) => {
            info!("all in-flight requests drained");
        }
        Ok(Ok(Err(e))) => {
            error!(error = %e, "server error during shutdown");
        }
        Ok(Err(e)) => {
            error!(error = %e, "server task panicked");
        }
        Err(_) => {
            let remaining = in_flight.load(Ordering::Relaxed);
            warn!(
                remaining,
                drain_timeout_secs = DRAIN_TIMEOUT.as_secs(),
                "drain timeout exceeded, forcing shutdown"
            );
        }
    }

    sweeper.abort();
    info!("shutdown complete");
    Ok(())
}

fn request_id() -> String {
    format!("req_{}", uuid::Uuid::new_v4().as_simple())
}

/// Health endpoint: uptime, request counters, and the session backend in use.
async fn health_handler(State(state): State<AppState>) -> impl IntoResponse {
    let uptime = state.metrics.started_at.elapsed().as_secs();
    let requests = state.metrics.requests_total.load(Ordering::Relaxed);
    let errors = state.metrics.errors_total.load(Ordering::Relaxed);
    let in_flight = state.metrics.in_flight.load(Ordering::Relaxed);

    let body = serde_json::json!({
        "status": "healthy",
        "session_backend": state.gateway.sessions.kind(),
        "refreshes_in_flight": state.gateway.client.coordinator().in_flight(),
        "uptime_seconds": uptime,
        "requests_served": requests,
        "requests_in_flight": in_flight,
        "errors_total": errors,
    });

    (
        axum::http::StatusCode::OK,
        [(axum::http::header::CONTENT_TYPE, "application/json")],
        body.to_string(),
    )
}

/// Prometheus metrics endpoint, text exposition format.
async fn metrics_handler(State(state): State<AppState>) -> impl IntoResponse {
    (
        axum::http::StatusCode::OK,
        [(
            axum::http::header::CONTENT_TYPE,
            "text/plain; version=0.0.4; charset=utf-8",
        )],
        state.prometheus.render(),
    )
}

async fn login_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    auth::login(&state.gateway, &headers, body, request_id()).await
}

async fn logout_handler(State(state): State<AppState>, headers: HeaderMap) -> Response {
    auth::logout(&state.gateway, &headers, request_id()).await
}

/// Catch-all for `/api/*`, forwarded upstream with the session's credential.
async fn proxy_handler(State(state): State<AppState>, request: Request<Body>) -> Response {
    proxy::proxy_request(&state.gateway, request, request_id()).await
}

/// Wait for SIGTERM or SIGINT for graceful shutdown.
///
/// If a handler cannot be installed that signal is ignored rather than
/// triggering an immediate shutdown.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!(error = %e, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("received SIGINT, shutting down"),
        _ = terminate => info!("received SIGTERM, shutting down"),
    }
}
