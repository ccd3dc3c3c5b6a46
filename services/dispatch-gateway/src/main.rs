//! Media Dispatch Gateway
//!
//! Single-binary Rust service that:
//! 1. Loads the shared credential pool and an optional personal credential
//! 2. Accepts media requests over HTTP
//! 3. Waits for an admission slot on the backend server (generations only)
//! 4. Rotates through credentials until the backend accepts the request

mod admin;
mod config;
mod error;
mod gateway;
mod metrics;

use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use axum::Router;
use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::http::HeaderMap;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use credentials::{Credential, CredentialSource, CredentialStore, FileSource, HttpSource, SessionStore};
use dispatcher::{
    Dispatcher, EndpointResolver, FanoutTelemetry, HttpTelemetry, LogTelemetry, NotificationBus,
    RpcAdmissionGate, TelemetrySink,
};
use metrics_exporter_prometheus::PrometheusHandle;
use tokio::net::TcpListener;
use tokio::sync::broadcast::error::RecvError;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::admin::AdminState;
use crate::config::Config;
use crate::error::new_request_id;
use crate::gateway::{EXPLICIT_CREDENTIAL_HEADER, GatewayState};

/// Upper bound on in-flight request draining after a shutdown signal.
const DRAIN_TIMEOUT: Duration = Duration::from_secs(30);

/// Shared application state accessible from all handlers
#[derive(Clone)]
struct AppState {
    gateway: GatewayState,
    store: Arc<SessionStore>,
    started_at: Instant,
    prometheus: PrometheusHandle,
}

/// Build the axum router with all routes and shared state.
///
/// The concurrency limit covers admin routes too.
fn build_router(state: AppState, admin: AdminState, max_connections: usize) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/metrics", get(metrics_handler))
        .route("/v1/{family}/compose", post(compose_handler))
        .route("/v1/{family}/{operation}", post(dispatch_handler))
        .route("/v1/direct/{family}/{operation}", post(direct_handler))
        .with_state(state)
        .merge(admin::build_admin_router(admin))
        .layer(tower::limit::ConcurrencyLimitLayer::new(max_connections))
}

#[tokio::main]
async fn main() -> Result<()> {
    // JSON logs, filter from LOG_LEVEL then RUST_LOG
    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_env("LOG_LEVEL")
                .or_else(|_| EnvFilter::try_from_default_env())
                .unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with(tracing_subscriber::fmt::layer().json())
        .init();

    info!("starting media-dispatch-gateway");

    // Install before any metrics are emitted
    let prometheus_handle = metrics::install_recorder()?;

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
        admission_rpc = %config.admission.rpc_url,
        pool_url = config.credentials.pool_url.as_deref().unwrap_or(""),
        personal = config.credentials.personal_token.is_some(),
        telemetry = config.telemetry.url.is_some(),
        "configuration loaded"
    );

    let client = reqwest::Client::new();

    let source: Arc<dyn CredentialSource> =
        match (&config.credentials.pool_url, &config.credentials.pool_file) {
            (Some(url), _) => Arc::new(HttpSource::new(
                client.clone(),
                url.clone(),
                config.credentials.pool_api_key.clone(),
            )),
            (None, Some(path)) => Arc::new(FileSource::new(path.clone())),
            (None, None) => anyhow::bail!("no credential pool source configured"),
        };
    let personal = config
        .credentials
        .personal_token
        .as_ref()
        .map(|token| Credential::personal(token.expose().as_str()));
    let store = Arc::new(SessionStore::new(personal, source));

    // Warm the cache; an empty pool is refilled again on first dispatch
    if let Err(e) = store.refill_shared().await {
        warn!(error = %e, "initial credential pool load failed");
    }

    let mut sinks: Vec<Arc<dyn TelemetrySink>> = vec![Arc::new(LogTelemetry)];
    if let Some(url) = &config.telemetry.url {
        sinks.push(Arc::new(HttpTelemetry::new(
            client.clone(),
            url.clone(),
            config.telemetry.api_key.clone(),
        )));
    }

    let notifications = NotificationBus::new();
    let notification_task = spawn_notification_logger(&notifications);

    let dispatcher = Dispatcher::new(
        Arc::new(transport::HttpTransport::new(
            client.clone(),
            config.server.caller_identity.clone(),
        )),
        store.clone(),
        Arc::new(RpcAdmissionGate::new(
            client.clone(),
            config.admission.rpc_url.clone(),
            config.admission.api_key.clone(),
        )),
        Arc::new(FanoutTelemetry::new(sinks)),
        notifications,
    )
    .with_admission_policy(config.admission_policy());

    let resolver = Arc::new(EndpointResolver::new(config.endpoint_defaults()));
    if config.endpoints.override_url.is_some() {
        resolver.set_override(config.endpoints.override_url.clone());
    }

    let app_state = AppState {
        gateway: GatewayState {
            dispatcher: Arc::new(dispatcher),
            resolver: resolver.clone(),
            direct_timeout: config.direct_timeout(),
        },
        store: store.clone(),
        started_at: Instant::now(),
        prometheus: prometheus_handle,
    };
    let app = build_router(
        app_state,
        AdminState::new(resolver, store),
        config.server.max_connections,
    );

    let listen_addr = config.server.listen_addr;
    let listener = TcpListener::bind(listen_addr)
        .await
        .with_context(|| format!("failed to bind to {listen_addr}"))?;
    info!(addr = %listen_addr, "accepting requests");

    // The drain deadline starts at signal receipt, not at server start
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
            warn!(
                drain_timeout_secs = DRAIN_TIMEOUT.as_secs(),
                "drain timeout exceeded, forcing shutdown"
            );
        }
    }

    notification_task.abort();
    info!("shutdown complete");
    Ok(())
}

/// Log every dispatcher event until the bus closes.
fn spawn_notification_logger(bus: &NotificationBus) -> tokio::task::JoinHandle<()> {
    let mut events = bus.subscribe();
    tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(event) => warn!(
                    event = event.name(),
                    "personal credential was rejected, replace it via /admin/personal-credential"
                ),
                Err(RecvError::Lagged(skipped)) => {
                    warn!(skipped, "notification logger fell behind");
                }
                Err(RecvError::Closed) => break,
            }
        }
    })
}

fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(axum::http::header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
}

fn finish(route: &'static str, started: Instant, response: Response) -> Response {
    metrics::record_request(route, response.status().as_u16(), started.elapsed().as_secs_f64());
    response
}

/// Health endpoint: 200 while any credential is cached, 503 when none are.
async fn health_handler(State(state): State<AppState>) -> impl IntoResponse {
    let shared = state.store.shared_len().await;
    let personal = state.store.has_personal().await;
    let healthy = shared > 0 || personal;

    let status_code = if healthy {
        axum::http::StatusCode::OK
    } else {
        axum::http::StatusCode::SERVICE_UNAVAILABLE
    };
    let body = serde_json::json!({
        "status": if healthy { "healthy" } else { "degraded" },
        "uptime_seconds": state.started_at.elapsed().as_secs(),
        "shared_credentials": shared,
        "personal_credential": personal,
        "endpoint_override": state.gateway.resolver.current_override(),
    });

    (
        status_code,
        [(axum::http::header::CONTENT_TYPE, "application/json")],
        body.to_string(),
    )
}

/// Prometheus metrics endpoint in text exposition format.
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

async fn dispatch_handler(
    State(state): State<AppState>,
    Path((family, operation)): Path<(String, String)>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let started = Instant::now();
    let explicit = headers
        .get(EXPLICIT_CREDENTIAL_HEADER)
        .and_then(|v| v.to_str().ok());
    let response = gateway::dispatch_operation(
        &state.gateway,
        &family,
        &operation,
        explicit,
        &body,
        &new_request_id(),
    )
    .await;
    finish("dispatch", started, response)
}

async fn direct_handler(
    State(state): State<AppState>,
    Path((family, operation)): Path<(String, String)>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let started = Instant::now();
    let response = gateway::direct_operation(
        &state.gateway,
        &family,
        &operation,
        bearer_token(&headers),
        &body,
        &new_request_id(),
    )
    .await;
    finish("direct", started, response)
}

async fn compose_handler(
    State(state): State<AppState>,
    Path(family): Path<String>,
    body: Bytes,
) -> Response {
    let started = Instant::now();
    let response = gateway::compose(&state.gateway, &family, &body, &new_request_id()).await;
    finish("compose", started, response)
}

/// Wait for SIGTERM or SIGINT for graceful shutdown.
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
