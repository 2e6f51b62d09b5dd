mod alerts;
mod clients;
mod config;
mod error;
mod ingest;
mod metrics;
mod notify;
mod orchestrator;
mod persistence;
mod pollers;
mod rates;
mod scheduler;
mod state;
mod util;
mod ws;

use std::sync::Arc;

use anyhow::{Context, Result};
use axum::{
    extract::State,
    http::{header, Method, StatusCode},
    response::{IntoResponse, Json},
    routing::{get, post},
    Router,
};
use serde_json::json;
use std::net::SocketAddr;
use std::time::Duration;
use tower::ServiceBuilder;
use tower_http::cors::CorsLayer;
use tower_http::timeout::TimeoutLayer;
use tracing::{info, warn};

use crate::alerts::AlertEngine;
use crate::config::{Config, LogFormat, LogOutput};
use crate::error::ApiError;
use crate::ingest::{AgentIdentity, AgentIngest, AgentReport};
use crate::metrics::CoreMetrics;
use crate::notify::sinks::{LoggingSink, NotificationSink, WebhookSink};
use crate::notify::NotificationDispatcher;
use crate::orchestrator::Orchestrator;
use crate::persistence::{ConfigPersistence, InMemoryPersistence};
use crate::scheduler::{DeadLetterQueue, StalenessTracker, TaskQueue};
use crate::state::models::{CommandStatus, DockerContainer};
use crate::state::StateStore;
use crate::ws::{Broadcaster, WsRouterState};

#[derive(Clone)]
struct AppState {
    config: Config,
    store: Arc<StateStore>,
    ingest: Arc<AgentIngest>,
    persistence: Arc<dyn ConfigPersistence>,
    queue: Arc<TaskQueue>,
    dlq: Arc<DeadLetterQueue>,
    metrics: CoreMetrics,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Phase 1: Basic tracing so we can log during config loading
    // Uses set_default (thread-local) so it can be replaced by Phase 2's global subscriber
    let _basic_tracing = init_tracing_basic();

    info!("Starting Pulsewatch v{}", env!("CARGO_PKG_VERSION"));

    let config = Config::load().context("Failed to load configuration")?;
    config.validate().context("Configuration validation failed")?;

    // Phase 2: Re-initialize tracing with config (format, level)
    // Drop the phase-1 thread-local guard so the global subscriber slot is free
    drop(_basic_tracing);
    init_tracing_from_config(&config);

    info!("Configuration loaded successfully");
    info!("Server will bind to: {}", config.server.bind_address);
    info!(
        upstreams = config.upstreams.pve.len() + config.upstreams.pbs.len() + config.upstreams.pmg.len(),
        "configured upstreams",
    );

    let store = Arc::new(StateStore::new());
    let queue = Arc::new(TaskQueue::new());
    let dlq = Arc::new(DeadLetterQueue::new());
    let staleness = Arc::new(StalenessTracker::new());
    let ingest = Arc::new(AgentIngest::new(config.discovery.removal_blocklist_ttl_secs as i64));
    let persistence: Arc<dyn ConfigPersistence> = Arc::new(InMemoryPersistence::new());
    let alert_engine = Arc::new(AlertEngine::new(
        persistence.load_alert_config(),
        Arc::new(crate::alerts::NoopCallbacks),
    ));
    let metrics = CoreMetrics::new();
    let broadcaster = Broadcaster::new(256);

    let mut sinks: Vec<Arc<dyn NotificationSink>> = vec![Arc::new(LoggingSink)];
    if let Some(template) = &config.alerts.webhook_url_template {
        sinks.push(Arc::new(WebhookSink::new("webhook", template.clone())));
    }
    let dispatcher = Arc::new(NotificationDispatcher::new(
        config.alerts.cooldown_minutes,
        config.alerts.grouping.clone(),
        sinks,
    ));

    let orchestrator = Arc::new(
        Orchestrator::new(
            config.clone(),
            store.clone(),
            queue.clone(),
            dlq.clone(),
            staleness.clone(),
            ingest.clone(),
            alert_engine.clone(),
            dispatcher.clone(),
            broadcaster.clone(),
            metrics.clone(),
        )
        .context("Failed to construct orchestrator")?,
    );

    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
    let orchestrator_handle = {
        let orchestrator = orchestrator.clone();
        let shutdown_rx = shutdown_rx.clone();
        tokio::spawn(async move { orchestrator.run(shutdown_rx).await })
    };

    let app_state = AppState {
        config: config.clone(),
        store: store.clone(),
        ingest: ingest.clone(),
        persistence: persistence.clone(),
        queue: queue.clone(),
        dlq: dlq.clone(),
        metrics: metrics.clone(),
    };
    let ws_state = WsRouterState { broadcaster, metrics: metrics.clone() };
    let app = build_router(app_state, ws_state);

    let addr: SocketAddr = config.server.bind_address.parse().context("Invalid bind address")?;

    info!("Starting HTTP server...");
    info!("  - Ingest endpoint: http://{}/api/ingest/report", addr);
    info!("  - WebSocket broadcast: ws://{}/ws", addr);
    info!("  - Health check: http://{}/health", addr);
    info!("  - Readiness check: http://{}/ready", addr);

    let listener = tokio::net::TcpListener::bind(&addr).await.context("Failed to bind to address")?;

    info!("Pulsewatch is ready!");
    info!("Listening on: http://{}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    // Signal all background tasks (pollers, tickers, sweepers) to stop
    let _ = shutdown_tx.send(true);
    let _ = orchestrator_handle.await;

    info!("Server shut down gracefully");
    Ok(())
}

fn build_router(state: AppState, ws_state: WsRouterState) -> Router {
    let cors = if state.config.server.enable_cors {
        let origins = state
            .config
            .server
            .cors_origins
            .iter()
            .filter_map(|s| s.parse::<axum::http::HeaderValue>().ok())
            .collect::<Vec<_>>();

        CorsLayer::new()
            .allow_origin(origins)
            .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
            .allow_headers([header::CONTENT_TYPE, header::AUTHORIZATION])
            .allow_credentials(true)
    } else {
        CorsLayer::new()
    };

    let request_timeout = Duration::from_secs(state.config.server.write_timeout_secs);

    let ws_router = Router::new().route("/ws", get(ws::ws_handler)).with_state(ws_state);

    Router::new()
        .route("/health", get(health_handler))
        .route("/ready", get(readiness_handler))
        .route("/metrics", get(metrics_handler))
        .route("/api/scheduler", get(scheduler_handler))
        .route("/api/ingest/report", post(ingest_report_handler))
        .route("/api/ingest/ack", post(ingest_ack_handler))
        .route("/", get(root_handler))
        .merge(ws_router)
        .layer(
            ServiceBuilder::new()
                .layer(TimeoutLayer::with_status_code(StatusCode::REQUEST_TIMEOUT, request_timeout))
                .layer(axum::extract::DefaultBodyLimit::max(2 * 1024 * 1024))
                .layer(cors),
        )
        .with_state(state)
}

async fn root_handler() -> Json<serde_json::Value> {
    Json(json!({
        "name": "Pulsewatch",
        "version": env!("CARGO_PKG_VERSION"),
        "endpoints": {
            "ws": "/ws",
            "ingest": "/api/ingest/report",
            "health": "/health",
            "ready": "/ready",
            "metrics": "/metrics",
            "scheduler": "/api/scheduler"
        }
    }))
}

async fn health_handler(State(state): State<AppState>) -> impl IntoResponse {
    let hosts = state.store.all_docker_hosts();
    let healthy = hosts.iter().filter(|h| h.status == crate::state::models::DockerHostStatus::Online).count();
    let is_healthy = hosts.is_empty() || healthy > 0;
    let status_code = if is_healthy { StatusCode::OK } else { StatusCode::SERVICE_UNAVAILABLE };

    (
        status_code,
        Json(json!({
            "status": if is_healthy { "healthy" } else { "unhealthy" },
            "timestamp": chrono::Utc::now().to_rfc3339(),
            "dockerHosts": { "total": hosts.len(), "online": healthy },
        })),
    )
}

async fn readiness_handler(State(state): State<AppState>) -> impl IntoResponse {
    let queued = state.queue.size();
    (StatusCode::OK, Json(json!({ "ready": true, "queuedTasks": queued })))
}

async fn metrics_handler(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.metrics.snapshot())
}

/// Diagnostic route for the task queue and DLQ (spec.md §4.9's scheduler
/// observability). Not on the hot path; holding both locks briefly to
/// render a snapshot is fine here.
async fn scheduler_handler(State(state): State<AppState>) -> impl IntoResponse {
    Json(json!({
        "queue": state.queue.peek_all(100),
        "deadLetter": state.dlq.snapshot(),
    }))
}

#[derive(serde::Deserialize)]
struct IngestReportRequest {
    agent_id: Option<String>,
    token_id: Option<String>,
    machine_id: Option<String>,
    hostname: String,
    display_name: Option<String>,
    agent_version: String,
    #[serde(default = "default_interval_seconds")]
    interval_seconds: u64,
    os: String,
    kernel: String,
    arch: String,
    #[serde(default)]
    containers: Vec<DockerContainer>,
}

fn default_interval_seconds() -> u64 {
    15
}

fn authorize_ingest(state: &AppState, headers: &axum::http::HeaderMap) -> Result<(), ApiError> {
    let tokens = state.persistence.load_ingest_tokens();
    if tokens.is_empty() {
        return Ok(());
    }
    let presented = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "));
    match presented {
        Some(token) if tokens.iter().any(|t| t.token == token) => Ok(()),
        _ => Err(ApiError::InvalidRequest("missing or unknown ingest token".to_string())),
    }
}

/// POST /api/ingest/report — Docker/host agent push (spec.md §4.6/§7).
async fn ingest_report_handler(
    State(state): State<AppState>,
    headers: axum::http::HeaderMap,
    Json(body): Json<IngestReportRequest>,
) -> Result<impl IntoResponse, ApiError> {
    authorize_ingest(&state, &headers)?;

    let report = AgentReport {
        identity: AgentIdentity {
            agent_id: body.agent_id,
            token_id: body.token_id,
            machine_id: body.machine_id,
            hostname: Some(body.hostname.clone()),
            display_name: body.display_name,
        },
        agent_version: body.agent_version,
        interval_seconds: body.interval_seconds,
        hostname: body.hostname,
        os: body.os,
        kernel: body.kernel,
        arch: body.arch,
        containers: body.containers,
    };

    let now = chrono::Utc::now().timestamp();
    let host_id = state.ingest.accept_report(&state.store, &report, now)?;
    Ok(Json(json!({ "hostId": host_id, "accepted": true })))
}

#[derive(serde::Deserialize)]
struct IngestAckRequest {
    host_id: String,
    status: CommandStatus,
}

/// POST /api/ingest/ack — agent acknowledges command lifecycle transitions.
async fn ingest_ack_handler(
    State(state): State<AppState>,
    headers: axum::http::HeaderMap,
    Json(body): Json<IngestAckRequest>,
) -> Result<impl IntoResponse, ApiError> {
    authorize_ingest(&state, &headers)?;
    let now = chrono::Utc::now().timestamp();
    state.ingest.acknowledge_command(&state.store, &body.host_id, body.status, now)?;
    Ok(Json(json!({ "acknowledged": true })))
}

/// Phase 1: Basic tracing init so we can log during config loading.
/// Uses RUST_LOG env var or a sensible default.
fn init_tracing_basic() -> tracing::subscriber::DefaultGuard {
    use tracing_subscriber::{fmt, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info,pulsewatch_core=debug"));

    let subscriber = fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .finish();

    tracing::subscriber::set_default(subscriber)
}

/// Phase 2: Re-initialize tracing with configuration values.
/// This replaces the global subscriber with one that respects config.
fn init_tracing_from_config(config: &Config) {
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.logging.level));

    match (&config.logging.format, &config.logging.output) {
        (LogFormat::Json, LogOutput::Stdout) => {
            let layer = fmt::layer().json().with_target(true).with_thread_ids(true);
            tracing_subscriber::registry().with(filter).with(layer).init();
        }
        (LogFormat::Json, LogOutput::File { path }) => {
            let file = std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .unwrap_or_else(|e| panic!("Failed to open log file '{}': {}", path, e));
            let layer = fmt::layer()
                .json()
                .with_target(true)
                .with_thread_ids(true)
                .with_ansi(false)
                .with_writer(Arc::new(file));
            tracing_subscriber::registry().with(filter).with(layer).init();
        }
        (LogFormat::Pretty, LogOutput::Stdout) => {
            let layer = fmt::layer().with_target(true).with_thread_ids(false).with_file(false).with_line_number(false);
            tracing_subscriber::registry().with(filter).with(layer).init();
        }
        (LogFormat::Pretty, LogOutput::File { path }) => {
            let file = std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .unwrap_or_else(|e| panic!("Failed to open log file '{}': {}", path, e));
            let layer = fmt::layer()
                .with_target(true)
                .with_thread_ids(false)
                .with_file(false)
                .with_line_number(false)
                .with_ansi(false)
                .with_writer(Arc::new(file));
            tracing_subscriber::registry().with(filter).with(layer).init();
        }
    }
}

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c().await.expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            warn!("Received Ctrl+C, initiating graceful shutdown...");
        },
        _ = terminate => {
            warn!("Received SIGTERM, initiating graceful shutdown...");
        },
    }
}
