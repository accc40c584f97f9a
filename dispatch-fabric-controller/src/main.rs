mod auth;
mod config;
mod handlers;
mod state;

use axum::middleware;
use axum::routing::{delete, get, post};
use axum::Router as AxumRouter;
use clap::Parser;
use config::ControllerConfig;
use dispatch_fabric::circuit_breaker::CircuitBreakerConfig;
use dispatch_fabric::health_monitor::{HealthMonitor, HealthMonitorConfig};
use dispatch_fabric::registry::WorkerRegistry;
use dispatch_fabric::router::Router;
use state::AppState;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;

fn init_logging() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();
}

#[tokio::main]
async fn main() {
    init_logging();

    let config = match ControllerConfig::load() {
        Ok(config) => config,
        Err(err) => {
            tracing::error!(error = %err, "controller: invalid configuration");
            std::process::exit(1);
        }
    };

    let breaker_config = CircuitBreakerConfig {
        failure_threshold: config.circuit_breaker_failure_threshold,
        recovery_timeout: config.circuit_breaker_recovery_timeout(),
    };
    let registry = WorkerRegistry::new(breaker_config);
    let router = Router::new(registry.clone());

    let state = AppState {
        registry: registry.clone(),
        router,
        http: reqwest::Client::builder()
            .timeout(Duration::from_secs(60))
            .build()
            .expect("reqwest client builds with a fixed timeout"),
        internal_token: config.internal_api_key.clone(),
    };

    let shutdown = CancellationToken::new();
    let monitor = HealthMonitor::new(
        registry,
        HealthMonitorConfig {
            check_interval: config.heartbeat_check_interval(),
            heartbeat_timeout: config.heartbeat_timeout(),
            probe_failures_threshold: config.probe_failures_threshold,
            ..HealthMonitorConfig::default()
        },
    );
    let monitor_token = shutdown.clone();
    tokio::spawn(async move { monitor.run(monitor_token).await });

    let internal_routes = AxumRouter::new()
        .route("/internal/workers/register", post(handlers::register_worker))
        .route("/internal/workers/heartbeat", post(handlers::heartbeat))
        .route("/internal/workers", get(handlers::list_workers))
        .route("/internal/workers/:id", delete(handlers::deregister_worker))
        .route_layer(middleware::from_fn_with_state(state.clone(), auth::require_internal_token));

    let app = AxumRouter::new()
        .route("/v1/chat/completions", post(handlers::chat_completions))
        .route("/v1/models", get(handlers::list_models))
        .route("/health", get(handlers::health))
        .merge(internal_routes)
        .layer(TraceLayer::new_for_http())
        .with_state(state);

    let addr = format!("{}:{}", config.host, config.port);
    let listener = match tokio::net::TcpListener::bind(&addr).await {
        Ok(listener) => listener,
        Err(err) => {
            tracing::error!(error = %err, addr, "controller: failed to bind");
            std::process::exit(1);
        }
    };
    tracing::info!(addr, "controller: listening");

    if let Err(err) = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(shutdown))
        .await
    {
        tracing::error!(error = %err, "controller: server error");
        std::process::exit(1);
    }
}

async fn shutdown_signal(token: CancellationToken) {
    let ctrl_c = async {
        let _ = tokio::signal::ctrl_c().await;
    };

    #[cfg(unix)]
    let terminate = async {
        let mut sigterm = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler");
        sigterm.recv().await;
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    tracing::info!("controller: shutdown signal received");
    token.cancel();
}
