mod config;
mod handlers;
mod registration_agent;
mod state;

use axum::routing::{get, post};
use axum::Router as AxumRouter;
use config::WorkerConfig;
use registration_agent::{RegistrationAgent, RegistrationAgentConfig};
use state::WorkerState;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tower_http::trace::TraceLayer;

fn init_logging() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();
}

#[tokio::main]
async fn main() {
    init_logging();

    let config = match WorkerConfig::load() {
        Ok(config) => config,
        Err(err) => {
            tracing::error!(error = %err, "worker: invalid configuration");
            std::process::exit(1);
        }
    };

    let http = reqwest::Client::builder()
        .timeout(Duration::from_secs(60))
        .build()
        .expect("reqwest client builds with a fixed timeout");

    let mut metadata = HashMap::new();
    metadata.insert("backend_url".to_string(), config.backend_url());

    let agent = Arc::new(RegistrationAgent::new(
        RegistrationAgentConfig {
            worker_id: config.worker_id(),
            model_id: config.model_id(),
            controller_url: config.controller_url.clone(),
            self_endpoint: config.self_endpoint(),
            capacity: config.capacity,
            metadata,
            heartbeat_interval: config.heartbeat_interval(),
            registry_retry_count: config.registry_retry_count,
            registry_retry_delay: config.registry_retry_delay(),
        },
        http.clone(),
    ));

    if let Err(err) = agent.start().await {
        tracing::error!(error = %err, "worker: registration failed, exiting");
        std::process::exit(1);
    }

    let state = WorkerState { agent: agent.clone(), backend_url: config.backend_url(), http };

    let app = AxumRouter::new()
        .route("/v1/chat/completions", post(handlers::chat_completions))
        .route("/health", get(handlers::health))
        .layer(TraceLayer::new_for_http())
        .with_state(state);

    let addr = format!("{}:{}", config.host, config.port);
    let listener = match tokio::net::TcpListener::bind(&addr).await {
        Ok(listener) => listener,
        Err(err) => {
            tracing::error!(error = %err, addr, "worker: failed to bind");
            agent.stop().await;
            std::process::exit(1);
        }
    };
    tracing::info!(addr, worker_id = %config.worker_id(), "worker: listening");

    let result = axum::serve(listener, app).with_graceful_shutdown(shutdown_signal()).await;

    agent.stop().await;

    if let Err(err) = result {
        tracing::error!(error = %err, "worker: server error");
        std::process::exit(1);
    }
}

async fn shutdown_signal() {
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
    tracing::info!("worker: shutdown signal received, deregistering");
}
