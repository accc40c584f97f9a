//! Drives the worker's relationship with the Controller: registration with
//! retry-with-backoff, periodic heartbeats, and an in-flight load counter.
//!
//! Grounded in the teacher's `backoff.rs` exponential-backoff idiom for the
//! registration retry loop, and in the resilient-client shape of
//! `other_examples`' `model_registry_client.rs` (inner HTTP client plus
//! retry handling plus "last successful connection" bookkeeping) for the
//! agent's overall structure.

use dispatch_fabric::backoff::Backoff;
use dispatch_fabric::registry::WorkerStatus;
use dispatch_fabric::schema::{HeartbeatRequest, RegisterRequest};
use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone)]
pub struct RegistrationAgentConfig {
    pub worker_id: String,
    pub model_id: String,
    pub controller_url: String,
    pub self_endpoint: String,
    pub capacity: i64,
    pub metadata: HashMap<String, String>,
    pub heartbeat_interval: Duration,
    pub registry_retry_count: usize,
    pub registry_retry_delay: Duration,
}

/// RAII guard that decrements the shared load counter on every exit path —
/// success, error, or panic unwind — mirroring the permit-guard pattern the
/// teacher's bulkhead uses for semaphore permits.
pub struct LoadGuard {
    counter: Arc<AtomicI64>,
}

impl Drop for LoadGuard {
    fn drop(&mut self) {
        // Clamp at zero: decrementing past zero would indicate a bug
        // elsewhere, but the counter is advisory and must never go negative.
        let _ = self
            .counter
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |v| Some((v - 1).max(0)));
    }
}

pub struct RegistrationAgent {
    config: RegistrationAgentConfig,
    http: reqwest::Client,
    current_load: Arc<AtomicI64>,
    heartbeat_handle: tokio::sync::Mutex<Option<JoinHandle<()>>>,
    heartbeat_token: CancellationToken,
}

impl RegistrationAgent {
    pub fn new(config: RegistrationAgentConfig, http: reqwest::Client) -> Self {
        Self {
            config,
            http,
            current_load: Arc::new(AtomicI64::new(0)),
            heartbeat_handle: tokio::sync::Mutex::new(None),
            heartbeat_token: CancellationToken::new(),
        }
    }

    pub fn current_load(&self) -> i64 {
        self.current_load.load(Ordering::Acquire)
    }

    /// Called before issuing a request to the backend; the returned guard
    /// decrements on every exit path when dropped.
    pub fn increment_load(&self) -> LoadGuard {
        self.current_load.fetch_add(1, Ordering::AcqRel);
        LoadGuard { counter: self.current_load.clone() }
    }

    /// Register with the Controller, retrying with exponential backoff
    /// (capped at 60s) until `registry_retry_count` attempts are exhausted,
    /// then launch the heartbeat task. Exhaustion is fatal.
    pub async fn start(self: &Arc<Self>) -> Result<(), String> {
        let backoff = Backoff::exponential(self.config.registry_retry_delay).with_max(Duration::from_secs(60));
        let mut last_error = String::new();

        for attempt in 1..=self.config.registry_retry_count {
            match self.try_register().await {
                Ok(()) => {
                    tracing::info!(worker_id = %self.config.worker_id, attempt, "registration succeeded");
                    self.spawn_heartbeat_task();
                    return Ok(());
                }
                Err(err) => {
                    last_error = err;
                    tracing::warn!(
                        worker_id = %self.config.worker_id,
                        attempt,
                        error = %last_error,
                        "registration attempt failed"
                    );
                    if attempt < self.config.registry_retry_count {
                        tokio::time::sleep(backoff.delay(attempt)).await;
                    }
                }
            }
        }

        Err(format!("registration exhausted after {} attempts: {last_error}", self.config.registry_retry_count))
    }

    async fn try_register(&self) -> Result<(), String> {
        let url = format!("{}/internal/workers/register", self.config.controller_url.trim_end_matches('/'));
        let request = RegisterRequest {
            worker_id: self.config.worker_id.clone(),
            model_id: self.config.model_id.clone(),
            endpoint: self.config.self_endpoint.clone(),
            capacity: self.config.capacity,
            metadata: self.config.metadata.clone(),
        };
        let response = self.http.post(&url).json(&request).send().await.map_err(|e| e.to_string())?;
        if response.status().is_success() {
            Ok(())
        } else {
            Err(format!("controller returned status {}", response.status()))
        }
    }

    fn spawn_heartbeat_task(self: &Arc<Self>) {
        let agent = self.clone();
        let token = self.heartbeat_token.clone();
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(agent.config.heartbeat_interval);
            loop {
                tokio::select! {
                    _ = token.cancelled() => {
                        tracing::info!(worker_id = %agent.config.worker_id, "heartbeat task stopping");
                        return;
                    }
                    _ = ticker.tick() => {
                        agent.send_heartbeat().await;
                    }
                }
            }
        });
        // spawn_heartbeat_task runs on the tokio runtime, so blocking here
        // would only ever contend with another call to start(), which never
        // happens concurrently with itself.
        if let Ok(mut guard) = self.heartbeat_handle.try_lock() {
            *guard = Some(handle);
        }
    }

    async fn send_heartbeat(&self) {
        let url = format!("{}/internal/workers/heartbeat", self.config.controller_url.trim_end_matches('/'));
        let request = HeartbeatRequest {
            worker_id: self.config.worker_id.clone(),
            current_load: self.current_load(),
            status: WorkerStatus::Healthy,
        };
        match self.http.post(&url).json(&request).send().await {
            Ok(resp) if resp.status().is_success() => {}
            Ok(resp) if resp.status() == reqwest::StatusCode::NOT_FOUND => {
                // The Controller may have forgotten this worker. Re-registration
                // on 404 is a known gap, not attempted here.
                tracing::warn!(worker_id = %self.config.worker_id, "heartbeat: controller returned 404");
            }
            Ok(resp) => {
                tracing::warn!(worker_id = %self.config.worker_id, status = %resp.status(), "heartbeat: unexpected status");
            }
            Err(err) => {
                tracing::warn!(worker_id = %self.config.worker_id, error = %err, "heartbeat: transport failure");
            }
        }
    }

    /// Cancel the heartbeat task, await its termination, then attempt a
    /// single best-effort deregistration.
    pub async fn stop(&self) {
        self.heartbeat_token.cancel();
        if let Some(handle) = self.heartbeat_handle.lock().await.take() {
            let _ = handle.await;
        }

        let url = format!(
            "{}/internal/workers/{}?force=true",
            self.config.controller_url.trim_end_matches('/'),
            self.config.worker_id
        );
        if let Err(err) = self.http.delete(&url).send().await {
            tracing::warn!(worker_id = %self.config.worker_id, error = %err, "deregistration failed, ignoring");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn load_guard_decrements_on_drop() {
        let counter = Arc::new(AtomicI64::new(0));
        {
            let _guard = LoadGuard { counter: counter.clone() };
            counter.fetch_add(1, Ordering::AcqRel);
            assert_eq!(counter.load(Ordering::Acquire), 1);
        }
        assert_eq!(counter.load(Ordering::Acquire), 0);
    }

    #[test]
    fn load_guard_clamps_at_zero() {
        let counter = Arc::new(AtomicI64::new(0));
        let guard = LoadGuard { counter: counter.clone() };
        drop(guard);
        assert_eq!(counter.load(Ordering::Acquire), 0);
    }

    #[tokio::test]
    async fn concurrent_increment_decrement_converges_to_zero() {
        let config = RegistrationAgentConfig {
            worker_id: "w1".into(),
            model_id: "llama3".into(),
            controller_url: "http://127.0.0.1:1".into(),
            self_endpoint: "http://127.0.0.1:2".into(),
            capacity: 100,
            metadata: HashMap::new(),
            heartbeat_interval: Duration::from_secs(10),
            registry_retry_count: 1,
            registry_retry_delay: Duration::from_millis(1),
        };
        let agent = Arc::new(RegistrationAgent::new(config, reqwest::Client::new()));

        let mut handles = Vec::new();
        for _ in 0..50 {
            let agent = agent.clone();
            handles.push(tokio::spawn(async move {
                let _guard = agent.increment_load();
                tokio::task::yield_now().await;
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        assert_eq!(agent.current_load(), 0);
    }

    async fn spawn_always_failing_controller() -> String {
        use axum::routing::post;
        let app = axum::Router::new()
            .route("/internal/workers/register", post(|| async { axum::http::StatusCode::INTERNAL_SERVER_ERROR }));
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{addr}")
    }

    #[tokio::test]
    async fn registration_exhaustion_is_fatal_after_configured_attempts() {
        let controller_url = spawn_always_failing_controller().await;
        let config = RegistrationAgentConfig {
            worker_id: "w1".into(),
            model_id: "llama3".into(),
            controller_url,
            self_endpoint: "http://127.0.0.1:9000".into(),
            capacity: 10,
            metadata: HashMap::new(),
            heartbeat_interval: Duration::from_secs(10),
            registry_retry_count: 3,
            registry_retry_delay: Duration::from_millis(1),
        };
        let agent = Arc::new(RegistrationAgent::new(config, reqwest::Client::new()));

        let result = agent.start().await;
        assert!(result.is_err());
        assert!(result.unwrap_err().contains("exhausted after 3 attempts"));
    }
}
