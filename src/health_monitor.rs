//! Background task that reconciles missed heartbeats against reality.
//!
//! Shaped after the teacher's cancellable background tasks
//! (`control/transport_channel.rs`): an interval timer paired with a
//! `CancellationToken` so shutdown interrupts the sleep immediately instead
//! of waiting for the next tick boundary, per the teacher's own note that a
//! token or channel-close idiom is preferable to a running flag.

use crate::registry::{WorkerRegistry, WorkerStatus};
use std::collections::HashMap;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone)]
pub struct HealthMonitorConfig {
    pub check_interval: Duration,
    pub heartbeat_timeout: Duration,
    pub probe_timeout: Duration,
    pub probe_failures_threshold: usize,
}

impl Default for HealthMonitorConfig {
    fn default() -> Self {
        Self {
            check_interval: Duration::from_secs(10),
            heartbeat_timeout: Duration::from_secs(60),
            probe_timeout: Duration::from_secs(5),
            probe_failures_threshold: 3,
        }
    }
}

fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// Periodically scans the registry for workers that have missed their
/// heartbeat window and probes them directly before acting.
pub struct HealthMonitor {
    registry: WorkerRegistry,
    http: reqwest::Client,
    config: HealthMonitorConfig,
    // Held by the monitor, not the registry: these are diagnostic attempt
    // counts, not worker state, and are touched only from this task's loop.
    probe_failures: HashMap<String, usize>,
}

impl HealthMonitor {
    pub fn new(registry: WorkerRegistry, config: HealthMonitorConfig) -> Self {
        let http = reqwest::Client::builder()
            .timeout(config.probe_timeout)
            .build()
            .expect("reqwest client builds with a fixed timeout");
        Self { registry, http, config, probe_failures: HashMap::new() }
    }

    /// Run the monitor loop until `token` is cancelled.
    pub async fn run(mut self, token: CancellationToken) {
        let mut ticker = tokio::time::interval(self.config.check_interval);
        loop {
            tokio::select! {
                _ = token.cancelled() => {
                    tracing::info!("health monitor: shutting down");
                    return;
                }
                _ = ticker.tick() => {
                    self.sweep().await;
                }
            }
        }
    }

    async fn sweep(&mut self) {
        let records = self.registry.list(None).await;
        for record in records {
            if record.status == WorkerStatus::Draining {
                continue;
            }
            if record.last_heartbeat == 0 {
                continue;
            }
            let elapsed = now_millis().saturating_sub(record.last_heartbeat);
            if elapsed <= self.config.heartbeat_timeout.as_millis() as u64 {
                continue;
            }
            self.reconcile_stale_worker(&record.worker_id, &record.endpoint).await;
        }
    }

    async fn reconcile_stale_worker(&mut self, worker_id: &str, endpoint: &str) {
        let probe_ok = self.probe(endpoint).await;
        if probe_ok {
            // The response code on a successful probe is preserved, but the
            // worker is still marked unhealthy: it missed heartbeats even
            // though it answered just now. It stays excluded from routing
            // until it resumes sending heartbeats.
            self.probe_failures.remove(worker_id);
            self.registry.mark_unhealthy(worker_id).await;
            tracing::warn!(worker_id, "health monitor: heartbeat stale, probe ok, marking unhealthy");
        } else {
            let failures = self.probe_failures.entry(worker_id.to_string()).or_insert(0);
            *failures += 1;
            if *failures >= self.config.probe_failures_threshold {
                self.probe_failures.remove(worker_id);
                self.registry.remove(worker_id).await;
                tracing::error!(worker_id, "health monitor: probe failed repeatedly, removing worker");
            } else {
                self.registry.mark_unhealthy(worker_id).await;
                tracing::warn!(worker_id, failures = *failures, "health monitor: probe failed");
            }
        }
    }

    /// Any error from the probe (transport, timeout, non-200 status) counts
    /// as "probe failed".
    async fn probe(&self, endpoint: &str) -> bool {
        let url = format!("{}/health", endpoint.trim_end_matches('/'));
        match self.http.get(url).send().await {
            Ok(resp) => resp.status().is_success(),
            Err(_) => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::circuit_breaker::CircuitBreakerConfig;
    use std::collections::HashMap as Map;

    #[tokio::test]
    async fn sweep_skips_draining_workers() {
        let registry = WorkerRegistry::new(CircuitBreakerConfig::default());
        registry
            .register("w1".into(), "llama3".into(), "http://127.0.0.1:1".into(), 10, Map::new())
            .await
            .unwrap();
        registry.unregister("w1", false).await.unwrap();

        let mut monitor = HealthMonitor::new(registry.clone(), HealthMonitorConfig {
            heartbeat_timeout: Duration::from_millis(0),
            ..HealthMonitorConfig::default()
        });
        monitor.sweep().await;

        let record = registry.get("w1").await.unwrap();
        assert_eq!(record.status, crate::registry::WorkerStatus::Draining);
    }

    #[tokio::test]
    async fn unreachable_worker_is_removed_after_threshold_failures() {
        let registry = WorkerRegistry::new(CircuitBreakerConfig::default());
        registry
            .register("w1".into(), "llama3".into(), "http://127.0.0.1:1".into(), 10, Map::new())
            .await
            .unwrap();

        let mut monitor = HealthMonitor::new(registry.clone(), HealthMonitorConfig {
            heartbeat_timeout: Duration::from_millis(0),
            probe_timeout: Duration::from_millis(50),
            probe_failures_threshold: 2,
            ..HealthMonitorConfig::default()
        });

        monitor.sweep().await;
        assert!(registry.get("w1").await.is_some());
        monitor.sweep().await;
        assert!(registry.get("w1").await.is_none());
    }
}
