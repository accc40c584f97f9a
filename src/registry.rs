//! Concurrent worker registry, indexed by worker id and by model id.
//!
//! Grounded in the teacher's `circuit_breaker_registry.rs` shape (an
//! `Arc<Mutex<HashMap<...>>>` registry of handles), generalized here to the
//! two-index structure the fabric needs. Both indices live under one
//! `tokio::sync::Mutex` so every mutator observes and updates them together;
//! there is never a moment where `by_id` and `by_model` can be inconsistent
//! with each other.

use crate::circuit_breaker::{CircuitBreaker, CircuitBreakerConfig, CircuitState};
use crate::error::FabricError;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};
use tokio::sync::Mutex;

/// Liveness/intent status of a registered worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkerStatus {
    Healthy,
    Unhealthy,
    Draining,
}

/// The registry's unit of state. Cheap to clone for snapshotting: the
/// embedded breaker is an `Arc` internally, so a snapshot still observes
/// live breaker transitions made by the router.
#[derive(Debug, Clone)]
pub struct WorkerRecord {
    pub worker_id: String,
    pub model_id: String,
    pub endpoint: String,
    pub capacity: i64,
    pub current_load: i64,
    pub status: WorkerStatus,
    pub last_heartbeat: u64,
    pub metadata: HashMap<String, String>,
    breaker: CircuitBreaker,
}

impl WorkerRecord {
    /// `current_load / capacity`, or `f64::INFINITY` for a non-positive
    /// capacity so such a worker is never picked as least-loaded.
    pub fn load_ratio(&self) -> f64 {
        if self.capacity <= 0 {
            f64::INFINITY
        } else {
            self.current_load as f64 / self.capacity as f64
        }
    }

    pub fn circuit_state(&self) -> CircuitState {
        self.breaker.state()
    }

    pub fn breaker(&self) -> &CircuitBreaker {
        &self.breaker
    }

    /// `status = healthy ∧ breaker ≠ open` per the registry's derived
    /// `available` attribute. Does not itself probe the half-open
    /// transition; callers that need that call `breaker().is_available()`.
    pub fn available(&self) -> bool {
        self.status == WorkerStatus::Healthy && self.breaker.state() != CircuitState::Open
    }
}

struct RegistryInner {
    by_id: HashMap<String, WorkerRecord>,
    by_model: HashMap<String, HashSet<String>>,
}

impl RegistryInner {
    fn new() -> Self {
        Self { by_id: HashMap::new(), by_model: HashMap::new() }
    }

    fn remove_from_model_index(&mut self, model_id: &str, worker_id: &str) {
        if let Some(ids) = self.by_model.get_mut(model_id) {
            ids.remove(worker_id);
            if ids.is_empty() {
                self.by_model.remove(model_id);
            }
        }
    }
}

/// Concurrent map of worker identity to worker record, indexed both by
/// worker id and by the model the worker serves.
#[derive(Clone)]
pub struct WorkerRegistry {
    inner: Arc<Mutex<RegistryInner>>,
    breaker_config: CircuitBreakerConfig,
}

fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

impl WorkerRegistry {
    pub fn new(breaker_config: CircuitBreakerConfig) -> Self {
        Self { inner: Arc::new(Mutex::new(RegistryInner::new())), breaker_config }
    }

    /// Register a new worker. Fails with `AlreadyRegistered` if `worker_id`
    /// is already present; the registry never holds two records for the
    /// same id. `last_heartbeat` is seeded to the current time.
    pub async fn register(
        &self,
        worker_id: String,
        model_id: String,
        endpoint: String,
        capacity: i64,
        metadata: HashMap<String, String>,
    ) -> Result<(), FabricError> {
        let mut inner = self.inner.lock().await;
        if inner.by_id.contains_key(&worker_id) {
            return Err(FabricError::AlreadyRegistered(worker_id));
        }
        let record = WorkerRecord {
            worker_id: worker_id.clone(),
            model_id: model_id.clone(),
            endpoint,
            capacity,
            current_load: 0,
            status: WorkerStatus::Healthy,
            last_heartbeat: now_millis(),
            metadata,
            breaker: CircuitBreaker::new(self.breaker_config.clone()),
        };
        inner.by_model.entry(model_id).or_default().insert(worker_id.clone());
        inner.by_id.insert(worker_id, record);
        Ok(())
    }

    /// Soft (`force = false`) or hard (`force = true`) deregistration.
    /// Soft deregistration sets `status ← draining` and retains the record;
    /// hard deregistration removes it from both indices and prunes any
    /// emptied model bucket.
    pub async fn unregister(&self, worker_id: &str, force: bool) -> Result<(), FabricError> {
        let mut inner = self.inner.lock().await;
        if force {
            let record = inner
                .by_id
                .remove(worker_id)
                .ok_or_else(|| FabricError::NotFound(worker_id.to_string()))?;
            inner.remove_from_model_index(&record.model_id, worker_id);
            Ok(())
        } else {
            let record = inner
                .by_id
                .get_mut(worker_id)
                .ok_or_else(|| FabricError::NotFound(worker_id.to_string()))?;
            record.status = WorkerStatus::Draining;
            Ok(())
        }
    }

    /// Update `current_load`, `status`, and `last_heartbeat` for a worker.
    /// A worker may heartbeat itself into `draining`.
    pub async fn heartbeat(
        &self,
        worker_id: &str,
        current_load: i64,
        status: WorkerStatus,
    ) -> Result<(), FabricError> {
        let mut inner = self.inner.lock().await;
        let record = inner
            .by_id
            .get_mut(worker_id)
            .ok_or_else(|| FabricError::NotFound(worker_id.to_string()))?;
        record.current_load = current_load;
        record.status = status;
        record.last_heartbeat = now_millis();
        Ok(())
    }

    /// Snapshot of records for a single model. Possibly empty.
    pub async fn workers_for(&self, model_id: &str) -> Vec<WorkerRecord> {
        let inner = self.inner.lock().await;
        match inner.by_model.get(model_id) {
            Some(ids) => ids.iter().filter_map(|id| inner.by_id.get(id).cloned()).collect(),
            None => Vec::new(),
        }
    }

    /// Snapshot of all records, optionally filtered by model id.
    pub async fn list(&self, model_id: Option<&str>) -> Vec<WorkerRecord> {
        match model_id {
            Some(m) => self.workers_for(m).await,
            None => {
                let inner = self.inner.lock().await;
                inner.by_id.values().cloned().collect()
            }
        }
    }

    /// Fetch a single record by id, if present.
    pub async fn get(&self, worker_id: &str) -> Option<WorkerRecord> {
        let inner = self.inner.lock().await;
        inner.by_id.get(worker_id).cloned()
    }

    /// Best-effort status transition to `unhealthy`; no-op if absent. Does
    /// not touch the worker's breaker.
    pub async fn mark_unhealthy(&self, worker_id: &str) {
        let mut inner = self.inner.lock().await;
        if let Some(record) = inner.by_id.get_mut(worker_id) {
            record.status = WorkerStatus::Unhealthy;
        }
    }

    /// Unconditional delete; no-op if absent.
    pub async fn remove(&self, worker_id: &str) {
        let mut inner = self.inner.lock().await;
        if let Some(record) = inner.by_id.remove(worker_id) {
            inner.remove_from_model_index(&record.model_id, worker_id);
        }
    }

    /// Distinct model ids currently served by at least one worker.
    pub async fn model_ids(&self) -> Vec<String> {
        let inner = self.inner.lock().await;
        inner.by_model.keys().cloned().collect()
    }
}
