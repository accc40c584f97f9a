//! Least-loaded worker selection guarded by each candidate's circuit breaker.
//!
//! The breaker map the teacher's `circuit_breaker_registry.rs` owns
//! independently of worker lifetime is, here, folded into the registry: a
//! `WorkerRecord`'s breaker is created at `register()` and destroyed with
//! the record, so the router holds no breaker map of its own — it only
//! reads the breaker off whatever snapshot the registry hands it.

use crate::error::FabricError;
use crate::registry::{WorkerRecord, WorkerRegistry, WorkerStatus};

/// Selection layer. Stateless beyond its registry handle: all breaker state
/// lives on the `WorkerRecord`s the registry returns.
#[derive(Clone)]
pub struct Router {
    registry: WorkerRegistry,
}

impl Router {
    pub fn new(registry: WorkerRegistry) -> Self {
        Self { registry }
    }

    /// Select a worker for `model_id` per the least-loaded policy:
    /// snapshot candidates, filter to healthy-and-breaker-available, filter
    /// to under-capacity, return the minimum load-ratio record.
    pub async fn select(&self, model_id: &str) -> Result<WorkerRecord, FabricError> {
        let candidates = self.registry.workers_for(model_id).await;
        if candidates.is_empty() {
            return Err(FabricError::NoWorkerAvailable(model_id.to_string()));
        }

        let available: Vec<WorkerRecord> = candidates
            .into_iter()
            .filter(|w| w.status == WorkerStatus::Healthy && w.breaker().is_available())
            .collect();
        if available.is_empty() {
            return Err(FabricError::NoWorkerAvailable(model_id.to_string()));
        }

        let (under_capacity, over_capacity): (Vec<WorkerRecord>, Vec<WorkerRecord>) =
            available.into_iter().partition(|w| w.current_load < w.capacity);

        // A candidate's breaker may have just been admitted as a half-open
        // probe by the `is_available()` filter above. If it's discarded here
        // it will never be sent a request, so its breaker would otherwise
        // wait forever for a `record_success`/`record_failure` that never
        // comes — release the probe so a later call can try again.
        for worker in &over_capacity {
            worker.breaker().release_wasted_probe();
        }

        if under_capacity.is_empty() {
            return Err(FabricError::AllWorkersAtCapacity(model_id.to_string()));
        }

        let best = under_capacity
            .into_iter()
            .min_by(|a, b| {
                a.load_ratio()
                    .partial_cmp(&b.load_ratio())
                    .unwrap()
                    .then_with(|| a.worker_id.cmp(&b.worker_id))
            })
            .expect("under_capacity is non-empty");
        Ok(best)
    }

    /// Record a successful call against `worker_id`'s breaker. No-op if the
    /// worker has since been removed.
    pub async fn record_success(&self, worker_id: &str) {
        if let Some(record) = self.registry.get(worker_id).await {
            record.breaker().record_success();
        }
    }

    /// Record a failed call against `worker_id`'s breaker. No-op if the
    /// worker has since been removed.
    pub async fn record_failure(&self, worker_id: &str) {
        if let Some(record) = self.registry.get(worker_id).await {
            record.breaker().record_failure();
        }
    }
}
