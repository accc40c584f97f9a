//! Wire DTOs shared by the Controller and Worker binaries.
//!
//! Supplemented from `llm_gateway/controller/models.py` and
//! `llm_gateway/models/__init__.py`: the distilled spec names the registry
//! protocol's fields but not its serde shape, so these structs are written
//! once here and used by both binaries to keep the wire format in one place.

use crate::registry::{WorkerRecord, WorkerStatus};
use std::collections::HashMap;

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct RegisterRequest {
    pub worker_id: String,
    pub model_id: String,
    pub endpoint: String,
    pub capacity: i64,
    #[serde(default)]
    pub metadata: HashMap<String, String>,
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct RegisterResponse {
    pub worker_id: String,
    pub status: &'static str,
}

impl RegisterResponse {
    pub fn registered(worker_id: String) -> Self {
        Self { worker_id, status: "registered" }
    }
}

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct HeartbeatRequest {
    pub worker_id: String,
    pub current_load: i64,
    pub status: WorkerStatus,
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct HeartbeatResponse {
    pub status: &'static str,
}

impl Default for HeartbeatResponse {
    fn default() -> Self {
        Self { status: "ok" }
    }
}

#[derive(Debug, Clone, serde::Deserialize, serde::Serialize)]
pub struct WorkerView {
    pub worker_id: String,
    pub model_id: String,
    pub endpoint: String,
    pub capacity: i64,
    pub current_load: i64,
    pub status: WorkerStatus,
    pub last_heartbeat: u64,
    pub metadata: HashMap<String, String>,
    pub circuit_state: &'static str,
}

impl From<&WorkerRecord> for WorkerView {
    fn from(record: &WorkerRecord) -> Self {
        use crate::circuit_breaker::CircuitState;
        let circuit_state = match record.circuit_state() {
            CircuitState::Closed => "closed",
            CircuitState::Open => "open",
            CircuitState::HalfOpen => "half_open",
        };
        Self {
            worker_id: record.worker_id.clone(),
            model_id: record.model_id.clone(),
            endpoint: record.endpoint.clone(),
            capacity: record.capacity,
            current_load: record.current_load,
            status: record.status,
            last_heartbeat: record.last_heartbeat,
            metadata: record.metadata.clone(),
            circuit_state,
        }
    }
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct WorkerListResponse {
    pub workers: Vec<WorkerView>,
    pub total: usize,
}

impl From<Vec<WorkerRecord>> for WorkerListResponse {
    fn from(records: Vec<WorkerRecord>) -> Self {
        let workers: Vec<WorkerView> = records.iter().map(WorkerView::from).collect();
        let total = workers.len();
        Self { workers, total }
    }
}

/// Minimal OpenAI-compatible chat-completion request. Only the fields the
/// router needs (`model`, `stream`) are parsed structurally; every other
/// field is preserved untouched in `extra` so the proxy never drops a field
/// it doesn't understand.
#[derive(Debug, Clone, serde::Deserialize, serde::Serialize)]
pub struct ChatCompletionRequest {
    pub model: String,
    #[serde(default)]
    pub stream: bool,
    #[serde(flatten)]
    pub extra: serde_json::Value,
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct ModelsResponse {
    pub models: Vec<String>,
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current_load: Option<i64>,
}

impl HealthResponse {
    pub fn healthy() -> Self {
        Self { status: "healthy", reason: None, current_load: None }
    }

    pub fn healthy_with_load(current_load: i64) -> Self {
        Self { status: "healthy", reason: None, current_load: Some(current_load) }
    }

    pub fn unhealthy(reason: String) -> Self {
        Self { status: "unhealthy", reason: Some(reason), current_load: None }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chat_completion_request_preserves_unknown_fields() {
        let raw = serde_json::json!({
            "model": "llama3",
            "stream": true,
            "messages": [{"role": "user", "content": "hi"}],
            "temperature": 0.7
        });
        let parsed: ChatCompletionRequest = serde_json::from_value(raw.clone()).unwrap();
        assert_eq!(parsed.model, "llama3");
        assert!(parsed.stream);
        let reserialized = serde_json::to_value(&parsed).unwrap();
        assert_eq!(reserialized["temperature"], 0.7);
        assert_eq!(reserialized["messages"], raw["messages"]);
    }

    #[test]
    fn worker_view_reports_lowercase_circuit_state() {
        use crate::circuit_breaker::CircuitBreakerConfig;
        use crate::registry::WorkerRegistry;

        let rt = tokio::runtime::Runtime::new().unwrap();
        rt.block_on(async {
            let registry = WorkerRegistry::new(CircuitBreakerConfig::default());
            registry
                .register("w1".into(), "llama3".into(), "http://x".into(), 10, HashMap::new())
                .await
                .unwrap();
            let record = registry.get("w1").await.unwrap();
            let view = WorkerView::from(&record);
            assert_eq!(view.circuit_state, "closed");
        });
    }
}
