//! Convenient re-exports for common dispatch-fabric types.
pub use crate::{
    backoff::Backoff,
    circuit_breaker::{CircuitBreaker, CircuitBreakerConfig, CircuitState},
    clock::{Clock, MonotonicClock},
    error::{ErrorBody, FabricError},
    health_monitor::{HealthMonitor, HealthMonitorConfig},
    registry::{WorkerRecord, WorkerRegistry, WorkerStatus},
    router::Router,
    schema::{
        ChatCompletionRequest, HealthResponse, HeartbeatRequest, HeartbeatResponse,
        ModelsResponse, RegisterRequest, RegisterResponse, WorkerListResponse, WorkerView,
    },
};
