//! Cross-module integration tests exercising the registry, breaker, and
//! router together, covering the testable scenarios named in the fabric's
//! design (least-loaded selection, capacity exhaustion, breaker routing
//! around a flapping worker, heartbeat resurrection, and draining).

use dispatch_fabric::circuit_breaker::CircuitBreakerConfig;
use dispatch_fabric::error::FabricError;
use dispatch_fabric::registry::{WorkerRegistry, WorkerStatus};
use dispatch_fabric::router::Router;
use std::collections::HashMap;
use std::time::Duration;

async fn register(registry: &WorkerRegistry, id: &str, model: &str, capacity: i64, load: i64) {
    registry
        .register(id.to_string(), model.to_string(), "http://127.0.0.1:9000".into(), capacity, HashMap::new())
        .await
        .unwrap();
    registry.heartbeat(id, load, WorkerStatus::Healthy).await.unwrap();
}

#[tokio::test]
async fn s1_least_loaded_selection() {
    let registry = WorkerRegistry::new(CircuitBreakerConfig::default());
    register(&registry, "w1", "llama3", 10, 5).await;
    register(&registry, "w2", "llama3", 10, 2).await;

    let router = Router::new(registry);
    let chosen = router.select("llama3").await.unwrap();
    assert_eq!(chosen.worker_id, "w2");
}

#[tokio::test]
async fn s2_capacity_exhaustion() {
    let registry = WorkerRegistry::new(CircuitBreakerConfig::default());
    register(&registry, "w1", "llama3", 10, 10).await;

    let router = Router::new(registry);
    let err = router.select("llama3").await.unwrap_err();
    assert!(matches!(err, FabricError::AllWorkersAtCapacity(model) if model == "llama3"));
}

#[tokio::test]
async fn s3_breaker_opens_and_routes_around() {
    let registry = WorkerRegistry::new(CircuitBreakerConfig {
        failure_threshold: 5,
        recovery_timeout: Duration::from_secs(30),
    });
    register(&registry, "w1", "llama3", 10, 0).await;
    register(&registry, "w2", "llama3", 10, 0).await;

    let router = Router::new(registry);
    for _ in 0..5 {
        router.record_failure("w1").await;
    }

    for _ in 0..3 {
        let chosen = router.select("llama3").await.unwrap();
        assert_eq!(chosen.worker_id, "w2", "should keep routing around the open breaker");
    }
}

#[tokio::test]
async fn s4_heartbeat_resurrects_load() {
    let registry = WorkerRegistry::new(CircuitBreakerConfig::default());
    registry
        .register("w1".into(), "llama3".into(), "http://127.0.0.1:9000".into(), 10, HashMap::new())
        .await
        .unwrap();

    registry.heartbeat("w1", 5, WorkerStatus::Healthy).await.unwrap();

    let records = registry.list(None).await;
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].current_load, 5);
}

#[tokio::test]
async fn s5_draining_excludes_from_routing_but_preserves_record() {
    let registry = WorkerRegistry::new(CircuitBreakerConfig::default());
    register(&registry, "w1", "llama3", 10, 0).await;
    registry.unregister("w1", false).await.unwrap();

    let record = registry.get("w1").await.unwrap();
    assert_eq!(record.status, WorkerStatus::Draining);

    let router = Router::new(registry);
    let err = router.select("llama3").await.unwrap_err();
    assert!(matches!(err, FabricError::NoWorkerAvailable(_)));
}

#[tokio::test]
async fn register_then_force_unregister_returns_to_empty_registry() {
    let registry = WorkerRegistry::new(CircuitBreakerConfig::default());
    register(&registry, "w1", "llama3", 10, 0).await;
    registry.unregister("w1", true).await.unwrap();

    assert!(registry.get("w1").await.is_none());
    assert!(registry.model_ids().await.is_empty());
}

#[tokio::test]
async fn immutable_fields_survive_heartbeats() {
    let registry = WorkerRegistry::new(CircuitBreakerConfig::default());
    registry
        .register("w1".into(), "llama3".into(), "http://127.0.0.1:9000".into(), 10, HashMap::new())
        .await
        .unwrap();

    for load in [1, 2, 3, 4] {
        registry.heartbeat("w1", load, WorkerStatus::Healthy).await.unwrap();
        let record = registry.get("w1").await.unwrap();
        assert_eq!(record.model_id, "llama3");
        assert_eq!(record.endpoint, "http://127.0.0.1:9000");
        assert_eq!(record.capacity, 10);
    }
}
