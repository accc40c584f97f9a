#![forbid(unsafe_code)]

//! # Dispatch Fabric
//!
//! Core library for a two-tier request-dispatch fabric for LLM inference: a
//! Controller that accepts OpenAI-compatible chat-completion requests and
//! routes them to Workers fronting model backends.
//!
//! ## Components
//!
//! - [`circuit_breaker`] — per-worker fault detector, a pure in-memory state
//!   machine over success/failure events.
//! - [`registry`] — concurrent worker registry indexed by worker id and by
//!   model id.
//! - [`health_monitor`] — background task reconciling missed heartbeats.
//! - [`router`] — least-loaded selection guarded by each worker's breaker.
//! - [`schema`] — wire DTOs shared by the Controller and Worker binaries.
//! - [`error`] — the fabric's unified error taxonomy.
//!
//! ## Quick Start
//!
//! ```rust
//! use dispatch_fabric::circuit_breaker::{CircuitBreaker, CircuitBreakerConfig};
//! use dispatch_fabric::registry::WorkerRegistry;
//! use dispatch_fabric::router::Router;
//! use std::collections::HashMap;
//!
//! # #[tokio::main]
//! # async fn main() {
//! let registry = WorkerRegistry::new(CircuitBreakerConfig::default());
//! registry
//!     .register("w1".into(), "llama3".into(), "http://127.0.0.1:9000".into(), 10, HashMap::new())
//!     .await
//!     .unwrap();
//!
//! let router = Router::new(registry);
//! let worker = router.select("llama3").await.unwrap();
//! assert_eq!(worker.worker_id, "w1");
//! # }
//! ```

pub mod backoff;
pub mod circuit_breaker;
pub mod clock;
pub mod error;
pub mod health_monitor;
pub mod registry;
pub mod router;
pub mod schema;

pub mod prelude;
