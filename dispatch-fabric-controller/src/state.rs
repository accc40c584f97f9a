//! Shared Controller state, built once in `main` and threaded through axum's
//! `State` extractor — no global singletons, per the teacher's own design
//! note that module-level statics should be replaced with an explicit
//! context value constructed at startup.

use dispatch_fabric::registry::WorkerRegistry;
use dispatch_fabric::router::Router;

#[derive(Clone)]
pub struct AppState {
    pub registry: WorkerRegistry,
    pub router: Router,
    pub http: reqwest::Client,
    pub internal_token: Option<String>,
}
