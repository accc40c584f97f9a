//! Error taxonomy for the dispatch fabric.
//!
//! Each variant maps onto one of the categories from the error-handling
//! design — configuration, routing, upstream, transport, or registry — and
//! carries the HTTP status code its category is specified to produce, so the
//! HTTP shells convert it with a single `status_code()` call instead of
//! re-deriving the mapping at each call site.

use std::fmt;

/// Unified error type for the registry, router, and health monitor.
#[derive(Debug, thiserror::Error)]
pub enum FabricError {
    /// Required configuration was missing or invalid at startup.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// No worker is registered, healthy, and available (breaker closed) for
    /// the requested model.
    #[error("no worker available for model: {0}")]
    NoWorkerAvailable(String),

    /// Workers exist and are available but all are at or above capacity.
    #[error("all workers for model {0} are at full capacity")]
    AllWorkersAtCapacity(String),

    /// The backend/worker responded with a non-2xx status.
    #[error("upstream error: status {status}")]
    Upstream { status: u16, body: String },

    /// A transport-level failure (DNS, TCP, timeout) talking to a worker.
    #[error("transport error: {0}")]
    Transport(String),

    /// Registration was attempted with an already-registered worker id.
    #[error("worker already registered: {0}")]
    AlreadyRegistered(String),

    /// An operation referenced a worker id the registry has no record of.
    #[error("worker not found: {0}")]
    NotFound(String),
}

impl FabricError {
    /// HTTP status code this error should be reported to a caller as, per
    /// the error-handling design's propagation policy.
    pub fn status_code(&self) -> http::StatusCode {
        use http::StatusCode;
        match self {
            FabricError::Configuration(_) => StatusCode::INTERNAL_SERVER_ERROR,
            FabricError::NoWorkerAvailable(_) => StatusCode::NOT_FOUND,
            FabricError::AllWorkersAtCapacity(_) => StatusCode::SERVICE_UNAVAILABLE,
            FabricError::Upstream { status, .. } => {
                StatusCode::from_u16(*status).unwrap_or(StatusCode::BAD_GATEWAY)
            }
            FabricError::Transport(_) => StatusCode::BAD_GATEWAY,
            FabricError::AlreadyRegistered(_) => StatusCode::CONFLICT,
            FabricError::NotFound(_) => StatusCode::NOT_FOUND,
        }
    }

    /// Short human-readable detail string suitable for a structured error body.
    pub fn detail(&self) -> String {
        self.to_string()
    }

    /// True for the two routing-layer failures the router itself raises.
    pub fn is_routing(&self) -> bool {
        matches!(self, FabricError::NoWorkerAvailable(_) | FabricError::AllWorkersAtCapacity(_))
    }
}

/// Structured error body returned to API callers.
#[derive(Debug, Clone, serde::Serialize)]
pub struct ErrorBody {
    pub detail: String,
}

impl From<&FabricError> for ErrorBody {
    fn from(err: &FabricError) -> Self {
        ErrorBody { detail: err.detail() }
    }
}

impl fmt::Display for ErrorBody {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.detail)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn no_worker_available_maps_to_404() {
        let err = FabricError::NoWorkerAvailable("llama3".into());
        assert_eq!(err.status_code(), http::StatusCode::NOT_FOUND);
        assert!(err.is_routing());
    }

    #[test]
    fn all_workers_at_capacity_maps_to_503() {
        let err = FabricError::AllWorkersAtCapacity("llama3".into());
        assert_eq!(err.status_code(), http::StatusCode::SERVICE_UNAVAILABLE);
        assert!(err.is_routing());
    }

    #[test]
    fn already_registered_maps_to_409() {
        let err = FabricError::AlreadyRegistered("w1".into());
        assert_eq!(err.status_code(), http::StatusCode::CONFLICT);
        assert!(!err.is_routing());
    }

    #[test]
    fn not_found_maps_to_404() {
        let err = FabricError::NotFound("w1".into());
        assert_eq!(err.status_code(), http::StatusCode::NOT_FOUND);
    }

    #[test]
    fn upstream_preserves_backend_status() {
        let err = FabricError::Upstream { status: 429, body: "rate limited".into() };
        assert_eq!(err.status_code(), http::StatusCode::TOO_MANY_REQUESTS);
    }

    #[test]
    fn error_body_carries_detail() {
        let err = FabricError::NoWorkerAvailable("llama3".into());
        let body = ErrorBody::from(&err);
        assert!(body.detail.contains("llama3"));
    }
}
