//! Environment-driven configuration for the Worker binary. Startup must fail
//! if `WORKER_ID`, `MODEL_ID`, or `BACKEND_URL` is unset, per the
//! configuration surface's fail-fast requirement.

use dispatch_fabric::error::FabricError;
use std::time::Duration;

#[derive(Debug, Clone, clap::Parser)]
#[command(name = "dispatch-fabric-worker")]
pub struct WorkerConfig {
    /// Interface the Worker's own HTTP server binds to.
    #[arg(long, env = "HOST", default_value = "0.0.0.0")]
    pub host: String,

    /// Port the Worker's own HTTP server binds to.
    #[arg(long, env = "PORT", default_value_t = 8081)]
    pub port: u16,

    /// Unique identity advertised to the Controller. Required.
    #[arg(long, env = "WORKER_ID")]
    pub worker_id: Option<String>,

    /// Model tag this worker serves. Required.
    #[arg(long, env = "MODEL_ID")]
    pub model_id: Option<String>,

    /// Base URL of the Controller to register and heartbeat against.
    #[arg(long, env = "CONTROLLER_URL")]
    pub controller_url: String,

    /// Base URL of the model-serving backend this worker fronts. Required.
    #[arg(long, env = "BACKEND_URL")]
    pub backend_url: Option<String>,

    /// URL the Controller should use to reach this worker. Defaults to
    /// `http://localhost:{port}`, suitable only for single-host deployments.
    #[arg(long, env = "SELF_ENDPOINT")]
    pub self_endpoint: Option<String>,

    /// Advertised maximum concurrent requests.
    #[arg(long, env = "CAPACITY", default_value_t = 10)]
    pub capacity: i64,

    /// Seconds between heartbeats sent to the Controller.
    #[arg(long, env = "HEARTBEAT_INTERVAL", default_value_t = 10)]
    pub heartbeat_interval_secs: u64,

    /// Maximum registration attempts before startup fails.
    #[arg(long, env = "REGISTRY_RETRY_COUNT", default_value_t = 30)]
    pub registry_retry_count: usize,

    /// Initial registration retry delay, in seconds, doubled each attempt
    /// and capped at 60s.
    #[arg(long, env = "REGISTRY_RETRY_DELAY", default_value_t = 5)]
    pub registry_retry_delay_secs: u64,
}

impl WorkerConfig {
    pub fn load() -> Result<Self, FabricError> {
        let config = <Self as clap::Parser>::parse();
        if config.worker_id.as_deref().unwrap_or("").is_empty() {
            return Err(FabricError::Configuration("WORKER_ID is required".into()));
        }
        if config.model_id.as_deref().unwrap_or("").is_empty() {
            return Err(FabricError::Configuration("MODEL_ID is required".into()));
        }
        if config.backend_url.as_deref().unwrap_or("").is_empty() {
            return Err(FabricError::Configuration("BACKEND_URL is required".into()));
        }
        Ok(config)
    }

    pub fn worker_id(&self) -> String {
        self.worker_id.clone().expect("validated by load()")
    }

    pub fn model_id(&self) -> String {
        self.model_id.clone().expect("validated by load()")
    }

    pub fn backend_url(&self) -> String {
        self.backend_url.clone().expect("validated by load()")
    }

    pub fn self_endpoint(&self) -> String {
        self.self_endpoint.clone().unwrap_or_else(|| format!("http://localhost:{}", self.port))
    }

    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_secs(self.heartbeat_interval_secs)
    }

    pub fn registry_retry_delay(&self) -> Duration {
        Duration::from_secs(self.registry_retry_delay_secs)
    }
}
