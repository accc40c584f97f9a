//! Environment-driven configuration for the Controller binary.
//!
//! Mirrors the teacher's validate-then-fail-fast style: every field maps to
//! one `clap` `env` attribute, and `ControllerConfig::load` is the single
//! point where a missing or malformed value becomes a fatal startup error.

use dispatch_fabric::error::FabricError;
use std::time::Duration;

#[derive(Debug, Clone, clap::Parser)]
#[command(name = "dispatch-fabric-controller")]
pub struct ControllerConfig {
    /// Interface the Controller's HTTP server binds to.
    #[arg(long, env = "HOST", default_value = "0.0.0.0")]
    pub host: String,

    /// Port the Controller's HTTP server binds to.
    #[arg(long, env = "PORT", default_value_t = 8080)]
    pub port: u16,

    /// Shared bearer token required on `/internal/workers/*` routes. Unset
    /// leaves those routes open.
    #[arg(long, env = "INTERNAL_API_KEY")]
    pub internal_api_key: Option<String>,

    /// Seconds since last heartbeat before a worker is considered stale.
    #[arg(long, env = "HEARTBEAT_TIMEOUT", default_value_t = 60)]
    pub heartbeat_timeout_secs: u64,

    /// Seconds between HealthMonitor sweeps.
    #[arg(long, env = "HEARTBEAT_CHECK_INTERVAL", default_value_t = 10)]
    pub heartbeat_check_interval_secs: u64,

    /// Consecutive failed probes before a stale worker is removed outright.
    #[arg(long, env = "PROBE_FAILURES_THRESHOLD", default_value_t = 3)]
    pub probe_failures_threshold: usize,

    /// Circuit breaker failure threshold shared by every worker's breaker.
    #[arg(long, env = "CIRCUIT_BREAKER_FAILURE_THRESHOLD", default_value_t = 5)]
    pub circuit_breaker_failure_threshold: usize,

    /// Circuit breaker recovery timeout, in seconds.
    #[arg(long, env = "CIRCUIT_BREAKER_RECOVERY_TIMEOUT", default_value_t = 30)]
    pub circuit_breaker_recovery_timeout_secs: u64,
}

impl ControllerConfig {
    pub fn load() -> Result<Self, FabricError> {
        let config = <Self as clap::Parser>::parse();
        if config.port == 0 {
            return Err(FabricError::Configuration("PORT must be nonzero".into()));
        }
        Ok(config)
    }

    pub fn heartbeat_timeout(&self) -> Duration {
        Duration::from_secs(self.heartbeat_timeout_secs)
    }

    pub fn heartbeat_check_interval(&self) -> Duration {
        Duration::from_secs(self.heartbeat_check_interval_secs)
    }

    pub fn circuit_breaker_recovery_timeout(&self) -> Duration {
        Duration::from_secs(self.circuit_breaker_recovery_timeout_secs)
    }
}
