//! Engine configuration.
//!
//! Read from TOML; every field has a default, so an empty document is a
//! valid configuration:
//!
//! ```toml
//! policy = "mixed(space, fifo)"
//! boundary_timeout = "30s"
//! liveness_interval = "2s"
//! max_attempts = 3
//! warning_cooldown = "5m"
//! ```

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{SchedError, SchedResult};
use crate::policy::Policy;
use crate::queue::DEFAULT_MAX_PENDING;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct EngineConfig {
    /// Ordering policy, e.g. `fifo` or `mixed(space, time)`.
    pub policy: Policy,
    /// Upper bound on every resource manager, deployer and notifier call.
    #[serde(with = "humantime_serde")]
    pub boundary_timeout: Duration,
    /// Minimum time between two liveness sweeps.
    #[serde(with = "humantime_serde")]
    pub liveness_interval: Duration,
    /// Pause between two iterations of the control loop.
    #[serde(with = "humantime_serde")]
    pub loop_interval: Duration,
    pub max_pending: usize,
    /// Deployment attempts before a job is failed for good.
    pub max_attempts: u32,
    /// Consecutive probe errors before a deployment counts as lost.
    pub max_probe_failures: u32,
    /// Suppress repeat deadline warnings for the same job within this window.
    #[serde(with = "humantime_serde", skip_serializing_if = "Option::is_none")]
    pub warning_cooldown: Option<Duration>,
    /// Resolve relative deadlines once, at submission.
    pub freeze_relative_deadlines: bool,
    /// Terminal jobs kept around for status queries.
    pub finished_retention: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            policy: Policy::Fifo,
            boundary_timeout: Duration::from_secs(30),
            liveness_interval: Duration::ZERO,
            loop_interval: Duration::from_millis(50),
            max_pending: DEFAULT_MAX_PENDING,
            max_attempts: 3,
            max_probe_failures: 3,
            warning_cooldown: None,
            freeze_relative_deadlines: false,
            finished_retention: 1000,
        }
    }
}

impl EngineConfig {
    pub fn with_policy(mut self, policy: Policy) -> Self {
        self.policy = policy;
        self
    }

    pub fn from_toml_str(s: &str) -> SchedResult<Self> {
        let config: Self =
            toml::from_str(s).map_err(|e| SchedError::Configuration(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: impl AsRef<Path>) -> SchedResult<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            SchedError::Configuration(format!("cannot read {}: {e}", path.display()))
        })?;
        Self::from_toml_str(&content)
    }

    pub fn validate(&self) -> SchedResult<()> {
        if self.boundary_timeout.is_zero() {
            return Err(SchedError::Configuration(
                "boundary_timeout must be positive".into(),
            ));
        }
        if self.max_attempts == 0 {
            return Err(SchedError::Configuration(
                "max_attempts must be at least 1".into(),
            ));
        }
        if self.max_probe_failures == 0 {
            return Err(SchedError::Configuration(
                "max_probe_failures must be at least 1".into(),
            ));
        }
        if self.max_pending == 0 {
            return Err(SchedError::Configuration(
                "max_pending must be at least 1".into(),
            ));
        }
        Ok(())
    }
}
