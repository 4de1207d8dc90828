//! Scheduling error types.
//!
//! Errors are categorized by who has to act on them:
//!
//! | Category | Variants | Recovery |
//! |----------|----------|----------|
//! | **Caller** | `DuplicateId`, `NotFound`, `QueueFull`, `InvalidJob`, `ShuttingDown` | Fix the request |
//! | **Boundary** | `ResourceUnavailable`, `DeploymentFailure`, `Timeout`, `Notification` | Local to one job, retried on a later tick |
//! | **Config** | `Configuration` | Fix configuration |
//! | **Fatal** | `InvariantViolation` | Stop the engine for operator intervention |
//! | **Handle** | `Closed` | The control loop is gone |

use thiserror::Error;

use crate::job::JobId;

/// Errors that can occur in scheduling operations.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum SchedError {
    // ── Caller errors ────────────────────────────────────────────────
    /// A job with the same id is already known to the engine.
    #[error("Duplicate job id: {0}")]
    DuplicateId(JobId),

    /// No queued or deployed job has this id.
    #[error("Job not found: {0}")]
    NotFound(JobId),

    /// The pending queue reached its configured bound.
    #[error("Pending queue is full ({0} jobs)")]
    QueueFull(usize),

    /// The submitted job is malformed.
    #[error("Invalid job: {0}")]
    InvalidJob(String),

    /// The engine no longer accepts work.
    #[error("Scheduler is shutting down")]
    ShuttingDown,

    // ── Boundary errors (local to one job) ───────────────────────────
    /// Resources were refused, even at the minimum count.
    #[error("Resources unavailable: {0}")]
    ResourceUnavailable(String),

    /// The deployment boundary failed after resources were reserved.
    #[error("Deployment failed: {0}")]
    DeploymentFailure(String),

    /// A boundary call did not answer in time.
    #[error("Timeout: {0}")]
    Timeout(String),

    /// The notification boundary refused a warning.
    #[error("Notification failed: {0}")]
    Notification(String),

    // ── Config errors ────────────────────────────────────────────────
    /// Configuration error (fix configuration).
    #[error("Configuration error: {0}")]
    Configuration(String),

    // ── Fatal ────────────────────────────────────────────────────────
    /// Internal bookkeeping is inconsistent; the engine must stop.
    #[error("Invariant violated: {0}")]
    InvariantViolation(String),

    /// The control loop has exited and can no longer serve requests.
    #[error("Scheduler control loop is closed")]
    Closed,
}

impl SchedError {
    /// Returns `true` if the operation may succeed when retried on a later pass.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::ResourceUnavailable(_) | Self::Timeout(_))
    }

    /// Returns `true` if the engine must stop scheduling.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::InvariantViolation(_))
    }
}

/// Result type for scheduling operations.
pub type SchedResult<T> = Result<T, SchedError>;
