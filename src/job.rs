//! Job lifecycle types.
//!
//! The job state machine:
//!
//! ```text
//!   submit() ──→ Queued ──→ Deployed ──→ Finished
//!                  │  ↑         │
//!                  │  └─ lost ──┤
//!                  │            ├──→ Failed(reason)
//!                  │            │
//!                  └────────────┴──→ Cancelled
//! ```
//!
//! **Invariants:**
//! - `id` and `submitted_at` never change after submission.
//! - `started_at` is set on first deployment and never cleared.
//! - `finished_at` is set exactly once, when the job reaches a terminal state.
//! - `resources.minimum <= resources.desired`, both at least 1.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{SchedError, SchedResult};

/// Unique identifier for a job.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct JobId(pub String);

impl JobId {
    /// Create a new job ID.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }
}

impl std::fmt::Display for JobId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for JobId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for JobId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Job priority. Higher variants are more urgent.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    Idle,
    Lowest,
    Low,
    #[default]
    Normal,
    High,
    Highest,
}

/// Number of resource units a job asks for.
///
/// The engine first tries to grant `desired`, then falls back to `minimum`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceRequest {
    pub desired: u32,
    pub minimum: u32,
}

impl ResourceRequest {
    /// Create a request, checking `1 <= minimum <= desired`.
    pub fn new(desired: u32, minimum: u32) -> SchedResult<Self> {
        let request = Self { desired, minimum };
        request.validate()?;
        Ok(request)
    }

    /// Request exactly `count` units.
    pub fn exact(count: u32) -> SchedResult<Self> {
        Self::new(count, count)
    }

    pub fn validate(&self) -> SchedResult<()> {
        if self.minimum == 0 {
            return Err(SchedError::InvalidJob(
                "minimum resource count must be at least 1".into(),
            ));
        }
        if self.minimum > self.desired {
            return Err(SchedError::InvalidJob(format!(
                "minimum resource count {} exceeds desired count {}",
                self.minimum, self.desired
            )));
        }
        Ok(())
    }
}

impl Default for ResourceRequest {
    fn default() -> Self {
        Self {
            desired: 1,
            minimum: 1,
        }
    }
}

/// When a job has to be done by.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Deadline {
    /// A fixed point in time.
    Absolute(DateTime<Utc>),
    /// A window measured from "now" each time the deadline is resolved.
    Relative(#[serde(with = "humantime_serde")] Duration),
}

/// Status of a job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum JobStatus {
    /// Job is waiting in the pending queue.
    Queued,
    /// Job holds resources and runs on the deployment boundary.
    Deployed,
    /// Job ran to completion and its resources were released.
    Finished,
    /// Job could not be deployed and will not be retried.
    Failed(String),
    /// Job was cancelled by a caller or by an immediate shutdown.
    Cancelled,
}

impl JobStatus {
    /// Check if this is a terminal state.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobStatus::Finished | JobStatus::Failed(_) | JobStatus::Cancelled
        )
    }

    /// Check if the job is still pending (queued or deployed).
    pub fn is_pending(&self) -> bool {
        matches!(self, JobStatus::Queued | JobStatus::Deployed)
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            JobStatus::Queued => write!(f, "Queued"),
            JobStatus::Deployed => write!(f, "Deployed"),
            JobStatus::Finished => write!(f, "Finished"),
            JobStatus::Failed(msg) => write!(f, "Failed: {msg}"),
            JobStatus::Cancelled => write!(f, "Cancelled"),
        }
    }
}

/// What a client submits. The engine turns it into a [`Job`] by stamping
/// the submission time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobSpec {
    pub id: JobId,
    #[serde(default)]
    pub priority: Priority,
    #[serde(default)]
    pub resources: ResourceRequest,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deadline: Option<Deadline>,
    #[serde(
        default,
        with = "humantime_serde",
        skip_serializing_if = "Option::is_none"
    )]
    pub expected_duration: Option<Duration>,
    /// Opaque work description handed to the deployer.
    #[serde(default)]
    pub payload: serde_json::Value,
}

impl JobSpec {
    pub fn new(id: impl Into<JobId>) -> Self {
        Self {
            id: id.into(),
            priority: Priority::default(),
            resources: ResourceRequest::default(),
            deadline: None,
            expected_duration: None,
            payload: serde_json::Value::Null,
        }
    }

    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_resources(mut self, resources: ResourceRequest) -> Self {
        self.resources = resources;
        self
    }

    pub fn with_deadline(mut self, deadline: Deadline) -> Self {
        self.deadline = Some(deadline);
        self
    }

    pub fn with_expected_duration(mut self, duration: Duration) -> Self {
        self.expected_duration = Some(duration);
        self
    }

    pub fn with_payload(mut self, payload: serde_json::Value) -> Self {
        self.payload = payload;
        self
    }
}

/// A unit of work tracked by the engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub id: JobId,
    pub submitted_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
    pub priority: Priority,
    pub resources: ResourceRequest,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deadline: Option<Deadline>,
    #[serde(
        default,
        with = "humantime_serde",
        skip_serializing_if = "Option::is_none"
    )]
    pub expected_duration: Option<Duration>,
    pub status: JobStatus,
    /// Failed deployment attempts and lost deployments so far.
    #[serde(default)]
    pub attempts: u32,
    #[serde(default)]
    pub payload: serde_json::Value,
}

impl Job {
    /// Create a queued job from a [`JobSpec`], submitted at `submitted_at`.
    pub fn new(spec: JobSpec, submitted_at: DateTime<Utc>) -> Self {
        Self {
            id: spec.id,
            submitted_at,
            started_at: None,
            finished_at: None,
            priority: spec.priority,
            resources: spec.resources,
            deadline: spec.deadline,
            expected_duration: spec.expected_duration,
            status: JobStatus::Queued,
            attempts: 0,
            payload: spec.payload,
        }
    }

    /// Record the first deployment. Later deployments keep the original start.
    pub(crate) fn mark_started(&mut self, now: DateTime<Utc>) {
        self.started_at.get_or_insert(now);
        self.status = JobStatus::Deployed;
    }

    /// Move to a terminal status.
    pub(crate) fn mark_terminal(&mut self, status: JobStatus, now: DateTime<Utc>) {
        debug_assert!(status.is_terminal());
        self.finished_at.get_or_insert(now);
        self.status = status;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_job_status_terminal() {
        assert!(!JobStatus::Queued.is_terminal());
        assert!(!JobStatus::Deployed.is_terminal());
        assert!(JobStatus::Finished.is_terminal());
        assert!(JobStatus::Failed("error".into()).is_terminal());
        assert!(JobStatus::Cancelled.is_terminal());
        assert!(JobStatus::Deployed.is_pending());
    }

    #[test]
    fn test_job_status_display() {
        assert_eq!(JobStatus::Queued.to_string(), "Queued");
        assert_eq!(JobStatus::Deployed.to_string(), "Deployed");
        assert_eq!(
            JobStatus::Failed("node lost".into()).to_string(),
            "Failed: node lost"
        );
    }

    #[test]
    fn test_job_id_from() {
        let id: JobId = "job-123".into();
        assert_eq!(id.0, "job-123");
        assert_eq!(id.to_string(), "job-123");
    }

    #[test]
    fn test_priority_order() {
        assert!(Priority::Highest > Priority::High);
        assert!(Priority::High > Priority::Normal);
        assert!(Priority::Low > Priority::Idle);
        assert_eq!(Priority::default(), Priority::Normal);
    }

    #[test]
    fn test_resource_request_bounds() {
        assert!(ResourceRequest::new(5, 2).is_ok());
        assert!(ResourceRequest::exact(3).is_ok());
        assert!(matches!(
            ResourceRequest::new(2, 5),
            Err(SchedError::InvalidJob(_))
        ));
        assert!(matches!(
            ResourceRequest::new(2, 0),
            Err(SchedError::InvalidJob(_))
        ));
    }

    #[test]
    fn test_started_at_is_never_overwritten() {
        let t0 = DateTime::<Utc>::UNIX_EPOCH;
        let mut job = Job::new(JobSpec::new("j1"), t0);
        assert!(job.started_at.is_none());

        job.mark_started(t0 + chrono::TimeDelta::seconds(5));
        job.status = JobStatus::Queued;
        job.mark_started(t0 + chrono::TimeDelta::seconds(9));

        assert_eq!(job.started_at, Some(t0 + chrono::TimeDelta::seconds(5)));
        assert_eq!(job.status, JobStatus::Deployed);
    }

    #[test]
    fn test_spec_deserializes_with_defaults() {
        let spec: JobSpec = serde_json::from_str(
            r#"{"id":"j9","priority":"high","deadline":{"relative":"5s"},"expected_duration":"10s"}"#,
        )
        .unwrap();
        assert_eq!(spec.priority, Priority::High);
        assert_eq!(spec.resources, ResourceRequest::default());
        assert_eq!(spec.deadline, Some(Deadline::Relative(Duration::from_secs(5))));
        assert_eq!(spec.expected_duration, Some(Duration::from_secs(10)));
    }
}
