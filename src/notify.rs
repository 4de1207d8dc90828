//! Deadline-miss notification boundary.
//!
//! The engine only decides *when* a warning fires. Delivering it (mail, chat,
//! pager) belongs to whoever implements [`DeadlineNotifier`].

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::SchedResult;
use crate::job::JobId;

/// A job whose deadline falls before its expected finish.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeadlineWarning {
    pub job_id: JobId,
    /// Effective deadline at the time of the check.
    pub deadline: DateTime<Utc>,
    /// Effective expected finish at the time of the check.
    pub expected_finish: DateTime<Utc>,
    /// Whether `expected_finish` came from a duration estimate or is just "now".
    pub has_duration_estimate: bool,
}

impl DeadlineWarning {
    /// How far past the deadline the job is expected to finish.
    pub fn overrun(&self) -> chrono::TimeDelta {
        self.expected_finish.signed_duration_since(self.deadline)
    }
}

impl std::fmt::Display for DeadlineWarning {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "job {} will likely miss its deadline {} (expected finish {}",
            self.job_id,
            self.deadline.to_rfc3339(),
            self.expected_finish.to_rfc3339()
        )?;
        if !self.has_duration_estimate {
            write!(f, ", no duration estimate")?;
        }
        write!(f, ")")
    }
}

/// Receives deadline-miss warnings.
#[async_trait]
pub trait DeadlineNotifier: Send + Sync {
    async fn notify_likely_missed_deadline(&self, warning: &DeadlineWarning) -> SchedResult<()>;
}

/// Notifier that only writes a `tracing` warning.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogNotifier;

#[async_trait]
impl DeadlineNotifier for LogNotifier {
    async fn notify_likely_missed_deadline(&self, warning: &DeadlineWarning) -> SchedResult<()> {
        tracing::warn!(
            job_id = %warning.job_id,
            deadline = %warning.deadline,
            expected_finish = %warning.expected_finish,
            overrun_secs = warning.overrun().num_seconds(),
            has_duration_estimate = warning.has_duration_estimate,
            "Job will likely miss its deadline"
        );
        Ok(())
    }
}

/// Notifier that keeps every warning it receives.
#[derive(Debug, Clone, Default)]
pub struct RecordingNotifier {
    warnings: Arc<Mutex<Vec<DeadlineWarning>>>,
}

impl RecordingNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    /// All warnings received so far.
    pub fn warnings(&self) -> Vec<DeadlineWarning> {
        self.warnings
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// Warnings received for one job.
    pub fn warnings_for(&self, job_id: &JobId) -> usize {
        self.warnings
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .filter(|w| &w.job_id == job_id)
            .count()
    }
}

#[async_trait]
impl DeadlineNotifier for RecordingNotifier {
    async fn notify_likely_missed_deadline(&self, warning: &DeadlineWarning) -> SchedResult<()> {
        self.warnings
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(warning.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeDelta;

    use super::*;

    fn warning(id: &str) -> DeadlineWarning {
        let deadline = DateTime::<Utc>::UNIX_EPOCH + TimeDelta::seconds(5);
        DeadlineWarning {
            job_id: JobId::new(id),
            deadline,
            expected_finish: deadline + TimeDelta::seconds(5),
            has_duration_estimate: true,
        }
    }

    #[tokio::test]
    async fn test_recording_notifier_keeps_warnings() {
        let notifier = RecordingNotifier::new();
        let shared = notifier.clone();
        notifier
            .notify_likely_missed_deadline(&warning("j1"))
            .await
            .unwrap();
        notifier
            .notify_likely_missed_deadline(&warning("j2"))
            .await
            .unwrap();

        assert_eq!(shared.warnings().len(), 2);
        assert_eq!(shared.warnings_for(&JobId::new("j1")), 1);
    }

    #[test]
    fn test_warning_overrun_and_display() {
        let w = warning("j1");
        assert_eq!(w.overrun(), TimeDelta::seconds(5));
        assert!(w.to_string().starts_with("job j1 will likely miss its deadline"));
    }
}
