//! Deadline and finish-time estimates resolved against one "now".
//!
//! Every ordering pass and every deadline check resolves all jobs against the
//! same instant, so relative deadlines and expected finishes stay comparable
//! across candidates.

use std::cmp::Ordering;
use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};

use crate::job::{Deadline, Job};

/// `instant + duration`, saturating at the end of representable time.
pub fn add_duration(instant: DateTime<Utc>, duration: Duration) -> DateTime<Utc> {
    TimeDelta::from_std(duration)
        .ok()
        .and_then(|delta| instant.checked_add_signed(delta))
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}

/// Resolve a deadline at `now`.
pub fn resolve_deadline(deadline: Deadline, now: DateTime<Utc>) -> DateTime<Utc> {
    match deadline {
        Deadline::Absolute(at) => at,
        Deadline::Relative(window) => add_duration(now, window),
    }
}

/// The job's deadline at `now`. `None` stands for "infinitely far".
pub fn effective_deadline(job: &Job, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
    job.deadline.map(|deadline| resolve_deadline(deadline, now))
}

/// When the job would finish if it started at `now`. Jobs without an
/// estimate are assumed to finish immediately.
pub fn effective_expected_finish(job: &Job, now: DateTime<Utc>) -> DateTime<Utc> {
    match job.expected_duration {
        Some(duration) => add_duration(now, duration),
        None => now,
    }
}

/// Margin between deadline and expected finish. `None` when the job has no
/// deadline, i.e. infinite slack. Negative slack means the deadline is
/// already out of reach.
pub fn slack(job: &Job, now: DateTime<Utc>) -> Option<TimeDelta> {
    let deadline = effective_deadline(job, now)?;
    Some(deadline.signed_duration_since(effective_expected_finish(job, now)))
}

/// Earlier deadlines first, missing deadlines last.
pub fn cmp_deadlines(a: Option<DateTime<Utc>>, b: Option<DateTime<Utc>>) -> Ordering {
    match (a, b) {
        (Some(a), Some(b)) => a.cmp(&b),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    }
}
