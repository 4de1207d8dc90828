//! Deadline-aware ordering.
//!
//! Both comparators produce a total order over the pending set for one
//! `now`, so candidates are sorted once per pass instead of being compared
//! pairwise while the clock moves.
//!
//! ```text
//!   extended:  priority ─→ has deadline? ─┬─ neither: submitted_at
//!                                         └─ both:    started? ─┬─ both:    started_at
//!                                                               ├─ one:     started first
//!                                                               └─ neither: slack
//!   simple:    priority ─→ effective deadline (missing = infinitely far)
//! ```
//!
//! Remaining ties fall back to submission time, then id, so the order is
//! deterministic.

use std::cmp::Ordering;

use chrono::{DateTime, TimeDelta, Utc};

use crate::job::Job;
use crate::timing::{cmp_deadlines, effective_deadline, slack};

/// Priority first, then earliest effective deadline.
pub fn compare(a: &Job, b: &Job, now: DateTime<Utc>) -> Ordering {
    b.priority
        .cmp(&a.priority)
        .then_with(|| cmp_deadlines(effective_deadline(a, now), effective_deadline(b, now)))
        .then_with(|| tie_break(a, b))
}

/// Priority first, then deadline presence, execution state and slack.
pub fn compare_extended(a: &Job, b: &Job, now: DateTime<Utc>) -> Ordering {
    b.priority
        .cmp(&a.priority)
        .then_with(|| match (a.deadline.is_some(), b.deadline.is_some()) {
            (true, false) => Ordering::Less,
            (false, true) => Ordering::Greater,
            (false, false) => a.submitted_at.cmp(&b.submitted_at),
            (true, true) => compare_with_deadlines(a, b, now),
        })
        .then_with(|| tie_break(a, b))
}

fn compare_with_deadlines(a: &Job, b: &Job, now: DateTime<Utc>) -> Ordering {
    match (a.started_at, b.started_at) {
        (Some(a_start), Some(b_start)) => a_start.cmp(&b_start),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => cmp_slack(slack(a, now), slack(b, now)),
    }
}

/// Smaller slack first; `None` is infinite slack.
fn cmp_slack(a: Option<TimeDelta>, b: Option<TimeDelta>) -> Ordering {
    match (a, b) {
        (Some(a), Some(b)) => a.cmp(&b),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    }
}

fn tie_break(a: &Job, b: &Job) -> Ordering {
    a.submitted_at
        .cmp(&b.submitted_at)
        .then_with(|| a.id.cmp(&b.id))
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::job::{Deadline, JobSpec, Priority};

    fn t(secs: i64) -> DateTime<Utc> {
        DateTime::<Utc>::UNIX_EPOCH + TimeDelta::seconds(secs)
    }

    fn at(spec: JobSpec, submitted: i64) -> Job {
        Job::new(spec, t(submitted))
    }

    #[test]
    fn test_priority_dominates_deadline() {
        let now = t(100);
        let high = at(JobSpec::new("high").with_priority(Priority::High), 0);
        let urgent = at(
            JobSpec::new("urgent").with_deadline(Deadline::Relative(Duration::from_secs(1))),
            0,
        );
        assert_eq!(compare_extended(&high, &urgent, now), Ordering::Less);
        assert_eq!(compare(&high, &urgent, now), Ordering::Less);
    }

    #[test]
    fn test_deadline_presence_wins_in_extended() {
        let now = t(0);
        let with = at(
            JobSpec::new("with").with_deadline(Deadline::Absolute(t(10))),
            5,
        );
        let without = at(JobSpec::new("without"), 0);
        assert_eq!(compare_extended(&with, &without, now), Ordering::Less);
        assert_eq!(compare_extended(&without, &with, now), Ordering::Greater);
    }

    #[test]
    fn test_no_deadlines_orders_by_submission() {
        let now = t(50);
        let older = at(JobSpec::new("older"), 1);
        let newer = at(JobSpec::new("newer"), 2);
        assert_eq!(compare_extended(&older, &newer, now), Ordering::Less);
        assert_eq!(compare(&older, &newer, now), Ordering::Less);
    }

    #[test]
    fn test_started_jobs_come_first_and_by_start_time() {
        let now = t(100);
        let deadline = Deadline::Absolute(t(1000));
        let mut early = at(JobSpec::new("early").with_deadline(deadline), 0);
        early.started_at = Some(t(10));
        let mut late = at(JobSpec::new("late").with_deadline(deadline), 0);
        late.started_at = Some(t(20));
        let fresh = at(
            JobSpec::new("fresh").with_deadline(Deadline::Absolute(t(101))),
            0,
        );

        assert_eq!(compare_extended(&early, &late, now), Ordering::Less);
        assert_eq!(compare_extended(&late, &fresh, now), Ordering::Less);
        assert_eq!(compare_extended(&fresh, &early, now), Ordering::Greater);
    }

    #[test]
    fn test_slack_tie_break() {
        let now = t(0);
        // deadline 100s, runs 90s: slack 10s
        let tight = at(
            JobSpec::new("tight")
                .with_deadline(Deadline::Absolute(t(100)))
                .with_expected_duration(Duration::from_secs(90)),
            0,
        );
        // deadline 50s, runs 10s: slack 40s
        let loose = at(
            JobSpec::new("loose")
                .with_deadline(Deadline::Absolute(t(50)))
                .with_expected_duration(Duration::from_secs(10)),
            0,
        );
        assert_eq!(compare_extended(&tight, &loose, now), Ordering::Less);
        // The simple variant only looks at the deadline itself.
        assert_eq!(compare(&tight, &loose, now), Ordering::Greater);
    }

    #[test]
    fn test_simple_variant_treats_missing_deadline_as_infinite() {
        let now = t(0);
        let with = at(
            JobSpec::new("with").with_deadline(Deadline::Relative(Duration::from_secs(3600))),
            9,
        );
        let without = at(JobSpec::new("without"), 0);
        assert_eq!(compare(&with, &without, now), Ordering::Less);
    }

    #[test]
    fn test_full_ties_are_deterministic() {
        let now = t(0);
        let a = at(JobSpec::new("a"), 0);
        let b = at(JobSpec::new("b"), 0);
        assert_eq!(compare_extended(&a, &b, now), Ordering::Less);
        assert_eq!(compare_extended(&a, &a, now), Ordering::Equal);
    }
}
