//! Deadline monitor.
//!
//! Runs once per scheduling pass over queued and deployed jobs, against the
//! same `now` used for ordering. A job whose effective deadline falls before its
//! effective expected finish produces a [`DeadlineWarning`]. The check is
//! advisory: it never changes what gets admitted.

use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use rustc_hash::FxHashMap;

use crate::job::{Job, JobId};
use crate::notify::DeadlineWarning;
use crate::timing::{effective_deadline, effective_expected_finish};

#[derive(Debug, Default)]
pub struct DeadlineMonitor {
    /// Without a cool-down every pass re-fires for every late job.
    cooldown: Option<TimeDelta>,
    last_warned: FxHashMap<JobId, DateTime<Utc>>,
}

impl DeadlineMonitor {
    pub fn new(cooldown: Option<Duration>) -> Self {
        Self {
            cooldown: cooldown.map(|d| TimeDelta::from_std(d).unwrap_or(TimeDelta::MAX)),
            last_warned: FxHashMap::default(),
        }
    }

    /// Warnings for every late job in `jobs`.
    pub fn check<'a, I>(&mut self, jobs: I, now: DateTime<Utc>) -> Vec<DeadlineWarning>
    where
        I: IntoIterator<Item = &'a Job>,
    {
        let mut warnings = Vec::new();
        for job in jobs {
            let Some(deadline) = effective_deadline(job, now) else {
                continue;
            };
            let expected_finish = effective_expected_finish(job, now);
            if deadline >= expected_finish {
                continue;
            }
            if self.in_cooldown(&job.id, now) {
                continue;
            }
            if self.cooldown.is_some() {
                self.last_warned.insert(job.id.clone(), now);
            }
            warnings.push(DeadlineWarning {
                job_id: job.id.clone(),
                deadline,
                expected_finish,
                has_duration_estimate: job.expected_duration.is_some(),
            });
        }
        warnings
    }

    /// Drop cool-down state for a job that reached a terminal status.
    pub fn forget(&mut self, job_id: &JobId) {
        self.last_warned.remove(job_id);
    }

    fn in_cooldown(&self, job_id: &JobId, now: DateTime<Utc>) -> bool {
        match (self.cooldown, self.last_warned.get(job_id)) {
            (Some(cooldown), Some(last)) => now.signed_duration_since(*last) < cooldown,
            _ => false,
        }
    }
}
