//! Pending queue.
//!
//! Holds submitted jobs that have not been admitted yet. Iteration order is
//! not meaningful: the active [`Policy`](crate::policy::Policy) alone decides
//! which job leaves next.

use rustc_hash::FxHashMap;

use crate::error::{SchedError, SchedResult};
use crate::job::{Job, JobId};

pub const DEFAULT_MAX_PENDING: usize = 10_000;

/// Jobs waiting for admission, keyed by id.
#[derive(Debug)]
pub struct PendingQueue {
    jobs: FxHashMap<JobId, Job>,
    max_jobs: usize,
}

impl Default for PendingQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl PendingQueue {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_MAX_PENDING)
    }

    pub fn with_capacity(max_jobs: usize) -> Self {
        Self {
            jobs: FxHashMap::default(),
            max_jobs,
        }
    }

    /// Add a job. Fails if the id is already queued or the queue is full.
    pub fn insert(&mut self, job: Job) -> SchedResult<()> {
        if self.jobs.contains_key(&job.id) {
            return Err(SchedError::DuplicateId(job.id));
        }
        if self.is_full() {
            return Err(SchedError::QueueFull(self.max_jobs));
        }
        self.jobs.insert(job.id.clone(), job);
        Ok(())
    }

    /// Put back a job that was taken out for admission. Ignores the bound so
    /// a re-queue can never fail.
    pub(crate) fn requeue(&mut self, job: Job) {
        self.jobs.insert(job.id.clone(), job);
    }

    pub fn remove(&mut self, id: &JobId) -> Option<Job> {
        self.jobs.remove(id)
    }

    pub fn get(&self, id: &JobId) -> Option<&Job> {
        self.jobs.get(id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Job> {
        self.jobs.values()
    }

    /// Remove every job, returning them.
    pub fn drain(&mut self) -> Vec<Job> {
        self.jobs.drain().map(|(_, job)| job).collect()
    }

    pub fn len(&self) -> usize {
        self.jobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.jobs.len() >= self.max_jobs
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::JobSpec;
    use chrono::{DateTime, Utc};

    fn job(id: &str) -> Job {
        Job::new(JobSpec::new(id), DateTime::<Utc>::UNIX_EPOCH)
    }

    #[test]
    fn test_insert_and_remove() {
        let mut queue = PendingQueue::new();
        queue.insert(job("a")).unwrap();
        queue.insert(job("b")).unwrap();
        assert_eq!(queue.len(), 2);

        let removed = queue.remove(&JobId::new("a")).unwrap();
        assert_eq!(removed.id, JobId::new("a"));
        assert!(queue.get(&JobId::new("a")).is_none());
        assert!(queue.remove(&JobId::new("a")).is_none());
    }

    #[test]
    fn test_duplicate_id_rejected() {
        let mut queue = PendingQueue::new();
        queue.insert(job("a")).unwrap();
        assert!(matches!(
            queue.insert(job("a")),
            Err(SchedError::DuplicateId(id)) if id == JobId::new("a")
        ));
        assert_eq!(queue.len(), 1);
    }

    #[test]
    fn test_capacity_bound() {
        let mut queue = PendingQueue::with_capacity(1);
        queue.insert(job("a")).unwrap();
        assert!(queue.is_full());
        assert!(matches!(queue.insert(job("b")), Err(SchedError::QueueFull(1))));

        // A job coming back from a failed admission always fits.
        queue.requeue(job("c"));
        assert_eq!(queue.len(), 2);
    }

    #[test]
    fn test_drain_empties_queue() {
        let mut queue = PendingQueue::new();
        queue.insert(job("a")).unwrap();
        queue.insert(job("b")).unwrap();
        let drained = queue.drain();
        assert_eq!(drained.len(), 2);
        assert!(queue.is_empty());
    }
}
