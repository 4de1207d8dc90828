//! Resource manager boundary.
//!
//! The engine never owns capacity. It asks a [`ResourceManager`] whether a
//! count is available, reserves exactly that count for one job, and releases
//! it exactly once when the job finishes, is cancelled, or fails to deploy.
//!
//! ```text
//!   is_available(n) ──→ reserve(job, n) ──→ ... ──→ release(job, was_deployed)
//!      (async)              (async)                      (async)
//! ```
//!
//! [`ResourcePool`] is a counting, in-process implementation used by tests
//! and the demo.

use std::sync::Mutex;

use async_trait::async_trait;
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};

use crate::error::{SchedError, SchedResult};
use crate::job::JobId;

/// Proof of a reservation: which job holds how many units.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceHandle {
    pub job_id: JobId,
    pub count: u32,
    /// Names of the granted units, if the manager tracks them.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub units: Vec<String>,
}

impl ResourceHandle {
    pub fn new(job_id: JobId, count: u32) -> Self {
        Self {
            job_id,
            count,
            units: Vec::new(),
        }
    }

    pub fn with_units(mut self, units: Vec<String>) -> Self {
        self.units = units;
        self
    }
}

/// Shared, external pool of compute units.
///
/// # Contract
///
/// - `is_available(n)` reports whether `n` units could be reserved now.
/// - `reserve()` either grants exactly `count` units or fails; it never
///   grants a partial count.
/// - `release()` returns everything reserved for the job. `was_deployed`
///   tells the manager whether the units ran work (and may need cleaning).
#[async_trait]
pub trait ResourceManager: Send + Sync {
    async fn is_available(&self, count: u32) -> SchedResult<bool>;

    async fn reserve(&self, job_id: &JobId, count: u32) -> SchedResult<ResourceHandle>;

    async fn release(&self, job_id: &JobId, was_deployed: bool) -> SchedResult<()>;
}

#[derive(Debug, Default)]
struct PoolState {
    reserved: FxHashMap<JobId, u32>,
    releases: u64,
}

/// Fixed-capacity pool that counts reservations per job.
#[derive(Debug)]
pub struct ResourcePool {
    capacity: u32,
    state: Mutex<PoolState>,
}

impl ResourcePool {
    pub fn new(capacity: u32) -> Self {
        Self {
            capacity,
            state: Mutex::new(PoolState::default()),
        }
    }

    pub fn capacity(&self) -> u32 {
        self.capacity
    }

    /// Units currently reserved across all jobs.
    pub fn reserved(&self) -> u32 {
        self.lock().reserved.values().sum()
    }

    pub fn free(&self) -> u32 {
        self.capacity.saturating_sub(self.reserved())
    }

    /// Units held by one job.
    pub fn reserved_for(&self, job_id: &JobId) -> Option<u32> {
        self.lock().reserved.get(job_id).copied()
    }

    /// Number of successful releases so far.
    pub fn release_count(&self) -> u64 {
        self.lock().releases
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, PoolState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[async_trait]
impl ResourceManager for ResourcePool {
    async fn is_available(&self, count: u32) -> SchedResult<bool> {
        Ok(count <= self.free())
    }

    async fn reserve(&self, job_id: &JobId, count: u32) -> SchedResult<ResourceHandle> {
        let mut state = self.lock();
        if state.reserved.contains_key(job_id) {
            return Err(SchedError::InvariantViolation(format!(
                "job {job_id} already holds a reservation"
            )));
        }
        let used: u32 = state.reserved.values().sum();
        if used.saturating_add(count) > self.capacity {
            return Err(SchedError::ResourceUnavailable(format!(
                "{count} units requested, {} free",
                self.capacity.saturating_sub(used)
            )));
        }
        state.reserved.insert(job_id.clone(), count);
        let units = (used..used + count).map(|i| format!("unit-{i}")).collect();
        Ok(ResourceHandle::new(job_id.clone(), count).with_units(units))
    }

    async fn release(&self, job_id: &JobId, _was_deployed: bool) -> SchedResult<()> {
        let mut state = self.lock();
        match state.reserved.remove(job_id) {
            Some(_) => {
                state.releases += 1;
                Ok(())
            }
            None => Err(SchedError::InvariantViolation(format!(
                "release for job {job_id} without a reservation"
            ))),
        }
    }
}
