//! Deployment boundary.
//!
//! Once resources are reserved, a job is handed to a [`Deployer`] which
//! starts it somewhere and returns a [`DeploymentRef`]. The engine then polls
//! `is_alive()` from `reap()` until the deployment terminates.

use std::sync::Mutex;

use async_trait::async_trait;
use rustc_hash::{FxHashMap, FxHashSet};
use serde::{Deserialize, Serialize};

use crate::error::{SchedError, SchedResult};
use crate::job::{Job, JobId};
use crate::resource::ResourceHandle;

/// Opaque reference to a running deployment.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DeploymentRef(pub String);

impl DeploymentRef {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }
}

impl std::fmt::Display for DeploymentRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Starts jobs on reserved resources and reports their liveness.
#[async_trait]
pub trait Deployer: Send + Sync {
    /// Start `job` on the units described by `handle`.
    async fn deploy(&self, job: &Job, handle: &ResourceHandle) -> SchedResult<DeploymentRef>;

    /// `Ok(false)` once the deployment has terminated.
    async fn is_alive(&self, deployment: &DeploymentRef) -> SchedResult<bool>;

    /// Stop a deployment early.
    ///
    /// Default implementation does nothing: the units are released anyway and
    /// the resource manager is expected to reclaim them.
    async fn terminate(&self, deployment: &DeploymentRef) -> SchedResult<()> {
        let _ = deployment;
        Ok(())
    }
}

#[derive(Debug, Default)]
struct DeployerState {
    next_id: u64,
    running: FxHashMap<DeploymentRef, JobId>,
    by_job: FxHashMap<JobId, DeploymentRef>,
    failing_jobs: FxHashSet<JobId>,
    unreachable: FxHashSet<JobId>,
    deployed: Vec<JobId>,
    terminated: Vec<JobId>,
}

/// In-process deployer. Deployments stay alive until [`finish`] is called.
///
/// [`finish`]: InMemoryDeployer::finish
#[derive(Debug, Default)]
pub struct InMemoryDeployer {
    state: Mutex<DeployerState>,
}

impl InMemoryDeployer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark a job's deployment as terminated. Returns `false` if it is not running.
    pub fn finish(&self, job_id: &JobId) -> bool {
        let mut state = self.lock();
        match state.by_job.remove(job_id) {
            Some(deployment) => {
                state.running.remove(&deployment);
                true
            }
            None => false,
        }
    }

    /// Terminate every running deployment.
    pub fn finish_all(&self) {
        let mut state = self.lock();
        state.running.clear();
        state.by_job.clear();
    }

    /// Make every deployment attempt of this job fail.
    pub fn fail_deployments_of(&self, job_id: impl Into<JobId>) {
        self.lock().failing_jobs.insert(job_id.into());
    }

    /// Make liveness probes for this job's deployment error out.
    pub fn make_unreachable(&self, job_id: impl Into<JobId>) {
        self.lock().unreachable.insert(job_id.into());
    }

    pub fn make_reachable(&self, job_id: &JobId) {
        self.lock().unreachable.remove(job_id);
    }

    pub fn running(&self) -> usize {
        self.lock().running.len()
    }

    /// Jobs deployed so far, in deployment order.
    pub fn deployed(&self) -> Vec<JobId> {
        self.lock().deployed.clone()
    }

    /// Jobs whose deployments were terminated early.
    pub fn terminated(&self) -> Vec<JobId> {
        self.lock().terminated.clone()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, DeployerState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[async_trait]
impl Deployer for InMemoryDeployer {
    async fn deploy(&self, job: &Job, handle: &ResourceHandle) -> SchedResult<DeploymentRef> {
        let mut state = self.lock();
        if state.failing_jobs.contains(&job.id) {
            return Err(SchedError::DeploymentFailure(format!(
                "no executor answered for {} on {} units",
                job.id, handle.count
            )));
        }
        state.next_id += 1;
        let deployment = DeploymentRef::new(format!("deploy-{}", state.next_id));
        state.running.insert(deployment.clone(), job.id.clone());
        state.by_job.insert(job.id.clone(), deployment.clone());
        state.deployed.push(job.id.clone());
        Ok(deployment)
    }

    async fn is_alive(&self, deployment: &DeploymentRef) -> SchedResult<bool> {
        let state = self.lock();
        match state.running.get(deployment) {
            Some(job_id) if state.unreachable.contains(job_id) => Err(SchedError::Timeout(
                format!("liveness probe for {deployment}"),
            )),
            Some(_) => Ok(true),
            None => Ok(false),
        }
    }

    async fn terminate(&self, deployment: &DeploymentRef) -> SchedResult<()> {
        let mut state = self.lock();
        if let Some(job_id) = state.running.remove(deployment) {
            state.by_job.remove(&job_id);
            state.terminated.push(job_id);
        }
        Ok(())
    }
}
