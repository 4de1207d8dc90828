//! Admission engine.
//!
//! The [`Engine`] exclusively owns the pending queue, the deployed set and
//! the terminal archive. Everything else talks to it through `submit`,
//! `cancel`, `status`, `tick`, `reap` and `shutdown`; the service loop in
//! [`crate::service`] serializes those calls.
//!
//! ```text
//!   submit() ─→ PendingQueue ─ tick() ─→ Deployed ─ reap() ─→ archive (Finished)
//!                   ↑   │                  │
//!                   │   └─ cancel() ───────┴─ cancel() ─→ archive (Cancelled)
//!                   └─ deploy failed / lost (attempts < max) ─┘
//! ```
//!
//! ## Guarantees
//!
//! - A job is in exactly one of queue, deployed set or archive.
//! - Every successful `reserve()` is matched by exactly one `release()`.
//! - `reserved_total()` equals the sum of the counts held by deployed jobs.
//! - Boundary failures stay local to the job being processed. Only an
//!   [`SchedError::InvariantViolation`] is returned from `tick`/`reap`.

use std::collections::VecDeque;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use rustc_hash::{FxHashMap, FxHashSet};
use serde::{Deserialize, Serialize};

use crate::clock::{Clock, SystemClock};
use crate::config::EngineConfig;
use crate::deploy::{Deployer, DeploymentRef};
use crate::error::{SchedError, SchedResult};
use crate::job::{Deadline, Job, JobId, JobSpec, JobStatus, ResourceRequest};
use crate::monitor::DeadlineMonitor;
use crate::notify::{DeadlineNotifier, LogNotifier};
use crate::policy::Policy;
use crate::queue::PendingQueue;
use crate::resource::{ResourceHandle, ResourceManager};
use crate::timing::resolve_deadline;

/// A job holding resources on the deployment boundary.
#[derive(Debug, Clone)]
pub struct DeployedJob {
    pub job: Job,
    pub handle: ResourceHandle,
    pub deployment: DeploymentRef,
    probe_failures: u32,
}

/// How to stop the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ShutdownMode {
    /// Stop admitting, let deployed jobs run to completion.
    Soft,
    /// Stop everything now: terminate deployments and flush the queue.
    Immediate,
}

/// What one `tick()` did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TickOutcome {
    /// Nothing was queued. The deadline check still ran.
    Idle,
    /// Admission is stopped by a shutdown.
    Paused,
    /// The job got `granted` units and was deployed.
    Admitted { job_id: JobId, granted: u32 },
    /// Not enough resources, even at the minimum count. The job stays queued.
    Blocked { job_id: JobId },
    /// Resources were reserved but deployment failed; they were released.
    DeployFailed { job_id: JobId, requeued: bool },
}

/// What one `reap()` did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReapReport {
    /// Deployments that terminated normally.
    pub finished: Vec<JobId>,
    /// Deployments given up on after repeated probe failures.
    pub lost: Vec<JobId>,
}

impl ReapReport {
    pub fn is_empty(&self) -> bool {
        self.finished.is_empty() && self.lost.is_empty()
    }
}

pub struct Engine {
    config: EngineConfig,
    queue: PendingQueue,
    deployed: FxHashMap<JobId, DeployedJob>,
    archive: VecDeque<Job>,
    /// Every id ever accepted, so ids stay unique after archive eviction.
    known_ids: FxHashSet<JobId>,
    monitor: DeadlineMonitor,
    resources: Arc<dyn ResourceManager>,
    deployer: Arc<dyn Deployer>,
    notifier: Arc<dyn DeadlineNotifier>,
    clock: Arc<dyn Clock>,
    reserved_total: u64,
    shutdown: Option<ShutdownMode>,
    last_liveness_sweep: Option<DateTime<Utc>>,
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine")
            .field("policy", &self.config.policy)
            .field("pending", &self.queue.len())
            .field("deployed", &self.deployed.len())
            .field("archived", &self.archive.len())
            .field("reserved_total", &self.reserved_total)
            .field("shutdown", &self.shutdown)
            .finish()
    }
}

impl Engine {
    /// Create an engine with the wall clock and a logging notifier.
    pub fn new(
        config: EngineConfig,
        resources: Arc<dyn ResourceManager>,
        deployer: Arc<dyn Deployer>,
    ) -> SchedResult<Self> {
        config.validate()?;
        Ok(Self {
            queue: PendingQueue::with_capacity(config.max_pending),
            deployed: FxHashMap::default(),
            archive: VecDeque::new(),
            known_ids: FxHashSet::default(),
            monitor: DeadlineMonitor::new(config.warning_cooldown),
            resources,
            deployer,
            notifier: Arc::new(LogNotifier),
            clock: Arc::new(SystemClock),
            reserved_total: 0,
            shutdown: None,
            last_liveness_sweep: None,
            config,
        })
    }

    pub fn with_notifier(mut self, notifier: Arc<dyn DeadlineNotifier>) -> Self {
        self.notifier = notifier;
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn policy(&self) -> &Policy {
        &self.config.policy
    }

    /// Units currently held by deployed jobs.
    pub fn reserved_total(&self) -> u64 {
        self.reserved_total
    }

    pub fn pending_len(&self) -> usize {
        self.queue.len()
    }

    pub fn deployed_len(&self) -> usize {
        self.deployed.len()
    }

    pub fn deployed_jobs(&self) -> impl Iterator<Item = &DeployedJob> {
        self.deployed.values()
    }

    pub fn is_shutting_down(&self) -> bool {
        self.shutdown.is_some()
    }

    /// A shutdown was requested and nothing is deployed any more.
    pub fn is_drained(&self) -> bool {
        self.shutdown.is_some() && self.deployed.is_empty()
    }

    // ── Control surface ──────────────────────────────────────────────

    /// Queue a new job.
    pub fn submit(&mut self, spec: JobSpec) -> SchedResult<JobId> {
        if self.shutdown.is_some() {
            return Err(SchedError::ShuttingDown);
        }
        spec.resources.validate()?;
        if self.known_ids.contains(&spec.id) {
            return Err(SchedError::DuplicateId(spec.id));
        }

        let now = self.clock.now();
        let mut job = Job::new(spec, now);
        if self.config.freeze_relative_deadlines {
            if let Some(deadline @ Deadline::Relative(_)) = job.deadline {
                job.deadline = Some(Deadline::Absolute(resolve_deadline(deadline, now)));
            }
        }

        let job_id = job.id.clone();
        let priority = job.priority;
        let ResourceRequest { desired, minimum } = job.resources;
        self.queue.insert(job)?;
        self.known_ids.insert(job_id.clone());
        tracing::info!(job_id = %job_id, ?priority, desired, minimum, "Job submitted");
        Ok(job_id)
    }

    /// Remove a queued or deployed job. Deployed jobs are terminated and
    /// their resources released first.
    pub async fn cancel(&mut self, job_id: &JobId) -> SchedResult<Job> {
        let now = self.clock.now();

        if let Some(mut job) = self.queue.remove(job_id) {
            job.mark_terminal(JobStatus::Cancelled, now);
            tracing::info!(job_id = %job_id, "Queued job cancelled");
            self.archive_job(job.clone());
            return Ok(job);
        }

        let Some(deployed) = self.deployed.remove(job_id) else {
            return Err(SchedError::NotFound(job_id.clone()));
        };
        let mut job = self.stop_deployment(deployed).await?;
        job.mark_terminal(JobStatus::Cancelled, now);
        tracing::info!(job_id = %job_id, "Deployed job cancelled");
        self.archive_job(job.clone());
        Ok(job)
    }

    /// Look up one job wherever it is.
    pub fn status(&self, job_id: &JobId) -> SchedResult<Job> {
        self.queue
            .get(job_id)
            .or_else(|| self.deployed.get(job_id).map(|d| &d.job))
            .or_else(|| self.archive.iter().rev().find(|j| &j.id == job_id))
            .cloned()
            .ok_or_else(|| SchedError::NotFound(job_id.clone()))
    }

    /// Every known job: pending in admission order, then deployed by start
    /// time, then the archive oldest first.
    pub fn jobs(&self) -> Vec<Job> {
        let now = self.clock.now();
        let mut jobs: Vec<Job> = self
            .config
            .policy
            .order_all(self.queue.iter(), now)
            .into_iter()
            .cloned()
            .collect();

        let mut deployed: Vec<&Job> = self.deployed.values().map(|d| &d.job).collect();
        deployed.sort_by(|a, b| a.started_at.cmp(&b.started_at).then_with(|| a.id.cmp(&b.id)));
        jobs.extend(deployed.into_iter().cloned());
        jobs.extend(self.archive.iter().cloned());
        jobs
    }

    // ── Scheduling pass ──────────────────────────────────────────────

    /// Check deadlines of queued and deployed jobs, then admit at most one
    /// job.
    pub async fn tick(&mut self) -> SchedResult<TickOutcome> {
        if self.shutdown.is_some() {
            return Ok(TickOutcome::Paused);
        }

        let now = self.clock.now();
        self.check_deadlines(now).await;
        if self.queue.is_empty() {
            return Ok(TickOutcome::Idle);
        }

        let Some(candidate) = self.config.policy.select(self.queue.iter(), now) else {
            return Ok(TickOutcome::Idle);
        };
        let job_id = candidate.id.clone();
        let request = candidate.resources;

        if self.deployed.contains_key(&job_id) {
            return Err(self.violation(format!("job {job_id} is both queued and deployed")));
        }

        let Some(count) = self.grantable(request).await else {
            tracing::debug!(
                job_id = %job_id,
                desired = request.desired,
                minimum = request.minimum,
                "Resources unavailable, job stays queued"
            );
            return Ok(TickOutcome::Blocked { job_id });
        };

        let reserved = bounded(
            self.config.boundary_timeout,
            "reserve",
            self.resources.reserve(&job_id, count),
        )
        .await;
        let handle = match reserved {
            Ok(handle) => handle,
            Err(e) if e.is_fatal() => return Err(e),
            Err(e) => {
                tracing::debug!(job_id = %job_id, count, error = %e, "Reservation refused");
                return Ok(TickOutcome::Blocked { job_id });
            }
        };
        if handle.count != count {
            self.release(&job_id, false).await?;
            return Err(self.violation(format!(
                "resource manager granted {} units to {job_id}, {count} were requested",
                handle.count
            )));
        }

        let Some(mut job) = self.queue.remove(&job_id) else {
            self.release(&job_id, false).await?;
            return Err(self.violation(format!("job {job_id} vanished from the queue")));
        };

        let deployed = bounded(
            self.config.boundary_timeout,
            "deploy",
            self.deployer.deploy(&job, &handle),
        )
        .await;
        match deployed {
            Ok(deployment) => {
                job.mark_started(now);
                self.reserved_total += u64::from(count);
                tracing::info!(
                    job_id = %job_id,
                    granted = count,
                    deployment = %deployment,
                    "Job admitted"
                );
                self.deployed.insert(
                    job_id.clone(),
                    DeployedJob {
                        job,
                        handle,
                        deployment,
                        probe_failures: 0,
                    },
                );
                Ok(TickOutcome::Admitted {
                    job_id,
                    granted: count,
                })
            }
            Err(e) => {
                tracing::warn!(job_id = %job_id, error = %e, "Deployment failed, releasing resources");
                self.release(&job_id, false).await?;
                let requeued = self.retry_or_fail(job, e.to_string(), now);
                Ok(TickOutcome::DeployFailed { job_id, requeued })
            }
        }
    }

    /// Probe deployed jobs and retire the ones that terminated.
    pub async fn reap(&mut self) -> SchedResult<ReapReport> {
        let mut report = ReapReport::default();
        if self.deployed.is_empty() {
            return Ok(report);
        }

        let now = self.clock.now();
        if let Some(last) = self.last_liveness_sweep {
            let elapsed = now.signed_duration_since(last).to_std().unwrap_or(Duration::ZERO);
            if elapsed < self.config.liveness_interval {
                return Ok(report);
            }
        }
        self.last_liveness_sweep = Some(now);

        let mut ids: Vec<JobId> = self.deployed.keys().cloned().collect();
        ids.sort();

        for job_id in ids {
            let Some(deployment) = self.deployed.get(&job_id).map(|d| d.deployment.clone()) else {
                continue;
            };
            let probe = bounded(
                self.config.boundary_timeout,
                "liveness probe",
                self.deployer.is_alive(&deployment),
            )
            .await;

            match probe {
                Ok(true) => {
                    if let Some(deployed) = self.deployed.get_mut(&job_id) {
                        deployed.probe_failures = 0;
                    }
                }
                Ok(false) => {
                    let Some(deployed) = self.deployed.remove(&job_id) else {
                        continue;
                    };
                    let count = deployed.handle.count;
                    self.release(&job_id, true).await?;
                    self.unaccount(&job_id, count)?;
                    let mut job = deployed.job;
                    job.mark_terminal(JobStatus::Finished, now);
                    tracing::info!(job_id = %job_id, released = count, "Job finished");
                    self.archive_job(job);
                    report.finished.push(job_id);
                }
                Err(e) => {
                    let failures = match self.deployed.get_mut(&job_id) {
                        Some(deployed) => {
                            deployed.probe_failures += 1;
                            deployed.probe_failures
                        }
                        None => continue,
                    };
                    tracing::warn!(job_id = %job_id, failures, error = %e, "Liveness probe failed");
                    if failures < self.config.max_probe_failures {
                        continue;
                    }
                    let Some(deployed) = self.deployed.remove(&job_id) else {
                        continue;
                    };
                    let job = self.stop_deployment(deployed).await?;
                    tracing::warn!(job_id = %job_id, "Deployment lost");
                    self.retry_or_fail(job, format!("deployment lost: {e}"), now);
                    report.lost.push(job_id);
                }
            }
        }
        Ok(report)
    }

    // ── Shutdown ─────────────────────────────────────────────────────

    /// Stop admitting work. An immediate shutdown also terminates every
    /// deployment and flushes the queue.
    pub async fn shutdown(&mut self, mode: ShutdownMode) -> SchedResult<()> {
        match (self.shutdown, mode) {
            (Some(ShutdownMode::Immediate), _) | (Some(ShutdownMode::Soft), ShutdownMode::Soft) => {
                return Ok(());
            }
            _ => {}
        }
        self.shutdown = Some(mode);

        match mode {
            ShutdownMode::Soft => {
                tracing::info!(deployed = self.deployed.len(), "Soft shutdown initiated");
            }
            ShutdownMode::Immediate => {
                tracing::info!(
                    deployed = self.deployed.len(),
                    pending = self.queue.len(),
                    "Immediate shutdown initiated"
                );
                let now = self.clock.now();
                let mut ids: Vec<JobId> = self.deployed.keys().cloned().collect();
                ids.sort();
                for job_id in ids {
                    if let Some(deployed) = self.deployed.remove(&job_id) {
                        let mut job = self.stop_deployment(deployed).await?;
                        job.mark_terminal(JobStatus::Cancelled, now);
                        self.archive_job(job);
                    }
                }
                self.flush();
            }
        }
        Ok(())
    }

    /// Cancel every queued job. Returns how many were dropped.
    pub fn flush(&mut self) -> usize {
        let now = self.clock.now();
        let mut flushed = self.queue.drain();
        flushed.sort_by(|a, b| a.submitted_at.cmp(&b.submitted_at));
        let count = flushed.len();
        for mut job in flushed {
            job.mark_terminal(JobStatus::Cancelled, now);
            self.archive_job(job);
        }
        if count > 0 {
            tracing::info!(count, "Pending queue flushed");
        }
        count
    }

    // ── Internals ────────────────────────────────────────────────────

    /// Largest count the resource manager can grant right now: `desired`,
    /// else `minimum`, else nothing.
    async fn grantable(&self, request: ResourceRequest) -> Option<u32> {
        let mut counts = vec![request.desired];
        if request.minimum != request.desired {
            counts.push(request.minimum);
        }
        for count in counts {
            let available = bounded(
                self.config.boundary_timeout,
                "availability check",
                self.resources.is_available(count),
            )
            .await;
            match available {
                Ok(true) => return Some(count),
                Ok(false) => {}
                Err(e) => tracing::debug!(count, error = %e, "Availability check failed"),
            }
        }
        None
    }

    async fn check_deadlines(&mut self, now: DateTime<Utc>) {
        let active = self.deployed.values().map(|d| &d.job);
        let warnings = self.monitor.check(self.queue.iter().chain(active), now);
        for warning in warnings {
            let sent = bounded(
                self.config.boundary_timeout,
                "deadline notification",
                self.notifier.notify_likely_missed_deadline(&warning),
            )
            .await;
            if let Err(e) = sent {
                tracing::warn!(job_id = %warning.job_id, error = %e, "Deadline notification failed");
            }
        }
    }

    /// Terminate a deployment that was taken out of the deployed set and
    /// give its resources back.
    async fn stop_deployment(&mut self, deployed: DeployedJob) -> SchedResult<Job> {
        let job_id = deployed.job.id.clone();
        let terminated = bounded(
            self.config.boundary_timeout,
            "terminate",
            self.deployer.terminate(&deployed.deployment),
        )
        .await;
        if let Err(e) = terminated {
            tracing::warn!(job_id = %job_id, error = %e, "Failed to terminate deployment");
        }
        self.release(&job_id, true).await?;
        self.unaccount(&job_id, deployed.handle.count)?;
        Ok(deployed.job)
    }

    /// Put a job back in the queue, or fail it once it ran out of attempts.
    /// Returns `true` if it was re-queued.
    fn retry_or_fail(&mut self, mut job: Job, reason: String, now: DateTime<Utc>) -> bool {
        job.attempts += 1;
        if job.attempts < self.config.max_attempts {
            tracing::info!(job_id = %job.id, attempts = job.attempts, "Job re-queued");
            job.status = JobStatus::Queued;
            self.queue.requeue(job);
            true
        } else {
            tracing::warn!(job_id = %job.id, attempts = job.attempts, %reason, "Job failed");
            job.mark_terminal(JobStatus::Failed(reason), now);
            self.archive_job(job);
            false
        }
    }

    /// Release a job's reservation. Boundary errors are logged, only an
    /// invariant violation reported by the resource manager is returned.
    async fn release(&self, job_id: &JobId, was_deployed: bool) -> SchedResult<()> {
        let released = bounded(
            self.config.boundary_timeout,
            "release",
            self.resources.release(job_id, was_deployed),
        )
        .await;
        match released {
            Ok(()) => Ok(()),
            Err(e) if e.is_fatal() => {
                tracing::error!(job_id = %job_id, error = %e, "Release rejected by resource manager");
                Err(e)
            }
            Err(e) => {
                tracing::error!(job_id = %job_id, error = %e, "Failed to release resources");
                Ok(())
            }
        }
    }

    fn unaccount(&mut self, job_id: &JobId, count: u32) -> SchedResult<()> {
        match self.reserved_total.checked_sub(u64::from(count)) {
            Some(total) => {
                self.reserved_total = total;
                Ok(())
            }
            None => Err(self.violation(format!(
                "releasing {count} units for {job_id} drops the reserved total below zero"
            ))),
        }
    }

    fn archive_job(&mut self, job: Job) {
        debug_assert!(job.status.is_terminal());
        self.monitor.forget(&job.id);
        self.archive.push_back(job);
        while self.archive.len() > self.config.finished_retention {
            self.archive.pop_front();
        }
    }

    fn violation(&self, message: String) -> SchedError {
        tracing::error!(%message, "Scheduler invariant violated");
        SchedError::InvariantViolation(message)
    }
}

/// Run a boundary call with a timeout. Elapsed time becomes
/// [`SchedError::Timeout`].
async fn bounded<T>(
    timeout: Duration,
    what: &str,
    call: impl Future<Output = SchedResult<T>>,
) -> SchedResult<T> {
    match tokio::time::timeout(timeout, call).await {
        Ok(result) => result,
        Err(_) => Err(SchedError::Timeout(format!(
            "{what} did not answer within {timeout:?}"
        ))),
    }
}
