//! Serialized control loop.
//!
//! [`Scheduler::spawn`] moves an [`Engine`] into a tokio task. Callers talk
//! to it through a cloneable [`Scheduler`] handle; every request travels over
//! a bounded channel and is answered on a oneshot. Requests are only served
//! between two scheduling passes, never during one.
//!
//! ```text
//!   loop {
//!       serve ≤ 1 request ──→ tick() ──→ reap() ──→ wait loop_interval
//!   }
//! ```
//!
//! The task ends when every handle is dropped, when a requested shutdown has
//! drained, or with the [`SchedError::InvariantViolation`] that stopped it.

use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

use crate::engine::{Engine, ShutdownMode};
use crate::error::{SchedError, SchedResult};
use crate::job::{Job, JobId, JobSpec};

const REQUEST_BUFFER: usize = 256;

/// Answer to a status request.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StatusReply {
    One(Job),
    All(Vec<Job>),
}

impl StatusReply {
    pub fn into_jobs(self) -> Vec<Job> {
        match self {
            StatusReply::One(job) => vec![job],
            StatusReply::All(jobs) => jobs,
        }
    }
}

enum Request {
    Submit {
        spec: JobSpec,
        reply: oneshot::Sender<SchedResult<JobId>>,
    },
    Cancel {
        job_id: JobId,
        reply: oneshot::Sender<SchedResult<Job>>,
    },
    Status {
        job_id: Option<JobId>,
        reply: oneshot::Sender<SchedResult<StatusReply>>,
    },
    Shutdown {
        mode: ShutdownMode,
        reply: oneshot::Sender<SchedResult<()>>,
    },
}

/// Handle to a running control loop.
#[derive(Debug, Clone)]
pub struct Scheduler {
    tx: mpsc::Sender<Request>,
}

impl Scheduler {
    /// Start the control loop on the current tokio runtime.
    pub fn spawn(engine: Engine) -> (Self, JoinHandle<SchedResult<()>>) {
        let (tx, rx) = mpsc::channel(REQUEST_BUFFER);
        let task = tokio::spawn(run(engine, rx));
        (Self { tx }, task)
    }

    pub async fn submit(&self, spec: JobSpec) -> SchedResult<JobId> {
        self.call(|reply| Request::Submit { spec, reply }).await
    }

    pub async fn cancel(&self, job_id: JobId) -> SchedResult<Job> {
        self.call(|reply| Request::Cancel { job_id, reply }).await
    }

    /// One job when `job_id` is given, otherwise every known job.
    pub async fn status(&self, job_id: Option<JobId>) -> SchedResult<StatusReply> {
        self.call(|reply| Request::Status { job_id, reply }).await
    }

    pub async fn job(&self, job_id: JobId) -> SchedResult<Job> {
        match self.status(Some(job_id)).await? {
            StatusReply::One(job) => Ok(job),
            StatusReply::All(_) => Err(SchedError::InvariantViolation(
                "status for one job answered with a listing".into(),
            )),
        }
    }

    pub async fn shutdown(&self, mode: ShutdownMode) -> SchedResult<()> {
        self.call(|reply| Request::Shutdown { mode, reply }).await
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }

    async fn call<T>(
        &self,
        request: impl FnOnce(oneshot::Sender<SchedResult<T>>) -> Request,
    ) -> SchedResult<T> {
        let (reply, response) = oneshot::channel();
        self.tx
            .send(request(reply))
            .await
            .map_err(|_| SchedError::Closed)?;
        response.await.map_err(|_| SchedError::Closed)?
    }
}

async fn run(mut engine: Engine, mut rx: mpsc::Receiver<Request>) -> SchedResult<()> {
    let interval = engine.config().loop_interval;
    tracing::info!(policy = %engine.policy(), ?interval, "Scheduler loop started");

    let mut next: Option<Request> = None;
    loop {
        if let Some(request) = next.take() {
            serve(&mut engine, request).await?;
        }
        engine.tick().await?;
        engine.reap().await?;

        if engine.is_drained() {
            tracing::info!(pending = engine.pending_len(), "Scheduler drained, loop stopped");
            return Ok(());
        }

        tokio::select! {
            request = rx.recv() => match request {
                Some(request) => next = Some(request),
                None => {
                    if engine.deployed_len() > 0 {
                        tracing::warn!(
                            deployed = engine.deployed_len(),
                            "All scheduler handles dropped with jobs still deployed"
                        );
                    }
                    tracing::info!("Scheduler loop stopped");
                    return Ok(());
                }
            },
            _ = tokio::time::sleep(interval) => {}
        }
    }
}

async fn serve(engine: &mut Engine, request: Request) -> SchedResult<()> {
    match request {
        Request::Submit { spec, reply } => {
            let _ = reply.send(engine.submit(spec));
        }
        Request::Cancel { job_id, reply } => {
            let result = engine.cancel(&job_id).await;
            return answer(reply, result);
        }
        Request::Status { job_id, reply } => {
            let result = match job_id {
                Some(job_id) => engine.status(&job_id).map(StatusReply::One),
                None => Ok(StatusReply::All(engine.jobs())),
            };
            let _ = reply.send(result);
        }
        Request::Shutdown { mode, reply } => {
            let result = engine.shutdown(mode).await;
            return answer(reply, result);
        }
    }
    Ok(())
}

/// Send `result` to the caller. An invariant violation is also returned so
/// the loop stops.
fn answer<T>(reply: oneshot::Sender<SchedResult<T>>, result: SchedResult<T>) -> SchedResult<()> {
    match result {
        Err(SchedError::InvariantViolation(message)) => {
            let _ = reply.send(Err(SchedError::InvariantViolation(message.clone())));
            Err(SchedError::InvariantViolation(message))
        }
        result => {
            let _ = reply.send(result);
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use async_trait::async_trait;

    use super::*;
    use crate::config::EngineConfig;
    use crate::deploy::InMemoryDeployer;
    use crate::job::JobStatus;
    use crate::resource::{ResourceHandle, ResourceManager, ResourcePool};

    fn fast_config() -> EngineConfig {
        EngineConfig {
            loop_interval: Duration::from_millis(1),
            ..EngineConfig::default()
        }
    }

    fn spawn(capacity: u32) -> (Scheduler, JoinHandle<SchedResult<()>>, Arc<InMemoryDeployer>) {
        let deployer = Arc::new(InMemoryDeployer::new());
        let engine = Engine::new(
            fast_config(),
            Arc::new(ResourcePool::new(capacity)),
            deployer.clone(),
        )
        .unwrap();
        let (scheduler, task) = Scheduler::spawn(engine);
        (scheduler, task, deployer)
    }

    async fn wait_for(scheduler: &Scheduler, job_id: &str, status: JobStatus) -> Job {
        for _ in 0..1000 {
            let job = scheduler.job(JobId::new(job_id)).await.unwrap();
            if job.status == status {
                return job;
            }
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
        panic!("job {job_id} never reached {status}");
    }

    #[tokio::test]
    async fn test_job_runs_to_completion() {
        let (scheduler, task, deployer) = spawn(1);
        let job_id = scheduler.submit(JobSpec::new("J1")).await.unwrap();
        assert_eq!(job_id, JobId::new("J1"));

        let job = wait_for(&scheduler, "J1", JobStatus::Deployed).await;
        assert!(job.started_at.is_some());

        deployer.finish(&job_id);
        wait_for(&scheduler, "J1", JobStatus::Finished).await;

        let all = scheduler.status(None).await.unwrap().into_jobs();
        assert_eq!(all.len(), 1);

        drop(scheduler);
        task.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_caller_errors_come_back_synchronously() {
        let (scheduler, _task, _deployer) = spawn(0);
        scheduler.submit(JobSpec::new("J1")).await.unwrap();
        assert!(matches!(
            scheduler.submit(JobSpec::new("J1")).await,
            Err(SchedError::DuplicateId(_))
        ));
        assert!(matches!(
            scheduler.cancel(JobId::new("nope")).await,
            Err(SchedError::NotFound(_))
        ));

        let cancelled = scheduler.cancel(JobId::new("J1")).await.unwrap();
        assert_eq!(cancelled.status, JobStatus::Cancelled);
    }

    #[tokio::test]
    async fn test_soft_shutdown_waits_for_deployments() {
        let (scheduler, task, deployer) = spawn(1);
        scheduler.submit(JobSpec::new("J1")).await.unwrap();
        wait_for(&scheduler, "J1", JobStatus::Deployed).await;

        scheduler.shutdown(ShutdownMode::Soft).await.unwrap();
        assert!(matches!(
            scheduler.submit(JobSpec::new("J2")).await,
            Err(SchedError::ShuttingDown)
        ));

        deployer.finish(&JobId::new("J1"));
        task.await.unwrap().unwrap();
        assert!(matches!(
            scheduler.submit(JobSpec::new("J3")).await,
            Err(SchedError::Closed)
        ));
        assert!(scheduler.is_closed());
    }

    /// Grants one unit whatever was asked for.
    struct ShortChanging;

    #[async_trait]
    impl ResourceManager for ShortChanging {
        async fn is_available(&self, _count: u32) -> SchedResult<bool> {
            Ok(true)
        }

        async fn reserve(&self, job_id: &JobId, _count: u32) -> SchedResult<ResourceHandle> {
            Ok(ResourceHandle::new(job_id.clone(), 1))
        }

        async fn release(&self, _job_id: &JobId, _was_deployed: bool) -> SchedResult<()> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_invariant_violation_stops_the_loop() {
        let engine = Engine::new(
            fast_config(),
            Arc::new(ShortChanging),
            Arc::new(InMemoryDeployer::new()),
        )
        .unwrap();
        let (scheduler, task) = Scheduler::spawn(engine);
        scheduler
            .submit(JobSpec::new("J1").with_resources(
                crate::job::ResourceRequest::exact(2).unwrap(),
            ))
            .await
            .unwrap();

        let err = task.await.unwrap().unwrap_err();
        assert!(err.is_fatal());
        assert!(matches!(
            scheduler.status(None).await,
            Err(SchedError::Closed)
        ));
    }
}
