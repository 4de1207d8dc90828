//! Simulated cluster driven by the admission engine.
//!
//! Jobs "run" for their expected duration scaled down to milliseconds, so a
//! whole batch completes in a couple of seconds. Pass a TOML file to override
//! the engine configuration:
//!
//! ```text
//! RUST_LOG=debug cargo run -- sched.toml
//! ```

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use sched_engine::{
    Deadline, Deployer, DeploymentRef, Engine, EngineConfig, Job, JobSpec, JobStatus,
    LogNotifier, Priority, ResourceHandle, ResourcePool, ResourceRequest, SchedResult,
    Scheduler, ShutdownMode,
};
use tracing_subscriber::EnvFilter;

/// One simulated second of job time per real millisecond.
const TIME_SCALE: u32 = 1000;

/// Deployer whose jobs terminate once their scaled expected duration elapsed.
#[derive(Default)]
struct SimulatedCluster {
    running: Mutex<HashMap<DeploymentRef, Instant>>,
    next_id: Mutex<u64>,
}

#[async_trait]
impl Deployer for SimulatedCluster {
    async fn deploy(&self, job: &Job, handle: &ResourceHandle) -> SchedResult<DeploymentRef> {
        let id = {
            let mut next = self.next_id.lock().unwrap_or_else(|e| e.into_inner());
            *next += 1;
            *next
        };
        let runtime = job.expected_duration.unwrap_or(Duration::from_secs(1)) / TIME_SCALE;
        let deployment = DeploymentRef::new(format!("node-{}/{id}", handle.units.join("+")));
        self.running
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(deployment.clone(), Instant::now() + runtime);
        Ok(deployment)
    }

    async fn is_alive(&self, deployment: &DeploymentRef) -> SchedResult<bool> {
        let mut running = self.running.lock().unwrap_or_else(|e| e.into_inner());
        match running.get(deployment) {
            Some(ends_at) if Instant::now() < *ends_at => Ok(true),
            Some(_) => {
                running.remove(deployment);
                Ok(false)
            }
            None => Ok(false),
        }
    }

    async fn terminate(&self, deployment: &DeploymentRef) -> SchedResult<()> {
        self.running
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(deployment);
        Ok(())
    }
}

fn workload() -> SchedResult<Vec<JobSpec>> {
    let secs = Duration::from_secs;
    Ok(vec![
        JobSpec::new("etl-import")
            .with_resources(ResourceRequest::new(4, 2)?)
            .with_expected_duration(secs(600)),
        JobSpec::new("render-frames")
            .with_resources(ResourceRequest::new(6, 3)?)
            .with_expected_duration(secs(900))
            .with_deadline(Deadline::Relative(secs(3600))),
        JobSpec::new("hotfix-build")
            .with_priority(Priority::High)
            .with_resources(ResourceRequest::exact(2)?)
            .with_expected_duration(secs(300)),
        JobSpec::new("report")
            .with_resources(ResourceRequest::exact(1)?)
            .with_expected_duration(secs(120))
            .with_deadline(Deadline::Relative(secs(60)))
            .with_payload(serde_json::json!({ "format": "pdf" })),
        JobSpec::new("backfill").with_resources(ResourceRequest::new(8, 4)?),
    ])
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = match std::env::args().nth(1) {
        Some(path) => EngineConfig::load(path)?,
        None => EngineConfig::default().with_policy("edf-extended".parse()?),
    };
    println!("Policy: {}", config.policy);
    println!();

    let engine = Engine::new(
        config,
        Arc::new(ResourcePool::new(8)),
        Arc::new(SimulatedCluster::default()),
    )?
    .with_notifier(Arc::new(LogNotifier));
    let (scheduler, task) = Scheduler::spawn(engine);

    for spec in workload()? {
        let job_id = scheduler.submit(spec).await?;
        println!("Submitted {job_id}");
    }

    loop {
        let jobs = scheduler.status(None).await?.into_jobs();
        if !jobs.iter().any(|j| j.status.is_pending()) {
            break;
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
    }

    println!();
    println!("Results:");
    for job in scheduler.status(None).await?.into_jobs() {
        let ran = match (job.started_at, job.finished_at) {
            (Some(started), Some(finished)) => {
                format!("{}ms", (finished - started).num_milliseconds())
            }
            _ => "-".into(),
        };
        let status = match &job.status {
            JobStatus::Failed(reason) => format!("failed ({reason})"),
            status => status.to_string(),
        };
        println!("  {:<14} {:<10} ran {ran}", job.id.to_string(), status);
    }

    scheduler.shutdown(ShutdownMode::Soft).await?;
    task.await??;
    Ok(())
}
