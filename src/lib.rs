//! sched-engine: pluggable admission engine for batch jobs
//!
//! This crate decides **which** pending job gets admitted next onto a shared
//! pool of compute units, and **when**. It does not run jobs itself: capacity
//! lives behind a [`ResourceManager`], execution behind a [`Deployer`], and
//! deadline warnings go out through a [`DeadlineNotifier`].
//!
//! # Overview
//!
//! The crate provides:
//! - An [`Engine`] owning the pending queue and the deployed set
//! - [`Policy`] to choose the admission order: `fifo`, `space`, `time`,
//!   `mixed(...)`, `edf` and `edf-extended`
//! - A [`DeadlineMonitor`] that warns about jobs likely to miss their deadline
//! - A [`Scheduler`] handle driving the engine from a serialized tokio loop
//! - [`EngineConfig`] loadable from TOML
//! - [`SchedError`] with caller, boundary, configuration and fatal variants
//!
//! # Lifecycle
//!
//! ```text
//!   submit() ──→ Queued ──tick()──→ Deployed ──reap()──→ Finished
//!                  │                   │
//!                  └──── cancel() ─────┴──→ Cancelled      (or Failed)
//! ```
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use sched_engine::{
//!     Engine, EngineConfig, InMemoryDeployer, JobSpec, Policy, ResourcePool, Scheduler,
//! };
//!
//! # async fn demo() -> sched_engine::SchedResult<()> {
//! let config = EngineConfig::default().with_policy("edf-extended".parse::<Policy>()?);
//! let engine = Engine::new(
//!     config,
//!     Arc::new(ResourcePool::new(8)),
//!     Arc::new(InMemoryDeployer::new()),
//! )?;
//! let (scheduler, _task) = Scheduler::spawn(engine);
//! scheduler.submit(JobSpec::new("nightly-report")).await?;
//! # Ok(())
//! # }
//! ```

pub mod clock;
pub mod config;
pub mod deploy;
pub mod edf;
pub mod engine;
pub mod error;
pub mod job;
pub mod monitor;
pub mod notify;
pub mod policy;
pub mod queue;
pub mod resource;
pub mod service;
pub mod timing;

pub use clock::{Clock, ManualClock, SystemClock};
pub use config::EngineConfig;
pub use deploy::{Deployer, DeploymentRef, InMemoryDeployer};
pub use engine::{DeployedJob, Engine, ReapReport, ShutdownMode, TickOutcome};
pub use error::{SchedError, SchedResult};
pub use job::{Deadline, Job, JobId, JobSpec, JobStatus, Priority, ResourceRequest};
pub use monitor::DeadlineMonitor;
pub use notify::{DeadlineNotifier, DeadlineWarning, LogNotifier, RecordingNotifier};
pub use policy::Policy;
pub use queue::PendingQueue;
pub use resource::{ResourceHandle, ResourceManager, ResourcePool};
pub use service::{Scheduler, StatusReply};
