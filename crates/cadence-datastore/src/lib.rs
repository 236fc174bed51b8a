//! # Cadence Data Store
//!
//! The in-memory data store and delta-synchronization engine of the Cadence
//! cycling workflow scheduler.
//!
//! The store holds the authoritative, typed representation of the workflow
//! graph (tasks, families, their cycle-point instances, edges, jobs and the
//! workflow summary) and keeps it consistent with the scheduler's live task
//! pool as cycle points advance. Every change of a main-loop iteration is
//! accumulated as minimal delta messages, applied to the local store, and
//! packaged for publishing so that remote observers can maintain an
//! eventually-consistent mirror.
//!
//! ## Architecture
//!
//! - **Identity**: canonical identifier grammar and timestamped stamps
//! - **Store**: authoritative per-workflow maps plus the delta applicator
//! - **Manager**: definition generation, the graph-elements engine, ghost
//!   node generation, dynamic updates, family rollup, the workflow summary
//!   and delta finalization
//! - **Job pool**: the narrow job-ownership interface the store mirrors
//! - **Config / context**: read-side collaborator interfaces
//!
//! The engine runs in a single-threaded cooperative loop: all mutation
//! happens between well-defined suspension points, so each iteration
//! produces an atomically-consistent delta bundle without locking.

pub mod config;
pub mod context;
pub mod error;
pub mod identity;
pub mod job_pool;
pub mod manager;
pub mod point;
pub mod store;

pub use config::{ConfigView, GraphEdge, TaskDefData};
pub use context::{
    ClockTrigger, ExternalTrigger, LiveTask, PoolSnapshot, SchedulerContext,
    SchedulerInfo, SuiteStatus, XtriggerState,
};
pub use error::{DataStoreError, DataStoreResult};
pub use job_pool::JobPool;
pub use manager::{DataStoreMgr, PublishedDelta};
pub use point::CyclePoint;
pub use store::DataStore;

/// Data-store API version advertised on the workflow singleton.
pub const API_VERSION: i32 = 1;

/// Engine version advertised on the workflow singleton.
pub const ENGINE_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Per-job log file names advertised on the workflow singleton.
pub const JOB_LOG_NAMES: [&str; 5] =
    ["job", "job-activity.log", "job.err", "job.out", "job.status"];
