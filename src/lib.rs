//! # etcd-cron
//!
//! Distributed, fault-tolerant cron scheduler embedded in your process.
//!
//! ## Features
//!
//! - Register jobs with cron rhythms or constant-delay schedules.
//! - Run the same jobs on any number of identically-configured processes:
//!   for every scheduled firing, exactly one cohort member executes it.
//! - Coordination through etcd lease-backed locks keyed by
//!   `(job, firing instant)` — no leader election, no cross-process chatter.
//! - Panic-isolated job execution with pluggable error handlers.
//! - Entries can be added, removed, and inspected while the scheduler runs.
//!
//! ## Quick start
//!
//! ```rust,no_run
//! use etcd_cron::{Cron, CronOptions, Job};
//! use tokio_util::sync::CancellationToken;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let cron = Cron::new(CronOptions::default()).await?;
//!     cron.add_job(Job::new("heartbeat", "*/10 * * * * *", |_ctx| async {
//!         println!("still alive");
//!         Ok(())
//!     }))
//!     .await?;
//!     cron.start(CancellationToken::new());
//!     tokio::signal::ctrl_c().await?;
//!     cron.stop();
//!     Ok(())
//! }
//! ```

pub mod entry;
pub mod error;
pub mod etcd_impls;
pub mod job;
#[cfg(feature = "test-support")]
pub mod mocks;
pub mod schedule;
pub mod scheduler;
pub mod traits;
mod worker;

pub use entry::Entry;
pub use error::CronError;
pub use etcd_impls::{EtcdMutex, EtcdMutexBuilder, DEFAULT_ETCD_ENDPOINT};
pub use job::{ErrorHandler, FuncCtx, Job, JobBody};
pub use schedule::{parse, CronSchedule, Every, Schedule};
pub use scheduler::{Cron, CronOptions};
pub use traits::{DistributedMutex, MutexBuilder};
