//! Cron job scheduling for Trellis.
//!
//! - Standard six or seven field cron expressions
//! - Named jobs identified by compile-time `JobId` constants
//! - Schedules read from configuration and validated at startup
//! - Async job execution with a cancellation token per run
//! - Job overlap prevention
//! - Graceful shutdown that waits for running jobs
//!
//! ## Cron Expressions
//!
//! ```
//! use trellis_cron::CronExpression;
//!
//! let expr = CronExpression::parse("0 0 * * * *").unwrap();
//!
//! let now = chrono::Utc::now();
//! let next = expr.next_after(now);
//! assert!(next.unwrap() > now);
//! ```
//!
//! ## Schedules from configuration
//!
//! ```
//! use trellis_cron::{JobId, ScheduleConfig};
//!
//! const REPORT: JobId = JobId::new("report");
//!
//! let schedules = ScheduleConfig::new().with(REPORT, "0 0 6 * * *");
//! let resolved = schedules.resolve(&[REPORT]).unwrap();
//! assert!(resolved.get(REPORT).is_some());
//! ```
//!
//! ## Complete Example
//!
//! ```no_run
//! use trellis_cron::*;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), CronError> {
//!     let mut scheduler = CronScheduler::new();
//!
//!     scheduler
//!         .add_job("cleanup", "0 * * * * *", |ctx| async move {
//!             tracing::info!(job = %ctx.name, "Running cleanup");
//!             Ok(())
//!         })
//!         .await?;
//!
//!     scheduler.start()?;
//!     tokio::signal::ctrl_c().await.ok();
//!     scheduler.stop().await
//! }
//! ```

pub mod error;
pub mod expression;
pub mod job;
pub mod schedule;
pub mod scheduler;

pub use error::{CronError, CronResult};
pub use expression::{CronExpression, CronPresets};
pub use job::{Job, JobContext, JobFn, JobId, JobStatus};
pub use schedule::{ResolvedSchedules, ScheduleConfig};
pub use scheduler::{CronScheduler, JobStats, SchedulerConfig};

/// Re-export commonly used types
pub mod prelude {
    pub use crate::error::{CronError, CronResult};
    pub use crate::expression::CronExpression;
    pub use crate::job::{Job, JobContext, JobId, JobStatus};
    pub use crate::schedule::ScheduleConfig;
    pub use crate::scheduler::{CronScheduler, SchedulerConfig};
}
