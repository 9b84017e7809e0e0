//! Job definition and execution.

use crate::error::CronResult;
use crate::expression::CronExpression;
use chrono::{DateTime, Utc};
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Job execution function type.
pub type JobFn =
    Arc<dyn Fn(JobContext) -> Pin<Box<dyn Future<Output = CronResult<()>> + Send>> + Send + Sync>;

/// Compile-time identity of a job, used both as the scheduler key and as
/// the key of its schedule in configuration.
///
/// ```
/// use trellis_cron::JobId;
///
/// const NIGHTLY_REPORT: JobId = JobId::new("nightly_report");
/// assert_eq!(NIGHTLY_REPORT.as_str(), "nightly_report");
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct JobId(&'static str);

impl JobId {
    pub const fn new(id: &'static str) -> Self {
        Self(id)
    }

    pub const fn as_str(&self) -> &'static str {
        self.0
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.0)
    }
}

impl From<JobId> for String {
    fn from(id: JobId) -> Self {
        id.0.to_string()
    }
}

/// Job execution context.
#[derive(Debug, Clone)]
pub struct JobContext {
    /// Job name
    pub name: String,

    /// Scheduled execution time
    pub scheduled_time: DateTime<Utc>,

    /// Actual execution time
    pub execution_time: DateTime<Utc>,

    /// Execution count (0-based)
    pub execution_count: u64,

    /// Cancelled when the scheduler stops
    pub cancel: CancellationToken,
}

impl JobContext {
    pub fn new(
        name: String,
        scheduled_time: DateTime<Utc>,
        execution_count: u64,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            name,
            scheduled_time,
            execution_time: Utc::now(),
            execution_count,
            cancel,
        }
    }

    /// Get the delay between scheduled and actual execution time.
    pub fn delay(&self) -> chrono::Duration {
        self.execution_time - self.scheduled_time
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }
}

/// Job status.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobStatus {
    /// Job is scheduled and waiting
    Scheduled,

    /// Job is currently running
    Running,

    /// Last run completed successfully
    Completed,

    /// Last run failed
    Failed(String),
}

/// Scheduled job.
pub struct Job {
    pub name: String,

    pub expression: CronExpression,

    pub function: JobFn,

    pub status: JobStatus,

    /// Next execution time
    pub next_run: Option<DateTime<Utc>>,

    /// Last execution time
    pub last_run: Option<DateTime<Utc>>,

    /// Total execution count
    pub execution_count: u64,

    /// Failed execution count
    pub failure_count: u64,

    pub enabled: bool,
}

impl Job {
    /// Create a new job.
    pub fn new<F, Fut>(name: impl Into<String>, expression: CronExpression, function: F) -> Self
    where
        F: Fn(JobContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = CronResult<()>> + Send + 'static,
    {
        let next_run = expression.next();

        let wrapped_fn = Arc::new(
            move |ctx: JobContext| -> Pin<Box<dyn Future<Output = CronResult<()>> + Send>> {
                Box::pin(function(ctx))
            },
        );

        Self {
            name: name.into(),
            expression,
            function: wrapped_fn,
            status: JobStatus::Scheduled,
            next_run,
            last_run: None,
            execution_count: 0,
            failure_count: 0,
            enabled: true,
        }
    }

    /// Whether the job is due at `now`.
    pub fn should_run(&self, now: DateTime<Utc>) -> bool {
        self.enabled
            && self.status != JobStatus::Running
            && self.next_run.is_some_and(|next_run| now >= next_run)
    }

    /// Run the job once, whatever its schedule says.
    ///
    /// The next run is computed from the time the run finishes, so runs
    /// missed while this one was executing are skipped rather than queued.
    pub async fn execute(&mut self, cancel: CancellationToken) -> CronResult<()> {
        self.status = JobStatus::Running;

        let context = JobContext::new(
            self.name.clone(),
            self.next_run.unwrap_or_else(Utc::now),
            self.execution_count,
            cancel,
        );

        let result = (self.function)(context).await;

        let finished = Utc::now();
        self.last_run = Some(finished);
        self.execution_count += 1;
        self.next_run = self.expression.next_after(finished);

        match result {
            Ok(()) => {
                self.status = JobStatus::Completed;
                Ok(())
            }
            Err(e) => {
                self.failure_count += 1;
                self.status = JobStatus::Failed(e.to_string());
                Err(e)
            }
        }
    }

    pub fn enable(&mut self) {
        self.enabled = true;
        if self.next_run.is_none() {
            self.next_run = self.expression.next();
        }
    }

    pub fn disable(&mut self) {
        self.enabled = false;
    }
}

impl fmt::Debug for Job {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Job")
            .field("name", &self.name)
            .field("expression", &self.expression.expression())
            .field("status", &self.status)
            .field("next_run", &self.next_run)
            .field("execution_count", &self.execution_count)
            .field("enabled", &self.enabled)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::CronError;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn every_minute() -> CronExpression {
        CronExpression::parse("0 * * * * *").unwrap()
    }

    #[test]
    fn test_job_creation() {
        let job = Job::new("test", every_minute(), |_ctx| async { Ok(()) });

        assert_eq!(job.name, "test");
        assert_eq!(job.execution_count, 0);
        assert_eq!(job.status, JobStatus::Scheduled);
        assert!(job.enabled);
        assert!(job.next_run.is_some());
    }

    #[tokio::test]
    async fn test_job_execution() {
        let mut job = Job::new("test", every_minute(), |_ctx| async { Ok(()) });

        let result = job.execute(CancellationToken::new()).await;
        assert!(result.is_ok());
        assert_eq!(job.execution_count, 1);
        assert_eq!(job.status, JobStatus::Completed);
        assert!(job.last_run.is_some());
    }

    #[tokio::test]
    async fn test_job_failure() {
        let mut job = Job::new("test", every_minute(), |_ctx| async {
            Err(CronError::ExecutionFailed("test error".to_string()))
        });

        let result = job.execute(CancellationToken::new()).await;
        assert!(result.is_err());
        assert!(matches!(&job.status, JobStatus::Failed(msg) if msg.contains("test error")));
        assert_eq!(job.failure_count, 1);
        assert!(job.next_run.is_some());
    }

    #[test]
    fn test_should_run() {
        let mut job = Job::new("test", every_minute(), |_ctx| async { Ok(()) });
        let due = job.next_run.unwrap();

        assert!(!job.should_run(due - chrono::Duration::seconds(1)));
        assert!(job.should_run(due));

        job.disable();
        assert!(!job.should_run(due));

        job.enable();
        job.status = JobStatus::Running;
        assert!(!job.should_run(due));
    }

    #[tokio::test]
    async fn test_job_context_data() {
        let seen = Arc::new(AtomicU32::new(0));
        let seen_in_job = seen.clone();
        let mut job = Job::new("ctx_test", every_minute(), move |ctx| {
            let seen = seen_in_job.clone();
            async move {
                assert_eq!(ctx.name, "ctx_test");
                seen.store(ctx.execution_count as u32 + 1, Ordering::SeqCst);
                Ok(())
            }
        });

        job.execute(CancellationToken::new()).await.unwrap();
        job.execute(CancellationToken::new()).await.unwrap();
        assert_eq!(seen.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_job_sees_cancellation() {
        let mut job = Job::new("cancel", every_minute(), |ctx| async move {
            if ctx.is_cancelled() {
                return Err(CronError::Cancelled(ctx.name));
            }
            Ok(())
        });

        let cancel = CancellationToken::new();
        cancel.cancel();
        let err = job.execute(cancel).await.unwrap_err();
        assert!(matches!(err, CronError::Cancelled(name) if name == "cancel"));
    }

    #[test]
    fn test_job_id() {
        const REPORT: JobId = JobId::new("report");
        assert_eq!(REPORT.to_string(), "report");
        assert_eq!(String::from(REPORT), "report");
    }
}
