//! Cron job scheduler.

use crate::error::{CronError, CronResult};
use crate::expression::CronExpression;
use crate::job::{Job, JobContext, JobStatus};
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, RwLock};
use tokio::task::{JoinHandle, JoinSet};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

type SharedJob = Arc<Mutex<Job>>;
type JobTable = Arc<RwLock<HashMap<String, SharedJob>>>;

/// Scheduler configuration.
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Tick interval for checking scheduled jobs
    pub tick_interval: Duration,

    /// Maximum concurrent jobs
    pub max_concurrent_jobs: usize,

    /// Whether to log job execution
    pub log_execution: bool,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            tick_interval: Duration::from_secs(1),
            max_concurrent_jobs: 10,
            log_execution: true,
        }
    }
}

/// Cron job scheduler.
///
/// A job never overlaps itself: a tick that finds the job still running
/// skips it. [`stop`](Self::stop) cancels the context token handed to
/// running jobs and waits for them to return.
pub struct CronScheduler {
    jobs: JobTable,
    config: SchedulerConfig,
    shutdown: CancellationToken,
    handle: Option<JoinHandle<()>>,
}

impl CronScheduler {
    /// Create a new scheduler with default configuration.
    pub fn new() -> Self {
        Self::with_config(SchedulerConfig::default())
    }

    /// Create a new scheduler with custom configuration.
    pub fn with_config(config: SchedulerConfig) -> Self {
        debug!(
            tick_interval = ?config.tick_interval,
            max_concurrent_jobs = config.max_concurrent_jobs,
            "Initializing cron scheduler"
        );
        Self {
            jobs: Arc::new(RwLock::new(HashMap::new())),
            config,
            shutdown: CancellationToken::new(),
            handle: None,
        }
    }

    /// Add a job from an expression string.
    ///
    /// # Examples
    ///
    /// ```no_run
    /// use trellis_cron::*;
    ///
    /// # #[tokio::main]
    /// # async fn main() -> Result<(), CronError> {
    /// let scheduler = CronScheduler::new();
    ///
    /// scheduler
    ///     .add_job("cleanup", "0 0 0 * * *", |ctx| async move {
    ///         tracing::info!(job = %ctx.name, "Running cleanup");
    ///         Ok(())
    ///     })
    ///     .await?;
    /// # Ok(())
    /// # }
    /// ```
    pub async fn add_job<F, Fut>(
        &self,
        name: impl Into<String>,
        expression: &str,
        function: F,
    ) -> CronResult<()>
    where
        F: Fn(JobContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = CronResult<()>> + Send + 'static,
    {
        let expression = CronExpression::parse(expression)?;
        self.add_job_with_expression(name, expression, function).await
    }

    /// Add a job with an already parsed expression.
    pub async fn add_job_with_expression<F, Fut>(
        &self,
        name: impl Into<String>,
        expression: CronExpression,
        function: F,
    ) -> CronResult<()>
    where
        F: Fn(JobContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = CronResult<()>> + Send + 'static,
    {
        self.add(Job::new(name, expression, function)).await
    }

    /// Add a prepared job.
    pub async fn add(&self, job: Job) -> CronResult<()> {
        let mut jobs = self.jobs.write().await;
        if jobs.contains_key(&job.name) {
            return Err(CronError::JobAlreadyExists(job.name));
        }

        info!(
            job = %job.name,
            schedule = %job.expression,
            next_run = ?job.next_run,
            "Cron job registered"
        );
        jobs.insert(job.name.clone(), Arc::new(Mutex::new(job)));
        Ok(())
    }

    /// Remove a job from the scheduler.
    pub async fn remove_job(&self, name: &str) -> CronResult<()> {
        self.jobs
            .write()
            .await
            .remove(name)
            .ok_or_else(|| CronError::JobNotFound(name.to_string()))?;
        debug!(job = name, "Cron job removed");
        Ok(())
    }

    /// Names of all jobs, sorted.
    pub async fn list_jobs(&self) -> Vec<String> {
        let mut names: Vec<String> = self.jobs.read().await.keys().cloned().collect();
        names.sort();
        names
    }

    pub async fn has_job(&self, name: &str) -> bool {
        self.jobs.read().await.contains_key(name)
    }

    pub async fn enable_job(&self, name: &str) -> CronResult<()> {
        self.job(name).await?.lock().await.enable();
        Ok(())
    }

    pub async fn disable_job(&self, name: &str) -> CronResult<()> {
        self.job(name).await?.lock().await.disable();
        Ok(())
    }

    /// Run a job now, outside its schedule.
    ///
    /// Waits for an in-flight run of the same job to finish first. Returns
    /// the job's own result.
    pub async fn trigger(&self, name: &str) -> CronResult<()> {
        let job = self.job(name).await?;
        let mut job = job.lock().await;
        debug!(job = name, "Cron job triggered manually");
        job.execute(self.shutdown.child_token()).await
    }

    /// Start the tick loop.
    pub fn start(&mut self) -> CronResult<()> {
        if self.is_running() {
            warn!("Cron scheduler already running");
            return Err(CronError::SchedulerAlreadyRunning);
        }

        if self.shutdown.is_cancelled() {
            self.shutdown = CancellationToken::new();
        }

        let jobs = self.jobs.clone();
        let config = self.config.clone();
        let shutdown = self.shutdown.clone();

        self.handle = Some(tokio::spawn(run_loop(jobs, config, shutdown)));
        info!("Cron scheduler started");
        Ok(())
    }

    /// Stop the tick loop, cancel running jobs, and wait for them.
    pub async fn stop(&mut self) -> CronResult<()> {
        let handle = self.handle.take().ok_or(CronError::SchedulerNotRunning)?;

        self.shutdown.cancel();
        if let Err(e) = handle.await {
            error!(error = %e, "Cron scheduler loop ended abnormally");
        }

        info!("Cron scheduler stopped");
        Ok(())
    }

    pub fn is_running(&self) -> bool {
        self.handle.as_ref().is_some_and(|handle| !handle.is_finished())
    }

    /// Statistics for a job; waits for an in-flight run to finish.
    pub async fn get_stats(&self, name: &str) -> CronResult<JobStats> {
        let job = self.job(name).await?;
        let job = job.lock().await;

        Ok(JobStats {
            name: job.name.clone(),
            expression: job.expression.expression().to_string(),
            enabled: job.enabled,
            execution_count: job.execution_count,
            failure_count: job.failure_count,
            last_run: job.last_run,
            next_run: job.next_run,
            status: job.status.clone(),
        })
    }

    async fn job(&self, name: &str) -> CronResult<SharedJob> {
        self.jobs
            .read()
            .await
            .get(name)
            .cloned()
            .ok_or_else(|| CronError::JobNotFound(name.to_string()))
    }
}

impl Default for CronScheduler {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for CronScheduler {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

async fn run_loop(jobs: JobTable, config: SchedulerConfig, shutdown: CancellationToken) {
    let mut ticker = tokio::time::interval(config.tick_interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    let mut running: JoinSet<()> = JoinSet::new();

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            Some(finished) = running.join_next(), if !running.is_empty() => {
                if let Err(e) = finished {
                    error!(error = %e, "Cron job task panicked");
                }
            }
            _ = ticker.tick() => {
                let due: Vec<SharedJob> = jobs.read().await.values().cloned().collect();
                let now = Utc::now();

                for job in due {
                    if running.len() >= config.max_concurrent_jobs {
                        warn!(
                            max_concurrent_jobs = config.max_concurrent_jobs,
                            "Cron job concurrency limit reached, deferring to next tick"
                        );
                        break;
                    }
                    // A locked job is still running or being inspected.
                    let Ok(guard) = job.try_lock_owned() else {
                        continue;
                    };
                    if !guard.should_run(now) {
                        continue;
                    }
                    running.spawn(run_job(guard, shutdown.child_token(), config.log_execution, now));
                }
            }
        }
    }

    if !running.is_empty() {
        info!(in_flight = running.len(), "Waiting for running cron jobs");
    }
    while let Some(finished) = running.join_next().await {
        if let Err(e) = finished {
            error!(error = %e, "Cron job task panicked");
        }
    }
}

async fn run_job(
    mut job: tokio::sync::OwnedMutexGuard<Job>,
    cancel: CancellationToken,
    log_execution: bool,
    tick: DateTime<Utc>,
) {
    if log_execution {
        debug!(job = %job.name, scheduled = ?job.next_run, tick = %tick, "Executing cron job");
    }

    match job.execute(cancel).await {
        Ok(()) if log_execution => {
            info!(job = %job.name, next_run = ?job.next_run, "Cron job completed");
        }
        Ok(()) => {}
        Err(e) => {
            error!(
                job = %job.name,
                error = %e,
                failures = job.failure_count,
                "Cron job failed"
            );
        }
    }
}

/// Job statistics.
#[derive(Debug, Clone)]
pub struct JobStats {
    pub name: String,
    pub expression: String,
    pub enabled: bool,
    pub execution_count: u64,
    pub failure_count: u64,
    pub last_run: Option<DateTime<Utc>>,
    pub next_run: Option<DateTime<Utc>>,
    pub status: JobStatus,
}
