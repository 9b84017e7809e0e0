//! Job schedules supplied by configuration.

use crate::error::{CronError, CronResult};
use crate::expression::CronExpression;
use crate::job::JobId;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::debug;

/// Map from job id to cron expression, as read from configuration.
///
/// ```toml
/// [outbox.schedules]
/// outbox_relay = "*/10 * * * * *"
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ScheduleConfig(HashMap<String, String>);

impl ScheduleConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder form of [`insert`](Self::insert).
    pub fn with(mut self, job: JobId, expression: impl Into<String>) -> Self {
        self.insert(job, expression);
        self
    }

    pub fn insert(&mut self, job: JobId, expression: impl Into<String>) {
        self.0.insert(job.as_str().to_string(), expression.into());
    }

    pub fn get(&self, job: JobId) -> Option<&str> {
        self.0.get(job.as_str()).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Parse the schedule of every job in `required`.
    ///
    /// Fails on the first job that has no entry or whose expression does
    /// not parse. Entries for jobs not listed are ignored.
    pub fn resolve(&self, required: &[JobId]) -> CronResult<ResolvedSchedules> {
        let mut resolved = HashMap::with_capacity(required.len());

        for &job in required {
            let raw = self
                .get(job)
                .ok_or_else(|| CronError::MissingSchedule(job.to_string()))?;
            let expression = CronExpression::parse(raw).map_err(|e| match e {
                CronError::InvalidExpression(msg) => {
                    CronError::InvalidExpression(format!("job '{}': {}", job, msg))
                }
                other => other,
            })?;
            debug!(job = %job, schedule = %expression, "Schedule resolved");
            resolved.insert(job, expression);
        }

        Ok(ResolvedSchedules(resolved))
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for ScheduleConfig {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self(
            iter.into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        )
    }
}

/// Parsed schedules, one per required job.
#[derive(Debug, Clone, Default)]
pub struct ResolvedSchedules(HashMap<JobId, CronExpression>);

impl ResolvedSchedules {
    pub fn get(&self, job: JobId) -> Option<&CronExpression> {
        self.0.get(&job)
    }

    /// Schedule for `job`, or `MissingSchedule` if it was not resolved.
    pub fn require(&self, job: JobId) -> CronResult<&CronExpression> {
        self.get(job)
            .ok_or_else(|| CronError::MissingSchedule(job.to_string()))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}
