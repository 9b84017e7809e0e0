//! Retry budget for outbox records.

use crate::record::OutboxRecord;
use chrono::{DateTime, Utc};
use std::time::Duration;

/// When a record stops being retried and moves to `Failed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Failed attempts after which the record is abandoned
    pub max_attempts: u32,

    /// Age after which the record is abandoned on its next failure
    pub max_age: Option<Duration>,
}

impl RetryPolicy {
    pub const DEFAULT_MAX_ATTEMPTS: u32 = 5;

    pub fn new(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            max_age: None,
        }
    }

    /// Never abandon a record.
    pub fn unlimited() -> Self {
        Self::new(u32::MAX)
    }

    pub fn with_max_age(mut self, max_age: Duration) -> Self {
        self.max_age = Some(max_age);
        self
    }

    /// Whether `record`, after its latest failure, is out of budget.
    pub fn is_exhausted(&self, record: &OutboxRecord, now: DateTime<Utc>) -> bool {
        record.attempts >= self.max_attempts
            || self.max_age.is_some_and(|max_age| record.age(now) >= max_age)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(Self::DEFAULT_MAX_ATTEMPTS)
    }
}
