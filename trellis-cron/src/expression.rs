//! Cron expression parsing and evaluation.

use crate::error::{CronError, CronResult};
use chrono::{DateTime, Utc};
use cron::Schedule;
use std::fmt;
use std::str::FromStr;

/// Parsed cron expression.
#[derive(Debug, Clone)]
pub struct CronExpression {
    schedule: Schedule,
    expression: String,
}

impl CronExpression {
    /// Parse a cron expression.
    ///
    /// Six fields, with an optional seventh for the year:
    /// - Second (0-59)
    /// - Minute (0-59)
    /// - Hour (0-23)
    /// - Day of month (1-31)
    /// - Month (1-12)
    /// - Day of week (0-6, Sunday = 0)
    /// - Year (optional)
    ///
    /// # Examples
    ///
    /// ```
    /// use trellis_cron::CronExpression;
    ///
    /// // Every ten seconds
    /// let expr = CronExpression::parse("*/10 * * * * *").unwrap();
    ///
    /// // Every Monday at 9 AM
    /// let expr = CronExpression::parse("0 0 9 * * MON").unwrap();
    /// ```
    pub fn parse(expression: &str) -> CronResult<Self> {
        let expression = expression.trim();
        let schedule = Schedule::from_str(expression)
            .map_err(|e| CronError::InvalidExpression(format!("{}: {}", expression, e)))?;

        Ok(Self {
            schedule,
            expression: expression.to_string(),
        })
    }

    /// Next execution time strictly after `after`.
    pub fn next_after(&self, after: DateTime<Utc>) -> Option<DateTime<Utc>> {
        self.schedule.after(&after).next()
    }

    /// Next execution time from now.
    pub fn next(&self) -> Option<DateTime<Utc>> {
        self.next_after(Utc::now())
    }

    /// The expression as written.
    pub fn expression(&self) -> &str {
        &self.expression
    }
}

impl FromStr for CronExpression {
    type Err = CronError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for CronExpression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.expression)
    }
}

/// Common cron expression presets.
pub struct CronPresets;

impl CronPresets {
    /// Every second
    pub const EVERY_SECOND: &'static str = "* * * * * *";

    /// Every 10 seconds
    pub const EVERY_10_SECONDS: &'static str = "*/10 * * * * *";

    /// Every minute
    pub const EVERY_MINUTE: &'static str = "0 * * * * *";

    /// Every 5 minutes
    pub const EVERY_5_MINUTES: &'static str = "0 */5 * * * *";

    /// Every hour
    pub const EVERY_HOUR: &'static str = "0 0 * * * *";

    /// Every day at midnight
    pub const DAILY: &'static str = "0 0 0 * * *";
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Timelike};

    #[test]
    fn test_parse_valid_expression() {
        assert!(CronExpression::parse("0 * * * * *").is_ok());
        assert!(CronExpression::parse("0 0 0 1 1 * 2030").is_ok());
    }

    #[test]
    fn test_parse_invalid_expression() {
        let err = CronExpression::parse("invalid").unwrap_err();
        assert!(matches!(err, CronError::InvalidExpression(msg) if msg.starts_with("invalid")));
    }

    #[test]
    fn test_presets() {
        assert!(CronExpression::parse(CronPresets::EVERY_SECOND).is_ok());
        assert!(CronExpression::parse(CronPresets::EVERY_10_SECONDS).is_ok());
        assert!(CronExpression::parse(CronPresets::EVERY_MINUTE).is_ok());
        assert!(CronExpression::parse(CronPresets::DAILY).is_ok());
    }

    #[test]
    fn test_next_after_is_strictly_later() {
        let expr = CronExpression::parse(CronPresets::EVERY_10_SECONDS).unwrap();
        let at = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 10).unwrap();

        let next = expr.next_after(at).unwrap();
        assert_eq!(next.second(), 20);
        assert_eq!(next.minute(), 0);
    }

    #[test]
    fn test_from_str_and_display() {
        let expr: CronExpression = " 0 0 * * * * ".parse().unwrap();
        assert_eq!(expr.to_string(), "0 0 * * * *");
    }
}
