// Configuration validation

use crate::{ConfigError, Result};

/// Trait for validating configuration
pub trait Validate {
    fn validate(&self) -> Result<()>;
}

/// Configuration validator with rules
pub struct ConfigValidator;

impl ConfigValidator {
    /// Validate that a value is not empty
    pub fn not_empty(value: &str, field: &str) -> Result<()> {
        if value.trim().is_empty() {
            return Err(ConfigError::ValidationError(format!(
                "{} cannot be empty",
                field
            )));
        }
        Ok(())
    }

    /// Validate that a number is within range
    pub fn in_range<T>(value: T, min: T, max: T, field: &str) -> Result<()>
    where
        T: PartialOrd + std::fmt::Display,
    {
        if value < min || value > max {
            return Err(ConfigError::ValidationError(format!(
                "{} must be between {} and {}, got {}",
                field, min, max, value
            )));
        }
        Ok(())
    }

    /// Validate that a number is at least `min`
    pub fn at_least<T>(value: T, min: T, field: &str) -> Result<()>
    where
        T: PartialOrd + std::fmt::Display,
    {
        if value < min {
            return Err(ConfigError::ValidationError(format!(
                "{} must be at least {}, got {}",
                field, min, value
            )));
        }
        Ok(())
    }
}
