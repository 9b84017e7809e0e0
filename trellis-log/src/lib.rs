//! Trellis Logging
//!
//! Installs a [`tracing`] subscriber for Trellis applications. Every Trellis
//! crate logs through the `tracing` macros with structured fields
//! (`event_id`, `event_type`, `job`, ...); this crate decides how those
//! records are filtered and rendered.
//!
//! # Usage
//!
//! ```rust,no_run
//! use trellis_log::{LogConfig, Format};
//!
//! // From environment variables
//! trellis_log::init(&LogConfig::from_env()).ok();
//!
//! // Or explicitly
//! let config = LogConfig::default().with_format(Format::Compact);
//! trellis_log::try_init(&config);
//! ```
//!
//! # Environment Variables
//!
//! - `TRELLIS_DEBUG=1` - Enable debug logging
//! - `TRELLIS_LOG_LEVEL=trace|debug|info|warn|error|off` - Set log level
//! - `TRELLIS_LOG_FORMAT=pretty|json|compact` - Set output format
//! - `TRELLIS_LOG_COLOR=1|0` - Enable/disable ANSI colors
//! - `RUST_LOG` - Full `EnvFilter` directives; overrides the level

use std::env;
use std::str::FromStr;
use thiserror::Error;
use tracing_subscriber::prelude::*;
use tracing_subscriber::{EnvFilter, fmt};

// ============================================================================
// Log Levels
// ============================================================================

/// Minimum level of records that are emitted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Level {
    /// Trace level (most verbose)
    Trace,
    /// Debug level
    Debug,
    /// Info level
    Info,
    /// Warning level
    Warn,
    /// Error level (least verbose)
    Error,
    /// Off (no logging)
    Off,
}

impl Level {
    /// Directive understood by [`EnvFilter`].
    pub fn as_directive(&self) -> &'static str {
        match self {
            Level::Trace => "trace",
            Level::Debug => "debug",
            Level::Info => "info",
            Level::Warn => "warn",
            Level::Error => "error",
            Level::Off => "off",
        }
    }
}

impl FromStr for Level {
    type Err = LogError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "trace" => Ok(Level::Trace),
            "debug" => Ok(Level::Debug),
            "info" => Ok(Level::Info),
            "warn" | "warning" => Ok(Level::Warn),
            "error" => Ok(Level::Error),
            "off" | "none" => Ok(Level::Off),
            other => Err(LogError::InvalidLevel(other.to_string())),
        }
    }
}

impl std::fmt::Display for Level {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.as_directive().to_uppercase())
    }
}

// ============================================================================
// Log Format
// ============================================================================

/// Output format for log records.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Format {
    /// Multi-line human readable output
    Pretty,
    /// Compact single-line format
    Compact,
    /// JSON lines for log aggregation
    Json,
}

impl FromStr for Format {
    type Err = LogError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "pretty" => Ok(Format::Pretty),
            "compact" => Ok(Format::Compact),
            "json" => Ok(Format::Json),
            other => Err(LogError::InvalidFormat(other.to_string())),
        }
    }
}

// ============================================================================
// Configuration
// ============================================================================

/// Logging errors.
#[derive(Debug, Error)]
pub enum LogError {
    #[error("Invalid log level: {0}")]
    InvalidLevel(String),

    #[error("Invalid log format: {0}")]
    InvalidFormat(String),

    #[error("Global subscriber already installed: {0}")]
    AlreadyInitialized(String),
}

/// Logging configuration.
#[derive(Debug, Clone)]
pub struct LogConfig {
    /// Minimum log level
    pub level: Level,
    /// Output format
    pub format: Format,
    /// Whether ANSI colors are enabled
    pub color: bool,
    /// Whether to include the record target (module path)
    pub target: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: Level::Info,
            format: Format::Json,
            color: false,
            target: true,
        }
    }
}

impl LogConfig {
    /// Create config from the process environment.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Create config from an arbitrary variable lookup.
    ///
    /// Unparseable values fall back to the defaults.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let flag = |key: &str| {
            lookup(key).map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
        };

        let debug = flag("TRELLIS_DEBUG").unwrap_or(false);

        let level = lookup("TRELLIS_LOG_LEVEL")
            .and_then(|s| s.parse().ok())
            .unwrap_or(if debug { Level::Debug } else { Level::Info });

        let format = lookup("TRELLIS_LOG_FORMAT")
            .and_then(|s| s.parse().ok())
            .unwrap_or(Format::Json);

        let color = flag("TRELLIS_LOG_COLOR")
            .unwrap_or_else(|| format != Format::Json && lookup("NO_COLOR").is_none());

        Self {
            level,
            format,
            color,
            target: true,
        }
    }

    /// Set the minimum level.
    pub fn with_level(mut self, level: Level) -> Self {
        self.level = level;
        self
    }

    /// Set the output format.
    pub fn with_format(mut self, format: Format) -> Self {
        self.format = format;
        self
    }

    /// Enable or disable ANSI colors.
    pub fn with_color(mut self, color: bool) -> Self {
        self.color = color;
        self
    }

    /// Build the filter: `RUST_LOG` wins when set, otherwise the level.
    pub fn env_filter(&self) -> EnvFilter {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(self.level.as_directive()))
    }
}

// ============================================================================
// Public API
// ============================================================================

/// Install the global subscriber.
///
/// Fails if a global subscriber was already installed.
pub fn init(config: &LogConfig) -> Result<(), LogError> {
    let registry = tracing_subscriber::registry().with(config.env_filter());

    let result = match config.format {
        Format::Pretty => registry
            .with(
                fmt::layer()
                    .pretty()
                    .with_ansi(config.color)
                    .with_target(config.target),
            )
            .try_init(),
        Format::Compact => registry
            .with(
                fmt::layer()
                    .compact()
                    .with_ansi(config.color)
                    .with_target(config.target),
            )
            .try_init(),
        Format::Json => registry
            .with(
                fmt::layer()
                    .json()
                    .flatten_event(true)
                    .with_current_span(true)
                    .with_target(config.target),
            )
            .try_init(),
    };

    result.map_err(|e| LogError::AlreadyInitialized(e.to_string()))
}

/// Install the global subscriber unless one is already present.
///
/// Returns `true` if this call installed it.
pub fn try_init(config: &LogConfig) -> bool {
    init(config).is_ok()
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| vars.get(key).cloned()
    }

    #[test]
    fn test_level_ordering() {
        assert!(Level::Trace < Level::Debug);
        assert!(Level::Debug < Level::Info);
        assert!(Level::Info < Level::Warn);
        assert!(Level::Warn < Level::Error);
        assert!(Level::Error < Level::Off);
    }

    #[test]
    fn test_level_from_str() {
        assert_eq!("DEBUG".parse::<Level>().unwrap(), Level::Debug);
        assert_eq!("warning".parse::<Level>().unwrap(), Level::Warn);
        assert_eq!("none".parse::<Level>().unwrap(), Level::Off);
        assert!("verbose".parse::<Level>().is_err());
    }

    #[test]
    fn test_format_from_str() {
        assert_eq!("json".parse::<Format>().unwrap(), Format::Json);
        assert_eq!("Compact".parse::<Format>().unwrap(), Format::Compact);
        assert!("xml".parse::<Format>().is_err());
    }

    #[test]
    fn test_defaults_without_env() {
        let config = LogConfig::from_lookup(lookup_from(&[]));
        assert_eq!(config.level, Level::Info);
        assert_eq!(config.format, Format::Json);
        assert!(!config.color);
    }

    #[test]
    fn test_debug_flag_lowers_level() {
        let config = LogConfig::from_lookup(lookup_from(&[("TRELLIS_DEBUG", "true")]));
        assert_eq!(config.level, Level::Debug);
    }

    #[test]
    fn test_explicit_level_wins_over_debug() {
        let config = LogConfig::from_lookup(lookup_from(&[
            ("TRELLIS_DEBUG", "1"),
            ("TRELLIS_LOG_LEVEL", "error"),
            ("TRELLIS_LOG_FORMAT", "pretty"),
            ("TRELLIS_LOG_COLOR", "0"),
        ]));
        assert_eq!(config.level, Level::Error);
        assert_eq!(config.format, Format::Pretty);
        assert!(!config.color);
    }

    #[test]
    fn test_invalid_values_fall_back() {
        let config = LogConfig::from_lookup(lookup_from(&[
            ("TRELLIS_LOG_LEVEL", "chatty"),
            ("TRELLIS_LOG_FORMAT", "yaml"),
        ]));
        assert_eq!(config.level, Level::Info);
        assert_eq!(config.format, Format::Json);
    }

    #[test]
    fn test_second_init_fails() {
        let config = LogConfig::default().with_level(Level::Off);
        let _ = init(&config);
        assert!(matches!(init(&config), Err(LogError::AlreadyInitialized(_))));
        assert!(!try_init(&config));
    }
}
