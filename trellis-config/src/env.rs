// Environment variable loading

use crate::loader::env_key_to_path;
use crate::{ConfigError, Result};
use std::env;

/// Environment variable loader
///
/// With prefix `TRELLIS`, `TRELLIS_OUTBOX__MAX_ATTEMPTS` is reported as the
/// path `outbox.max_attempts`.
pub struct EnvLoader {
    prefix: Option<String>,
}

impl EnvLoader {
    /// Create a new environment loader
    pub fn new(prefix: Option<String>) -> Self {
        Self { prefix }
    }

    /// Load all matching environment variables as `(path, raw value)` pairs
    pub fn load(&self) -> Vec<(String, String)> {
        self.load_from(env::vars())
    }

    /// Same as [`load`](Self::load) over an explicit variable list
    pub fn load_from<I>(&self, vars: I) -> Vec<(String, String)>
    where
        I: IntoIterator<Item = (String, String)>,
    {
        vars.into_iter()
            .filter_map(|(key, value)| {
                let key = match self.prefix {
                    Some(ref prefix) => key.strip_prefix(prefix.as_str())?.strip_prefix('_')?.to_string(),
                    None => key,
                };
                if key.is_empty() {
                    return None;
                }
                Some((env_key_to_path(&key), value))
            })
            .collect()
    }

    /// Load a specific environment variable
    pub fn load_var(&self, key: &str) -> Result<String> {
        let full_key = match self.prefix {
            Some(ref prefix) => format!("{}_{}", prefix, key.to_uppercase()),
            None => key.to_uppercase(),
        };

        env::var(&full_key).map_err(ConfigError::EnvError)
    }

    /// Load with default value
    pub fn load_var_or(&self, key: &str, default: &str) -> String {
        self.load_var(key).unwrap_or_else(|_| default.to_string())
    }
}

impl Default for EnvLoader {
    fn default() -> Self {
        Self::new(None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vars(pairs: &[(&str, &str)]) -> Vec<(String, String)> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_env_loader_with_default() {
        let loader = EnvLoader::new(None);
        let value = loader.load_var_or("NONEXISTENT_VAR_12345", "default");

        assert_eq!(value, "default");
    }

    #[test]
    fn test_env_loader_missing_var() {
        let loader = EnvLoader::new(Some("TRELLIS_TEST".to_string()));
        let result = loader.load_var("MISSING_VAR_67890");

        assert!(result.is_err());
    }

    #[test]
    fn test_prefix_filters_and_strips() {
        let loader = EnvLoader::new(Some("TRELLIS".to_string()));
        let loaded = loader.load_from(vars(&[
            ("TRELLIS_OUTBOX__MAX_ATTEMPTS", "3"),
            ("TRELLISX_IGNORED", "1"),
            ("PATH", "/usr/bin"),
            ("TRELLIS_", "empty"),
        ]));

        assert_eq!(loaded, vec![("outbox.max_attempts".to_string(), "3".to_string())]);
    }

    #[test]
    fn test_no_prefix_keeps_everything() {
        let loader = EnvLoader::default();
        let loaded = loader.load_from(vars(&[("HOME", "/root"), ("APP__NAME", "svc")]));

        assert_eq!(loaded.len(), 2);
        assert!(loaded.contains(&("app.name".to_string(), "svc".to_string())));
    }
}
