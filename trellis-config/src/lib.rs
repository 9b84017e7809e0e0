// Configuration management for the Trellis framework
//
// Sources are layered into one JSON tree: later loads override earlier
// ones, objects merge key by key. Keys are dotted paths into that tree.

pub mod env;
pub mod error;
pub mod loader;
pub mod validation;
pub mod value;

pub use env::EnvLoader;
pub use error::{ConfigError, Result};
pub use loader::{ConfigLoader, FileFormat};
pub use validation::{ConfigValidator, Validate};

use serde::de::DeserializeOwned;
use serde_json::Value;
use std::path::Path;
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use tracing::debug;

/// Main configuration manager
#[derive(Clone)]
pub struct ConfigManager {
    config: Arc<RwLock<Value>>,
    env_prefix: Option<String>,
}

impl ConfigManager {
    /// Create a new configuration manager
    pub fn new() -> Self {
        Self {
            config: Arc::new(RwLock::new(Value::Object(serde_json::Map::new()))),
            env_prefix: None,
        }
    }

    /// Create with environment variable prefix
    pub fn with_prefix(prefix: impl Into<String>) -> Self {
        Self {
            env_prefix: Some(prefix.into()),
            ..Self::new()
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, Value> {
        self.config.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, Value> {
        self.config.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Load configuration from environment variables
    pub fn load_env(&self) -> Result<()> {
        let loader = EnvLoader::new(self.env_prefix.clone());
        self.apply_env(loader.load());
        Ok(())
    }

    /// Apply `(path, raw value)` pairs as produced by [`EnvLoader`]
    pub fn apply_env(&self, vars: Vec<(String, String)>) {
        let mut config = self.write();
        for (path, raw) in vars {
            debug!(key = %path, "Loaded configuration key from environment");
            value::set_path(&mut config, &path, value::parse_scalar(&raw));
        }
    }

    /// Load configuration from .env file
    pub fn load_dotenv(&self, path: Option<&str>) -> Result<()> {
        if let Some(path) = path {
            dotenvy::from_path(path).map_err(|e| ConfigError::LoadError(e.to_string()))?;
        } else {
            dotenvy::dotenv().ok(); // Ignore if .env doesn't exist
        }
        self.load_env()
    }

    /// Load configuration from file
    pub fn load_file(&self, path: impl AsRef<Path>, format: FileFormat) -> Result<()> {
        let path = path.as_ref();
        let data = ConfigLoader::new(format).load_file(path)?;
        debug!(path = %path.display(), ?format, "Loaded configuration file");
        self.merge_value(data);
        Ok(())
    }

    /// Load configuration from a string in the given format
    pub fn load_str(&self, content: &str, format: FileFormat) -> Result<()> {
        let data = ConfigLoader::new(format).parse(content)?;
        self.merge_value(data);
        Ok(())
    }

    fn merge_value(&self, data: Value) {
        let mut config = self.write();
        value::deep_merge(&mut config, data);
    }

    /// Set a configuration value
    pub fn set<T: serde::Serialize>(&self, key: &str, value: T) -> Result<()> {
        let json_value = serde_json::to_value(value)
            .map_err(|e| ConfigError::SerializationError(e.to_string()))?;

        let mut config = self.write();
        value::set_path(&mut config, key, json_value);

        Ok(())
    }

    /// Get a configuration value
    pub fn get<T: DeserializeOwned>(&self, key: &str) -> Result<T> {
        let config = self.read();

        let found = value::get_path(&config, key)
            .ok_or_else(|| ConfigError::KeyNotFound(key.to_string()))?;

        serde_json::from_value(found.clone()).map_err(|e| ConfigError::DeserializationError {
            key: key.to_string(),
            message: e.to_string(),
        })
    }

    /// Get a configuration value, `None` if the key is absent
    pub fn get_opt<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>> {
        match self.get(key) {
            Ok(value) => Ok(Some(value)),
            Err(ConfigError::KeyNotFound(_)) => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Get a configuration value with default
    pub fn get_or<T: DeserializeOwned>(&self, key: &str, default: T) -> T {
        self.get(key).unwrap_or(default)
    }

    /// Get a string value
    pub fn get_string(&self, key: &str) -> Result<String> {
        self.get(key)
    }

    /// Get an integer value
    pub fn get_int(&self, key: &str) -> Result<i64> {
        self.get(key)
    }

    /// Get a boolean value
    pub fn get_bool(&self, key: &str) -> Result<bool> {
        self.get(key)
    }

    /// Check if a key exists
    pub fn has(&self, key: &str) -> bool {
        value::get_path(&self.read(), key).is_some()
    }

    /// Get all top-level configuration keys
    pub fn keys(&self) -> Vec<String> {
        match &*self.read() {
            Value::Object(map) => map.keys().cloned().collect(),
            _ => Vec::new(),
        }
    }

    /// Merge configuration from another manager
    pub fn merge(&self, other: &ConfigManager) -> Result<()> {
        let other_config = other.read().clone();
        self.merge_value(other_config);
        Ok(())
    }

    /// Deserialize the section at `key` and validate it
    pub fn load_validated<T: DeserializeOwned + Validate>(&self, key: &str) -> Result<T> {
        let section: T = self.get(key)?;
        section.validate()?;
        Ok(section)
    }
}

impl Default for ConfigManager {
    fn default() -> Self {
        Self::new()
    }
}
