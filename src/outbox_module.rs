//! Wiring of the outbox pieces into a runnable module.
//!
//! ```rust,ignore
//! let config = ConfigManager::with_prefix("TRELLIS");
//! config.load_file("config/app.toml", FileFormat::Toml)?;
//! config.load_env()?;
//!
//! let mut outbox = OutboxModule::builder()
//!     .store(Arc::new(store))
//!     .bus(Arc::new(bus))
//!     .registry(registry)
//!     .settings(OutboxSettings::from_config(&config)?)
//!     .build()
//!     .await?;
//!
//! outbox.start()?;
//! ```

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use trellis_config::{ConfigError, ConfigManager, ConfigValidator, Validate};
use trellis_cron::{CronError, CronScheduler, JobId, ScheduleConfig, SchedulerConfig};
use trellis_outbox::{
    EventRegistry, IntegrationEventDispatcher, MessageBus, OutboxError, OutboxRelay, OutboxStore,
    RelayConfig, RelayLease, RetryPolicy,
};

/// Job id of the relay; its schedule lives at `outbox.schedules.outbox_relay`.
pub const OUTBOX_RELAY: JobId = JobId::new("outbox_relay");

/// Configuration section key
const SECTION: &str = "outbox";

/// Errors raised while assembling the module.
#[derive(Debug, Error)]
pub enum SetupError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Scheduler error: {0}")]
    Cron(#[from] CronError),

    #[error("Outbox error: {0}")]
    Outbox(#[from] OutboxError),

    /// A required builder input was not supplied
    #[error("Outbox module is missing its {0}")]
    MissingComponent(&'static str),
}

/// Outbox settings, read from the `outbox` configuration section.
///
/// ```toml
/// [outbox]
/// max_attempts = 5
/// batch_size = 100
///
/// [outbox.schedules]
/// outbox_relay = "*/10 * * * * *"
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutboxSettings {
    /// Failed deliveries after which a record is marked failed
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Age in seconds after which a record is marked failed on its next failure
    #[serde(default)]
    pub max_age_secs: Option<u64>,

    /// Most records relayed per tick
    #[serde(default)]
    pub batch_size: Option<usize>,

    #[serde(default)]
    pub schedules: ScheduleConfig,
}

fn default_max_attempts() -> u32 {
    RetryPolicy::DEFAULT_MAX_ATTEMPTS
}

impl Default for OutboxSettings {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            max_age_secs: None,
            batch_size: None,
            schedules: ScheduleConfig::default(),
        }
    }
}

impl OutboxSettings {
    /// Load and validate the `outbox` section; defaults when absent.
    pub fn from_config(config: &ConfigManager) -> Result<Self, ConfigError> {
        let settings = config.get_opt::<Self>(SECTION)?.unwrap_or_default();
        settings.validate()?;
        Ok(settings)
    }

    pub fn with_schedule(mut self, job: JobId, expression: impl Into<String>) -> Self {
        self.schedules.insert(job, expression);
        self
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        let policy = RetryPolicy::new(self.max_attempts);
        match self.max_age_secs {
            Some(secs) => policy.with_max_age(Duration::from_secs(secs)),
            None => policy,
        }
    }

    pub fn relay_config(&self) -> RelayConfig {
        RelayConfig {
            batch_size: self.batch_size,
            ..RelayConfig::default()
        }
    }
}

impl Validate for OutboxSettings {
    fn validate(&self) -> trellis_config::Result<()> {
        ConfigValidator::at_least(self.max_attempts, 1, "max_attempts")?;
        if let Some(batch_size) = self.batch_size {
            ConfigValidator::at_least(batch_size, 1, "batch_size")?;
        }
        if let Some(max_age_secs) = self.max_age_secs {
            ConfigValidator::at_least(max_age_secs, 1, "max_age_secs")?;
        }
        Ok(())
    }
}

/// The dispatcher, the relay, and a scheduler that runs the relay.
pub struct OutboxModule {
    dispatcher: Arc<IntegrationEventDispatcher>,
    relay: Arc<OutboxRelay>,
    scheduler: CronScheduler,
    settings: OutboxSettings,
}

impl OutboxModule {
    pub fn builder() -> OutboxModuleBuilder {
        OutboxModuleBuilder::default()
    }

    /// Dispatcher for publishing integration events.
    pub fn dispatcher(&self) -> &Arc<IntegrationEventDispatcher> {
        &self.dispatcher
    }

    pub fn relay(&self) -> &Arc<OutboxRelay> {
        &self.relay
    }

    pub fn scheduler(&self) -> &CronScheduler {
        &self.scheduler
    }

    pub fn settings(&self) -> &OutboxSettings {
        &self.settings
    }

    /// Start running the relay on its schedule.
    pub fn start(&mut self) -> Result<(), SetupError> {
        self.scheduler.start()?;
        Ok(())
    }

    /// Stop the scheduler, waiting for a running relay tick to finish.
    pub async fn shutdown(&mut self) -> Result<(), SetupError> {
        self.scheduler.stop().await?;
        Ok(())
    }

    /// Run the relay until `cancel` fires, then shut down.
    pub async fn run_until_cancelled(&mut self, cancel: CancellationToken) -> Result<(), SetupError> {
        self.start()?;
        cancel.cancelled().await;
        self.shutdown().await
    }

    /// Run one relay tick now, outside the schedule.
    pub async fn relay_now(&self) -> Result<(), SetupError> {
        self.scheduler.trigger(OUTBOX_RELAY.as_str()).await?;
        Ok(())
    }
}

impl std::fmt::Debug for OutboxModule {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OutboxModule")
            .field("relay", &self.relay)
            .field("running", &self.scheduler.is_running())
            .field("settings", &self.settings)
            .finish()
    }
}

/// Builder for [`OutboxModule`].
#[derive(Default)]
pub struct OutboxModuleBuilder {
    store: Option<Arc<dyn OutboxStore>>,
    bus: Option<Arc<dyn MessageBus>>,
    registry: Option<EventRegistry>,
    lease: Option<Arc<dyn RelayLease>>,
    settings: OutboxSettings,
    scheduler_config: SchedulerConfig,
}

impl OutboxModuleBuilder {
    pub fn store(mut self, store: Arc<dyn OutboxStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn bus(mut self, bus: Arc<dyn MessageBus>) -> Self {
        self.bus = Some(bus);
        self
    }

    pub fn registry(mut self, registry: EventRegistry) -> Self {
        self.registry = Some(registry);
        self
    }

    /// Lease shared between relay instances; process-local by default.
    pub fn lease(mut self, lease: Arc<dyn RelayLease>) -> Self {
        self.lease = Some(lease);
        self
    }

    pub fn settings(mut self, settings: OutboxSettings) -> Self {
        self.settings = settings;
        self
    }

    pub fn scheduler_config(mut self, config: SchedulerConfig) -> Self {
        self.scheduler_config = config;
        self
    }

    /// Assemble the module.
    ///
    /// Fails when a component is missing, the settings are invalid, or the
    /// relay has no valid schedule.
    pub async fn build(self) -> Result<OutboxModule, SetupError> {
        let store = self.store.ok_or(SetupError::MissingComponent("store"))?;
        let bus = self.bus.ok_or(SetupError::MissingComponent("message bus"))?;
        let registry = self
            .registry
            .ok_or(SetupError::MissingComponent("event registry"))?;

        self.settings.validate()?;
        let schedules = self.settings.schedules.resolve(&[OUTBOX_RELAY])?;
        let schedule = schedules.require(OUTBOX_RELAY)?.clone();

        if registry.is_empty() {
            warn!("Outbox event registry is empty; relayed records will not decode");
        }

        let dispatcher = Arc::new(
            IntegrationEventDispatcher::new(bus, store)
                .with_retry_policy(self.settings.retry_policy()),
        );

        let mut relay = OutboxRelay::new(dispatcher.clone(), Arc::new(registry))
            .with_config(self.settings.relay_config());
        if let Some(lease) = self.lease {
            relay = relay.with_lease(lease);
        }
        let relay = Arc::new(relay);

        let scheduler = CronScheduler::with_config(self.scheduler_config);
        let job_relay = relay.clone();
        scheduler
            .add_job_with_expression(OUTBOX_RELAY, schedule.clone(), move |ctx| {
                let relay = job_relay.clone();
                async move {
                    relay
                        .run_once(&ctx.cancel)
                        .await
                        .map(|_| ())
                        .map_err(|e| CronError::ExecutionFailed(e.to_string()))
                }
            })
            .await?;

        info!(
            job = %OUTBOX_RELAY,
            schedule = %schedule,
            max_attempts = self.settings.max_attempts,
            event_types = ?relay.registry().event_types(),
            "Outbox module assembled"
        );

        Ok(OutboxModule {
            dispatcher,
            relay,
            scheduler,
            settings: self.settings,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use trellis_config::FileFormat;

    #[test]
    fn test_settings_defaults() {
        let settings = OutboxSettings::default();
        assert_eq!(settings.max_attempts, 5);
        assert_eq!(settings.retry_policy(), RetryPolicy::default());
        assert!(settings.schedules.is_empty());
    }

    #[test]
    fn test_settings_from_toml() {
        let config = ConfigManager::new();
        config
            .load_str(
                r#"
                [outbox]
                max_attempts = 3
                max_age_secs = 3600
                batch_size = 50

                [outbox.schedules]
                outbox_relay = "*/10 * * * * *"
                "#,
                FileFormat::Toml,
            )
            .unwrap();

        let settings = OutboxSettings::from_config(&config).unwrap();
        assert_eq!(settings.max_attempts, 3);
        assert_eq!(settings.batch_size, Some(50));
        assert_eq!(settings.schedules.get(OUTBOX_RELAY), Some("*/10 * * * * *"));

        let policy = settings.retry_policy();
        assert_eq!(policy.max_age, Some(Duration::from_secs(3600)));
    }

    #[test]
    fn test_settings_absent_section_uses_defaults() {
        let settings = OutboxSettings::from_config(&ConfigManager::new()).unwrap();
        assert_eq!(settings, OutboxSettings::default());
    }

    #[test]
    fn test_settings_validation() {
        let config = ConfigManager::new();
        config.set("outbox.max_attempts", 0).unwrap();

        let err = OutboxSettings::from_config(&config).unwrap_err();
        assert!(matches!(err, ConfigError::ValidationError(msg) if msg.contains("max_attempts")));
    }

    #[tokio::test]
    async fn test_module_debug_shows_settings() {
        let module = OutboxModule::builder()
            .store(Arc::new(trellis_outbox::InMemoryOutboxStore::new()))
            .bus(Arc::new(trellis_outbox::InMemoryBus::new()))
            .registry(EventRegistry::builder().build())
            .settings(OutboxSettings::default().with_schedule(OUTBOX_RELAY, "0 0 0 * * *"))
            .build()
            .await
            .unwrap();

        let debug = format!("{module:?}");
        assert!(debug.contains("OutboxModule"));
        assert!(debug.contains("running: false"));
        assert!(debug.contains("outbox_relay"));
    }

    #[tokio::test]
    async fn test_build_requires_components() {
        let result = OutboxModule::builder().build().await;
        assert!(matches!(result, Err(SetupError::MissingComponent("store"))));
    }
}
