// Trellis - domain events and reliable integration-event delivery for Rust
//
// Domain events fan out to in-process handlers; integration events go to a
// message bus, falling back to a transactional outbox that a scheduled relay
// drains.

// Re-export optional crates
#[cfg(feature = "log")]
pub use trellis_log;

#[cfg(feature = "config")]
pub use trellis_config;

#[cfg(feature = "events")]
pub use trellis_events;

#[cfg(feature = "outbox")]
pub use trellis_outbox;

#[cfg(feature = "cron")]
pub use trellis_cron;

#[cfg(feature = "outbox")]
pub mod outbox_module;

#[cfg(feature = "outbox")]
pub use outbox_module::{
    OUTBOX_RELAY, OutboxModule, OutboxModuleBuilder, OutboxSettings, SetupError,
};

// Prelude for common imports
pub mod prelude {
    #[cfg(feature = "events")]
    pub use trellis_events::{
        AggregateRoot, AnyEventHandler, DomainEvent, DomainEventDispatcher, DomainEventHandler,
        DomainEvents, HandlerError,
    };

    #[cfg(feature = "outbox")]
    pub use trellis_outbox::{
        EventRegistry, IntegrationEvent, IntegrationEventDispatcher, IntegrationEventMetadata,
        MessageBus, OutboxStore, OutboxUnitOfWork, PublishOutcome, SensitiveField,
    };

    #[cfg(feature = "outbox")]
    pub use crate::outbox_module::{OutboxModule, OutboxSettings};

    #[cfg(feature = "cron")]
    pub use trellis_cron::{CronScheduler, JobId, ScheduleConfig};

    #[cfg(feature = "config")]
    pub use trellis_config::ConfigManager;

    pub use tokio_util::sync::CancellationToken;
}
