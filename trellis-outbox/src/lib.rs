//! Transactional outbox for Trellis
//!
//! Integration events are published straight to the message bus when it is
//! reachable. When it is not, the event is written to the outbox and a relay
//! job delivers it later, so a broker outage delays events instead of losing
//! them.
//!
//! ## Features
//!
//! - **Publish-or-defer** - `IntegrationEventDispatcher` never fails a caller
//!   because the bus is down
//! - **Atomic enqueue** - stage an event in the same unit of work as the
//!   business data that raised it
//! - **Relay** - `OutboxRelay` re-publishes `ReadyToSend` records each tick
//! - **Retry budget** - records that keep failing move to `Failed`
//! - **Masking** - sensitive fields are masked on the wire, stored in full
//! - **Registry** - stored payloads are rebuilt from an explicit type map
//!
//! ## Record lifecycle
//!
//! ```text
//! ReadyToSend ──► SendToQueue ──► Completed
//!      │               │
//!      └───────────────┴────────► Failed
//! ```
//!
//! States only move forward. `Completed` and `Failed` are terminal.
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use trellis_outbox::*;
//! use std::sync::Arc;
//!
//! let store = InMemoryOutboxStore::new();
//! let bus = InMemoryBus::new();
//! let dispatcher = Arc::new(IntegrationEventDispatcher::new(
//!     Arc::new(bus.clone()),
//!     Arc::new(store.clone()),
//! ));
//!
//! let cancel = CancellationToken::new();
//! dispatcher.publish(&order_placed, &cancel).await?;
//!
//! let registry = EventRegistry::builder().register::<OrderPlaced>()?.build();
//! let relay = OutboxRelay::new(dispatcher, Arc::new(registry));
//! let report = relay.run_once(&cancel).await?;
//! ```

pub mod bus;
pub mod dispatcher;
pub mod error;
pub mod event;
pub mod masking;
pub mod memory;
pub mod record;
pub mod registry;
pub mod relay;
pub mod retry;
pub mod store;

pub use bus::{
    BusError, BusMessage, HEADER_CREATED_AT, HEADER_EVENT_ID, HEADER_EVENT_TYPE, InMemoryBus,
    MessageBus,
};
pub use dispatcher::{IntegrationEventDispatcher, PublishOutcome};
pub use error::{OutboxError, OutboxResult};
pub use event::{DynIntegrationEvent, IntegrationEvent, IntegrationEventMetadata};
pub use masking::{DEFAULT_MASK, SensitiveField, mask_fields};
pub use memory::{InMemoryOutboxStore, InMemoryUnitOfWork};
pub use record::{OutboxRecord, OutboxState};
pub use registry::{EventRegistry, EventRegistryBuilder};
pub use relay::{OutboxRelay, RelayConfig, RelayLease, RelayReport, SingleInstanceLease};
pub use retry::RetryPolicy;
pub use store::{OutboxStore, OutboxUnitOfWork};
pub use tokio_util::sync::CancellationToken;
