//! Domain events for Trellis
//!
//! In-process, sequential fan-out of domain events to the handlers
//! registered for them at startup. Handlers run one at a time in
//! registration order; the first failure stops the fan-out and surfaces to
//! the caller, so the surrounding unit of work can abort. There is no
//! durability here: events that must leave the process go through the
//! outbox instead.
//!
//! ## Features
//!
//! - **Typed handlers** - `DomainEventHandler<E>` runs for exactly `E`
//! - **Catch-all handlers** - `AnyEventHandler` runs for every event
//! - **Runtime-type matching** - boxed events reach their typed handlers
//! - **Cancellation** - a `CancellationToken` is passed to every handler
//! - **Aggregates** - `DomainEvents` buffers events raised by an entity
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use trellis_events::*;
//! use async_trait::async_trait;
//! use std::any::Any;
//! use tokio_util::sync::CancellationToken;
//!
//! #[derive(Debug)]
//! struct OrderPlaced {
//!     order_id: String,
//! }
//!
//! impl DomainEvent for OrderPlaced {
//!     fn event_name(&self) -> &str { "order_placed" }
//!     fn as_any(&self) -> &dyn Any { self }
//! }
//!
//! struct ReserveStock;
//!
//! #[async_trait]
//! impl DomainEventHandler<OrderPlaced> for ReserveStock {
//!     async fn handle(
//!         &self,
//!         event: &OrderPlaced,
//!         _cancel: &CancellationToken,
//!     ) -> Result<(), HandlerError> {
//!         tracing::info!(order_id = %event.order_id, "Reserving stock");
//!         Ok(())
//!     }
//! }
//!
//! #[tokio::main]
//! async fn main() -> Result<(), DispatchError> {
//!     let dispatcher = DomainEventDispatcher::builder()
//!         .handler::<OrderPlaced, _>(ReserveStock)
//!         .build();
//!
//!     let cancel = CancellationToken::new();
//!     dispatcher
//!         .dispatch(&OrderPlaced { order_id: "O1".into() }, &cancel)
//!         .await
//! }
//! ```

pub mod dispatcher;
pub mod event;
pub mod recorder;

pub use dispatcher::{
    DispatchError, DispatcherConfig, DomainEventDispatcher, DomainEventDispatcherBuilder,
};
pub use event::{
    AnyEventHandler, CatchAllHandler, DomainEvent, DomainEventHandler, DynEventHandler,
    EventMetadata, HandlerError, TypedEventHandler,
};
pub use recorder::{AggregateRoot, DomainEvents};
pub use tokio_util::sync::CancellationToken;
