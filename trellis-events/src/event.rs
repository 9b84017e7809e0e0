//! Domain event definitions and handler traits

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::any::{Any, TypeId};
use std::fmt::Debug;
use std::marker::PhantomData;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// Domain event trait
///
/// Anything raised inside a bounded context and fanned out to in-process
/// handlers. Runtime-type matching goes through [`as_any`](Self::as_any).
pub trait DomainEvent: Send + Sync + Debug + 'static {
    /// Get event name
    fn event_name(&self) -> &str;

    /// Cast to Any for downcasting
    fn as_any(&self) -> &dyn Any;
}

/// Base event metadata
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventMetadata {
    /// Unique event ID
    pub id: Uuid,

    /// Event name/type
    pub name: String,

    /// Timestamp when event was created
    pub timestamp: DateTime<Utc>,

    /// Optional correlation ID for tracing
    pub correlation_id: Option<Uuid>,

    /// Optional causation ID (ID of the event that caused this event)
    pub causation_id: Option<Uuid>,
}

impl EventMetadata {
    /// Create new event metadata
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            timestamp: Utc::now(),
            correlation_id: None,
            causation_id: None,
        }
    }

    /// Set correlation ID
    pub fn with_correlation_id(mut self, id: Uuid) -> Self {
        self.correlation_id = Some(id);
        self
    }

    /// Set causation ID
    pub fn with_causation_id(mut self, id: Uuid) -> Self {
        self.causation_id = Some(id);
        self
    }

    /// Metadata for an event caused by the one described by `self`.
    ///
    /// Keeps the correlation chain and records `self.id` as the cause.
    pub fn caused(&self, name: impl Into<String>) -> Self {
        Self::new(name)
            .with_correlation_id(self.correlation_id.unwrap_or(self.id))
            .with_causation_id(self.id)
    }
}

/// Handler for one concrete domain event type
#[async_trait]
pub trait DomainEventHandler<E: DomainEvent>: Send + Sync {
    /// Handle the event
    async fn handle(&self, event: &E, cancel: &CancellationToken) -> Result<(), HandlerError>;
}

/// Handler that receives every domain event
#[async_trait]
pub trait AnyEventHandler: Send + Sync {
    async fn handle_any(
        &self,
        event: &dyn DomainEvent,
        cancel: &CancellationToken,
    ) -> Result<(), HandlerError>;
}

/// Event handler error
#[derive(Debug, thiserror::Error)]
pub enum HandlerError {
    #[error("Handler failed: {0}")]
    HandlerFailed(String),

    #[error("Event processing error: {0}")]
    ProcessingError(String),

    #[error("Handler cancelled")]
    Cancelled,
}

/// Type-erased event handler
#[async_trait]
pub trait DynEventHandler: Send + Sync {
    /// Event type this handler accepts; `None` accepts every event
    fn handles(&self) -> Option<TypeId>;

    /// Name used in logs and errors
    fn handler_name(&self) -> &'static str;

    /// Handle event (type-erased)
    async fn handle_dyn(
        &self,
        event: &dyn DomainEvent,
        cancel: &CancellationToken,
    ) -> Result<(), HandlerError>;

    /// Whether this handler runs for an event of the given runtime type
    fn accepts(&self, type_id: TypeId) -> bool {
        self.handles().is_none_or(|handled| handled == type_id)
    }
}

/// Wrapper for typed event handlers
pub struct TypedEventHandler<E, H> {
    handler: H,
    _phantom: PhantomData<fn(&E)>,
}

impl<E: DomainEvent, H: DomainEventHandler<E>> TypedEventHandler<E, H> {
    pub fn new(handler: H) -> Self {
        Self {
            handler,
            _phantom: PhantomData,
        }
    }
}

#[async_trait]
impl<E, H> DynEventHandler for TypedEventHandler<E, H>
where
    E: DomainEvent,
    H: DomainEventHandler<E> + 'static,
{
    fn handles(&self) -> Option<TypeId> {
        Some(TypeId::of::<E>())
    }

    fn handler_name(&self) -> &'static str {
        std::any::type_name::<H>()
    }

    async fn handle_dyn(
        &self,
        event: &dyn DomainEvent,
        cancel: &CancellationToken,
    ) -> Result<(), HandlerError> {
        match event.as_any().downcast_ref::<E>() {
            Some(typed_event) => self.handler.handle(typed_event, cancel).await,
            None => Err(HandlerError::HandlerFailed("Type mismatch".to_string())),
        }
    }
}

/// Wrapper for handlers registered for every event type
pub struct CatchAllHandler<H> {
    handler: H,
}

impl<H: AnyEventHandler> CatchAllHandler<H> {
    pub fn new(handler: H) -> Self {
        Self { handler }
    }
}

#[async_trait]
impl<H: AnyEventHandler + 'static> DynEventHandler for CatchAllHandler<H> {
    fn handles(&self) -> Option<TypeId> {
        None
    }

    fn handler_name(&self) -> &'static str {
        std::any::type_name::<H>()
    }

    async fn handle_dyn(
        &self,
        event: &dyn DomainEvent,
        cancel: &CancellationToken,
    ) -> Result<(), HandlerError> {
        self.handler.handle_any(event, cancel).await
    }
}
