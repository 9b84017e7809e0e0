//! Domain event dispatcher

use crate::event::{
    AnyEventHandler, CatchAllHandler, DomainEvent, DomainEventHandler, DynEventHandler,
    HandlerError, TypedEventHandler,
};
use crate::recorder::DomainEvents;
use std::any::{Any, TypeId};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, trace};

/// Sequential, fail-fast fan-out of domain events to registered handlers
///
/// Handlers are fixed at build time and run one after another in
/// registration order. The first failing handler stops the fan-out.
#[derive(Clone)]
pub struct DomainEventDispatcher {
    handlers: Arc<[Arc<dyn DynEventHandler>]>,
    config: Arc<DispatcherConfig>,
}

/// Dispatcher configuration
#[derive(Debug, Clone)]
pub struct DispatcherConfig {
    /// Enable event logging
    pub enable_logging: bool,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            enable_logging: true,
        }
    }
}

/// Dispatch errors
#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    #[error("Handler {handler} failed for event '{event}': {source}")]
    HandlerFailed {
        event: String,
        handler: &'static str,
        #[source]
        source: HandlerError,
    },

    #[error("Dispatch of event '{0}' was cancelled")]
    Cancelled(String),
}

impl DomainEventDispatcher {
    /// Create a dispatcher builder
    pub fn builder() -> DomainEventDispatcherBuilder {
        DomainEventDispatcherBuilder::new()
    }

    /// Dispatcher with no handlers
    pub fn empty() -> Self {
        Self::builder().build()
    }

    /// Deliver one event to every handler registered for its type
    ///
    /// # Examples
    ///
    /// ```rust,ignore
    /// dispatcher.dispatch(&OrderPlaced { .. }, &cancel).await?;
    /// ```
    pub async fn dispatch<E: DomainEvent>(
        &self,
        event: &E,
        cancel: &CancellationToken,
    ) -> Result<(), DispatchError> {
        self.dispatch_dyn(event, cancel).await
    }

    /// Deliver a type-erased event, matching handlers on its runtime type
    pub async fn dispatch_dyn(
        &self,
        event: &dyn DomainEvent,
        cancel: &CancellationToken,
    ) -> Result<(), DispatchError> {
        let type_id = Any::type_id(event.as_any());
        let mut delivered = 0usize;

        for handler in self.handlers.iter().filter(|h| h.accepts(type_id)) {
            if cancel.is_cancelled() {
                debug!(event = event.event_name(), "Domain event dispatch cancelled");
                return Err(DispatchError::Cancelled(event.event_name().to_string()));
            }

            if self.config.enable_logging {
                trace!(
                    event = event.event_name(),
                    handler = handler.handler_name(),
                    "Invoking domain event handler"
                );
            }

            if let Err(source) = handler.handle_dyn(event, cancel).await {
                error!(
                    event = event.event_name(),
                    handler = handler.handler_name(),
                    error = %source,
                    "Domain event handler failed"
                );
                return Err(DispatchError::HandlerFailed {
                    event: event.event_name().to_string(),
                    handler: handler.handler_name(),
                    source,
                });
            }

            delivered += 1;
        }

        if self.config.enable_logging {
            debug!(
                event = event.event_name(),
                handlers = delivered,
                "Domain event dispatched"
            );
        }

        Ok(())
    }

    /// Deliver a batch of events in order, stopping at the first failure
    pub async fn dispatch_all(
        &self,
        events: &[Box<dyn DomainEvent>],
        cancel: &CancellationToken,
    ) -> Result<(), DispatchError> {
        for event in events {
            self.dispatch_dyn(event.as_ref(), cancel).await?;
        }
        Ok(())
    }

    /// Drain an aggregate's recorded events and dispatch them
    ///
    /// The recorder is emptied even when a handler fails.
    pub async fn dispatch_pending(
        &self,
        events: &mut DomainEvents,
        cancel: &CancellationToken,
    ) -> Result<(), DispatchError> {
        let pending = events.take();
        self.dispatch_all(&pending, cancel).await
    }

    /// Number of handlers that would run for `E`
    pub fn handler_count<E: DomainEvent>(&self) -> usize {
        let type_id = TypeId::of::<E>();
        self.handlers.iter().filter(|h| h.accepts(type_id)).count()
    }
}

impl Default for DomainEventDispatcher {
    fn default() -> Self {
        Self::empty()
    }
}

/// Dispatcher builder
///
/// Registration order is invocation order, across typed and catch-all
/// handlers alike.
pub struct DomainEventDispatcherBuilder {
    handlers: Vec<Arc<dyn DynEventHandler>>,
    config: DispatcherConfig,
}

impl DomainEventDispatcherBuilder {
    /// Create new dispatcher builder
    pub fn new() -> Self {
        Self {
            handlers: Vec::new(),
            config: DispatcherConfig::default(),
        }
    }

    /// Register a handler for event type `E`
    pub fn handler<E, H>(mut self, handler: H) -> Self
    where
        E: DomainEvent,
        H: DomainEventHandler<E> + 'static,
    {
        self.handlers
            .push(Arc::new(TypedEventHandler::<E, H>::new(handler)));
        self
    }

    /// Register a handler that receives every domain event
    pub fn any_handler<H: AnyEventHandler + 'static>(mut self, handler: H) -> Self {
        self.handlers.push(Arc::new(CatchAllHandler::new(handler)));
        self
    }

    /// Register an already type-erased handler
    pub fn dyn_handler(mut self, handler: Arc<dyn DynEventHandler>) -> Self {
        self.handlers.push(handler);
        self
    }

    /// Enable/disable logging
    pub fn enable_logging(mut self, enabled: bool) -> Self {
        self.config.enable_logging = enabled;
        self
    }

    /// Build the dispatcher
    pub fn build(self) -> DomainEventDispatcher {
        if self.config.enable_logging {
            debug!(handlers = self.handlers.len(), "Domain event dispatcher built");
        }
        DomainEventDispatcher {
            handlers: self.handlers.into(),
            config: Arc::new(self.config),
        }
    }
}

impl Default for DomainEventDispatcherBuilder {
    fn default() -> Self {
        Self::new()
    }
}
