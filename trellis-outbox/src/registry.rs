//! Event-type registry used to rebuild typed events from stored payloads.

use crate::error::{OutboxError, OutboxResult};
use crate::event::{DynIntegrationEvent, IntegrationEvent};
use std::collections::HashMap;
use std::fmt;
use tracing::debug;

type DecodeFn = fn(&str) -> Result<Box<dyn DynIntegrationEvent>, serde_json::Error>;

fn decode_as<E: IntegrationEvent>(payload: &str) -> Result<Box<dyn DynIntegrationEvent>, serde_json::Error> {
    Ok(Box::new(serde_json::from_str::<E>(payload)?))
}

/// Immutable map from `EVENT_TYPE` to decoder, built once at startup.
#[derive(Clone, Default)]
pub struct EventRegistry {
    decoders: HashMap<&'static str, DecodeFn>,
}

impl fmt::Debug for EventRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventRegistry")
            .field("event_types", &self.event_types())
            .finish()
    }
}

impl EventRegistry {
    pub fn builder() -> EventRegistryBuilder {
        EventRegistryBuilder::default()
    }

    /// Rebuild the event stored as `payload` under `event_type`.
    pub fn decode(
        &self,
        event_type: &str,
        payload: &str,
    ) -> OutboxResult<Box<dyn DynIntegrationEvent>> {
        let decode = self
            .decoders
            .get(event_type)
            .ok_or_else(|| OutboxError::UnknownEventType(event_type.to_string()))?;

        decode(payload).map_err(|e| OutboxError::Deserialization {
            event_type: event_type.to_string(),
            message: e.to_string(),
        })
    }

    pub fn contains(&self, event_type: &str) -> bool {
        self.decoders.contains_key(event_type)
    }

    /// Registered discriminators, sorted
    pub fn event_types(&self) -> Vec<&'static str> {
        let mut types: Vec<_> = self.decoders.keys().copied().collect();
        types.sort_unstable();
        types
    }

    pub fn len(&self) -> usize {
        self.decoders.len()
    }

    pub fn is_empty(&self) -> bool {
        self.decoders.is_empty()
    }
}

/// Builder for [`EventRegistry`].
#[derive(Default)]
pub struct EventRegistryBuilder {
    decoders: HashMap<&'static str, DecodeFn>,
}

impl EventRegistryBuilder {
    /// Register `E` under `E::EVENT_TYPE`.
    pub fn register<E: IntegrationEvent>(mut self) -> OutboxResult<Self> {
        if self.decoders.contains_key(E::EVENT_TYPE) {
            return Err(OutboxError::DuplicateEventType(E::EVENT_TYPE));
        }
        self.decoders.insert(E::EVENT_TYPE, decode_as::<E> as DecodeFn);
        debug!(event_type = E::EVENT_TYPE, "Registered integration event type");
        Ok(self)
    }

    pub fn build(self) -> EventRegistry {
        EventRegistry {
            decoders: self.decoders,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::IntegrationEventMetadata;
    use serde::{Deserialize, Serialize};

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct OrderPlaced {
        #[serde(flatten)]
        metadata: IntegrationEventMetadata,
        order_id: String,
    }

    impl IntegrationEvent for OrderPlaced {
        const EVENT_TYPE: &'static str = "OrderPlaced";

        fn metadata(&self) -> &IntegrationEventMetadata {
            &self.metadata
        }
    }

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct OrderShipped {
        #[serde(flatten)]
        metadata: IntegrationEventMetadata,
    }

    impl IntegrationEvent for OrderShipped {
        const EVENT_TYPE: &'static str = "OrderShipped";

        fn metadata(&self) -> &IntegrationEventMetadata {
            &self.metadata
        }
    }

    fn registry() -> EventRegistry {
        EventRegistry::builder()
            .register::<OrderPlaced>()
            .and_then(|b| b.register::<OrderShipped>())
            .unwrap()
            .build()
    }

    #[test]
    fn test_decode_round_trip() {
        let event = OrderPlaced {
            metadata: IntegrationEventMetadata::new(),
            order_id: "O1".to_string(),
        };
        let payload = event.to_payload().unwrap();

        let decoded = registry().decode("OrderPlaced", &payload).unwrap();
        assert_eq!(decoded.event_id(), event.metadata.id);
        assert_eq!(
            decoded.as_any().downcast_ref::<OrderPlaced>(),
            Some(&event)
        );
    }

    #[test]
    fn test_unknown_type() {
        let err = registry().decode("OrderRefunded", "{}").unwrap_err();
        assert!(matches!(err, OutboxError::UnknownEventType(t) if t == "OrderRefunded"));
    }

    #[test]
    fn test_malformed_payload() {
        let err = registry().decode("OrderPlaced", "{\"order_id\": 5}").unwrap_err();
        assert!(err.is_reconstruction_error());
        assert!(matches!(err, OutboxError::Deserialization { .. }));
    }

    #[test]
    fn test_duplicate_registration_rejected() {
        let result = EventRegistry::builder()
            .register::<OrderPlaced>()
            .and_then(|b| b.register::<OrderPlaced>());
        assert!(matches!(result, Err(OutboxError::DuplicateEventType("OrderPlaced"))));
    }

    #[test]
    fn test_event_types_sorted() {
        assert_eq!(registry().event_types(), vec!["OrderPlaced", "OrderShipped"]);
        assert_eq!(registry().len(), 2);
    }
}
