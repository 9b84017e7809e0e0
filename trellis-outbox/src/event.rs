//! Integration event definitions.

use crate::masking::{SensitiveField, mask_fields};
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::any::Any;
use std::fmt::Debug;
use uuid::Uuid;

/// Identity and creation time carried by every integration event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IntegrationEventMetadata {
    /// Stable event id; doubles as the outbox dedup key
    pub id: Uuid,

    /// When the event was raised
    pub created_at: DateTime<Utc>,
}

impl IntegrationEventMetadata {
    pub fn new() -> Self {
        Self::with_id(Uuid::new_v4())
    }

    pub fn with_id(id: Uuid) -> Self {
        Self {
            id,
            created_at: Utc::now(),
        }
    }
}

impl Default for IntegrationEventMetadata {
    fn default() -> Self {
        Self::new()
    }
}

/// An event that crosses the process boundary through the message bus.
///
/// `EVENT_TYPE` is the stable discriminator written to the outbox and used
/// as the routing key; it must not change once records exist.
///
/// # Examples
///
/// ```rust,ignore
/// #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
/// struct OrderPlaced {
///     #[serde(flatten)]
///     metadata: IntegrationEventMetadata,
///     order_id: String,
///     email: String,
/// }
///
/// impl IntegrationEvent for OrderPlaced {
///     const EVENT_TYPE: &'static str = "OrderPlaced";
///
///     fn metadata(&self) -> &IntegrationEventMetadata {
///         &self.metadata
///     }
///
///     fn sensitive_fields() -> &'static [SensitiveField] {
///         const FIELDS: &[SensitiveField] = &[SensitiveField::new("email")];
///         FIELDS
///     }
/// }
/// ```
pub trait IntegrationEvent: Serialize + DeserializeOwned + Debug + Send + Sync + 'static {
    /// Stable type discriminator
    const EVENT_TYPE: &'static str;

    fn metadata(&self) -> &IntegrationEventMetadata;

    /// Fields masked in the wire body
    fn sensitive_fields() -> &'static [SensitiveField] {
        &[]
    }
}

/// Object-safe view of an [`IntegrationEvent`].
///
/// Implemented for every integration event; the relay works with boxed
/// values of this trait after decoding stored payloads.
pub trait DynIntegrationEvent: Debug + Send + Sync {
    fn event_id(&self) -> Uuid;

    fn event_type(&self) -> &'static str;

    fn created_at(&self) -> DateTime<Utc>;

    /// Raw JSON, as stored in the outbox
    fn to_payload(&self) -> Result<String, serde_json::Error>;

    /// JSON with sensitive fields masked, as sent on the bus
    fn to_wire_body(&self) -> Result<Vec<u8>, serde_json::Error>;

    fn as_any(&self) -> &dyn Any;
}

impl<E: IntegrationEvent> DynIntegrationEvent for E {
    fn event_id(&self) -> Uuid {
        self.metadata().id
    }

    fn event_type(&self) -> &'static str {
        E::EVENT_TYPE
    }

    fn created_at(&self) -> DateTime<Utc> {
        self.metadata().created_at
    }

    fn to_payload(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    fn to_wire_body(&self) -> Result<Vec<u8>, serde_json::Error> {
        let fields = E::sensitive_fields();
        if fields.is_empty() {
            return serde_json::to_vec(self);
        }
        let mut value = serde_json::to_value(self)?;
        mask_fields(&mut value, fields);
        serde_json::to_vec(&value)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}
