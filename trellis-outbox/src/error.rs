//! Error types for outbox operations

use crate::record::OutboxState;
use thiserror::Error;
use uuid::Uuid;

/// Result type for outbox operations.
pub type OutboxResult<T> = Result<T, OutboxError>;

/// Outbox errors.
///
/// Publish failures never appear here: the dispatcher absorbs them into
/// the outbox. What remains are storage, reconstruction, and setup errors.
#[derive(Debug, Error)]
pub enum OutboxError {
    /// A record with this event id already exists
    #[error("Outbox record already exists: {0}")]
    DuplicateKey(Uuid),

    /// No record with this event id
    #[error("Outbox record not found: {0}")]
    NotFound(Uuid),

    /// State change that would move a record backwards or out of a terminal state
    #[error("Invalid outbox state transition for {event_id}: {from} -> {to}")]
    InvalidTransition {
        event_id: Uuid,
        from: OutboxState,
        to: OutboxState,
    },

    /// New records must start in `ReadyToSend`
    #[error("Outbox record {event_id} cannot be created in state {state}")]
    InvalidInitialState { event_id: Uuid, state: OutboxState },

    /// No decoder registered for the stored event type
    #[error("Unknown integration event type: {0}")]
    UnknownEventType(String),

    /// Two event types registered under the same discriminator
    #[error("Integration event type registered twice: {0}")]
    DuplicateEventType(&'static str),

    /// Stored payload does not decode into its registered type
    #[error("Failed to decode '{event_type}' payload: {message}")]
    Deserialization { event_type: String, message: String },

    /// Event could not be serialized for storage
    #[error("Serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Backend storage failure
    #[error("Outbox storage error: {0}")]
    Storage(String),

    /// Relay lease backend failure
    #[error("Relay lease error: {0}")]
    Lease(String),
}

impl OutboxError {
    /// Errors that come from payload reconstruction rather than storage.
    pub fn is_reconstruction_error(&self) -> bool {
        matches!(
            self,
            OutboxError::UnknownEventType(_) | OutboxError::Deserialization { .. }
        )
    }
}
