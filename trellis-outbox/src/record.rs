//! Outbox records and their state machine.

use crate::error::{OutboxError, OutboxResult};
use crate::event::DynIntegrationEvent;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Delivery state of an outbox record.
///
/// States only move forward: `ReadyToSend -> SendToQueue -> Completed`, or
/// to `Failed` from either non-terminal state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OutboxState {
    /// Waiting for (re)delivery
    ReadyToSend,

    /// Handed to the bus, confirmation pending
    SendToQueue,

    /// Delivered
    Completed,

    /// Gave up
    Failed,
}

impl OutboxState {
    fn rank(self) -> u8 {
        match self {
            OutboxState::ReadyToSend => 0,
            OutboxState::SendToQueue => 1,
            OutboxState::Completed | OutboxState::Failed => 2,
        }
    }

    /// `Completed` and `Failed` accept no further transitions.
    pub fn is_terminal(self) -> bool {
        matches!(self, OutboxState::Completed | OutboxState::Failed)
    }

    /// Whether moving from `self` to `next` is a forward transition.
    pub fn can_transition_to(self, next: OutboxState) -> bool {
        !self.is_terminal() && next.rank() > self.rank()
    }

    pub fn as_str(self) -> &'static str {
        match self {
            OutboxState::ReadyToSend => "ReadyToSend",
            OutboxState::SendToQueue => "SendToQueue",
            OutboxState::Completed => "Completed",
            OutboxState::Failed => "Failed",
        }
    }
}

impl fmt::Display for OutboxState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Durable record of an integration event that still has to reach the bus.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutboxRecord {
    /// Identity of the event instance; unique across the store
    pub event_id: Uuid,

    /// Discriminator used to pick the decoder on replay
    pub event_type: String,

    /// JSON serialization of the event, unmasked
    pub payload: String,

    /// Delivery state
    pub state: OutboxState,

    /// Failed delivery attempts so far
    pub attempts: u32,

    /// Most recent failure
    pub last_error: Option<String>,

    /// When the event itself was created
    pub occurred_at: DateTime<Utc>,

    /// When the record was created
    pub created_at: DateTime<Utc>,

    /// Last write to the record
    pub modified_at: DateTime<Utc>,
}

impl OutboxRecord {
    /// Create a `ReadyToSend` record.
    pub fn new(
        event_id: Uuid,
        event_type: impl Into<String>,
        payload: impl Into<String>,
        occurred_at: DateTime<Utc>,
    ) -> Self {
        let now = Utc::now();
        Self {
            event_id,
            event_type: event_type.into(),
            payload: payload.into(),
            state: OutboxState::ReadyToSend,
            attempts: 0,
            last_error: None,
            occurred_at,
            created_at: now,
            modified_at: now,
        }
    }

    /// Snapshot an event into a new `ReadyToSend` record.
    pub fn from_event(event: &dyn DynIntegrationEvent) -> Result<Self, serde_json::Error> {
        Ok(Self::new(
            event.event_id(),
            event.event_type(),
            event.to_payload()?,
            event.created_at(),
        ))
    }

    /// Count one failed delivery attempt.
    pub fn record_failure(&mut self, error: impl Into<String>) {
        self.attempts = self.attempts.saturating_add(1);
        self.last_error = Some(error.into());
        self.modified_at = Utc::now();
    }

    /// Same as [`record_failure`](Self::record_failure), by value.
    pub fn with_failure(mut self, error: impl Into<String>) -> Self {
        self.record_failure(error);
        self
    }

    /// Move to `next`.
    ///
    /// Returns `Ok(false)` when already in `next`.
    pub fn transition(&mut self, next: OutboxState) -> OutboxResult<bool> {
        if self.state == next {
            return Ok(false);
        }
        if !self.state.can_transition_to(next) {
            return Err(OutboxError::InvalidTransition {
                event_id: self.event_id,
                from: self.state,
                to: next,
            });
        }
        self.state = next;
        self.modified_at = Utc::now();
        Ok(true)
    }

    /// Age of the record at `now`; zero if `now` precedes creation.
    pub fn age(&self, now: DateTime<Utc>) -> std::time::Duration {
        (now - self.created_at).to_std().unwrap_or_default()
    }
}
