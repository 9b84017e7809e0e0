//! Message bus seam and an in-memory implementation.

use crate::event::DynIntegrationEvent;
use async_trait::async_trait;
use dashmap::DashMap;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info};
use uuid::Uuid;

/// Header carrying the event type discriminator.
pub const HEADER_EVENT_TYPE: &str = "event-type";
/// Header carrying the event id.
pub const HEADER_EVENT_ID: &str = "event-id";
/// Header carrying the event creation time (RFC 3339).
pub const HEADER_CREATED_AT: &str = "created-at";

/// A message as handed to the broker.
#[derive(Debug, Clone, PartialEq)]
pub struct BusMessage {
    /// Broker-level message id; equals the event id so consumers can dedupe
    pub message_id: Uuid,

    /// Routing key; the event type
    pub routing_key: String,

    pub content_type: String,

    pub headers: HashMap<String, String>,

    /// JSON body with sensitive fields masked
    pub body: Vec<u8>,
}

impl BusMessage {
    /// Build the wire message for an event.
    pub fn from_event(event: &dyn DynIntegrationEvent) -> Result<Self, serde_json::Error> {
        let body = event.to_wire_body()?;
        let headers = HashMap::from([
            (HEADER_EVENT_TYPE.to_string(), event.event_type().to_string()),
            (HEADER_EVENT_ID.to_string(), event.event_id().to_string()),
            (HEADER_CREATED_AT.to_string(), event.created_at().to_rfc3339()),
        ]);

        Ok(Self {
            message_id: event.event_id(),
            routing_key: event.event_type().to_string(),
            content_type: "application/json".to_string(),
            headers,
            body,
        })
    }

    /// Parse the body as JSON.
    pub fn body_json(&self) -> Result<serde_json::Value, serde_json::Error> {
        serde_json::from_slice(&self.body)
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).map(String::as_str)
    }
}

/// Publish failures reported by a bus.
#[derive(Debug, Clone, Error)]
pub enum BusError {
    /// Broker unreachable
    #[error("Message bus unavailable: {0}")]
    Unavailable(String),

    /// Broker refused the message
    #[error("Message rejected: {0}")]
    Rejected(String),

    #[error("Publish timed out after {0:?}")]
    Timeout(Duration),

    /// Event could not be turned into a wire message
    #[error("Serialization failed: {0}")]
    Serialization(String),

    /// Publish aborted by the caller's cancellation token
    #[error("Publish cancelled")]
    Cancelled,
}

impl BusError {
    /// Whether a later attempt may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            BusError::Unavailable(_) | BusError::Timeout(_) | BusError::Cancelled
        )
    }
}

/// Broker publish seam.
#[async_trait]
pub trait MessageBus: Send + Sync {
    /// Publish one message, routed by `message.routing_key`.
    async fn publish(&self, message: &BusMessage) -> Result<(), BusError>;

    /// Name used in logs
    fn name(&self) -> &str {
        "bus"
    }
}

#[derive(Default)]
struct InMemoryBusState {
    topics: DashMap<String, Vec<BusMessage>>,
    unavailable: AtomicBool,
    fail_next: AtomicUsize,
    latency_ms: AtomicU64,
    attempts: AtomicUsize,
}

/// In-process bus that records published messages per routing key.
///
/// Can be switched unavailable, told to reject the next N publishes, or
/// slowed down, which makes it the test double for broker outages.
#[derive(Clone, Default)]
pub struct InMemoryBus {
    state: Arc<InMemoryBusState>,
}

impl InMemoryBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every publish fail with [`BusError::Unavailable`] until re-enabled.
    pub fn set_available(&self, available: bool) {
        self.state.unavailable.store(!available, Ordering::SeqCst);
        info!(available, "In-memory bus availability changed");
    }

    /// Reject the next `count` publishes.
    pub fn fail_next(&self, count: usize) {
        self.state.fail_next.store(count, Ordering::SeqCst);
    }

    /// Delay every publish by `latency`.
    pub fn set_latency(&self, latency: Duration) {
        let millis = u64::try_from(latency.as_millis()).unwrap_or(u64::MAX);
        self.state.latency_ms.store(millis, Ordering::SeqCst);
    }

    /// Messages published under `routing_key`, in publish order.
    pub fn published(&self, routing_key: &str) -> Vec<BusMessage> {
        self.state
            .topics
            .get(routing_key)
            .map(|messages| messages.clone())
            .unwrap_or_default()
    }

    /// All published messages; order across routing keys is unspecified.
    pub fn all_published(&self) -> Vec<BusMessage> {
        self.state
            .topics
            .iter()
            .flat_map(|entry| entry.value().clone())
            .collect()
    }

    pub fn published_count(&self) -> usize {
        self.state.topics.iter().map(|entry| entry.value().len()).sum()
    }

    /// Publish calls received, successful or not.
    pub fn attempts(&self) -> usize {
        self.state.attempts.load(Ordering::SeqCst)
    }

    pub fn clear(&self) {
        self.state.topics.clear();
        self.state.attempts.store(0, Ordering::SeqCst);
    }
}

#[async_trait]
impl MessageBus for InMemoryBus {
    async fn publish(&self, message: &BusMessage) -> Result<(), BusError> {
        self.state.attempts.fetch_add(1, Ordering::SeqCst);

        let latency = self.state.latency_ms.load(Ordering::SeqCst);
        if latency > 0 {
            tokio::time::sleep(Duration::from_millis(latency)).await;
        }

        if self.state.unavailable.load(Ordering::SeqCst) {
            return Err(BusError::Unavailable("in-memory bus disabled".to_string()));
        }

        let rejected = self
            .state
            .fail_next
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if rejected {
            return Err(BusError::Rejected("in-memory bus scripted failure".to_string()));
        }

        self.state
            .topics
            .entry(message.routing_key.clone())
            .or_default()
            .push(message.clone());

        debug!(
            routing_key = %message.routing_key,
            message_id = %message.message_id,
            "In-memory bus accepted message"
        );
        Ok(())
    }

    fn name(&self) -> &str {
        "in-memory"
    }
}
