//! Publish-or-defer dispatch of integration events.

use crate::bus::{BusError, BusMessage, MessageBus};
use crate::error::{OutboxError, OutboxResult};
use crate::event::{DynIntegrationEvent, IntegrationEvent};
use crate::record::{OutboxRecord, OutboxState};
use crate::retry::RetryPolicy;
use crate::store::{OutboxStore, OutboxUnitOfWork};
use chrono::Utc;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// What happened to one publish attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PublishOutcome {
    /// Delivered to the bus; any outbox record is now `Completed`
    Published,

    /// Not delivered; the outbox holds a `ReadyToSend` record for the relay
    Deferred,

    /// Not delivered and out of retry budget; the record is now `Failed`
    Failed,

    /// Record already terminal; nothing was sent
    Skipped,
}

struct Attempt {
    outcome: PublishOutcome,
    created: bool,
    error: Option<String>,
}

impl Attempt {
    fn done(outcome: PublishOutcome) -> Self {
        Self {
            outcome,
            created: false,
            error: None,
        }
    }
}

/// Sends integration events to the bus, falling back to the outbox.
///
/// A failed publish never reaches the caller as an error: the event is
/// recorded (or its record updated) so the relay can retry it. Errors
/// returned here are storage failures, which mean the fallback itself
/// could not be made durable.
#[derive(Clone)]
pub struct IntegrationEventDispatcher {
    bus: Arc<dyn MessageBus>,
    store: Arc<dyn OutboxStore>,
    policy: RetryPolicy,
}

impl IntegrationEventDispatcher {
    pub fn new(bus: Arc<dyn MessageBus>, store: Arc<dyn OutboxStore>) -> Self {
        Self {
            bus,
            store,
            policy: RetryPolicy::default(),
        }
    }

    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn store(&self) -> &Arc<dyn OutboxStore> {
        &self.store
    }

    pub fn bus(&self) -> &Arc<dyn MessageBus> {
        &self.bus
    }

    pub fn retry_policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Publish `event`, deferring it to the outbox on failure.
    pub async fn publish<E: IntegrationEvent>(
        &self,
        event: &E,
        cancel: &CancellationToken,
    ) -> OutboxResult<PublishOutcome> {
        self.publish_dyn(event, cancel).await
    }

    /// [`publish`](Self::publish) for a type-erased event.
    pub async fn publish_dyn(
        &self,
        event: &dyn DynIntegrationEvent,
        cancel: &CancellationToken,
    ) -> OutboxResult<PublishOutcome> {
        let mut uow = self.store.begin().await?;
        let attempt = self.attempt(uow.as_mut(), event, cancel).await?;

        let err = match uow.commit().await {
            Ok(()) => return Ok(attempt.outcome),
            Err(e) => e,
        };

        match err {
            // Another publisher created the record between our read and commit.
            OutboxError::DuplicateKey(event_id) if attempt.created => {
                warn!(
                    event_id = %event_id,
                    event_type = event.event_type(),
                    "Outbox record created concurrently, recording attempt against it"
                );
                let reason = attempt.error.unwrap_or_else(|| "publish failed".to_string());
                let mut uow = self.store.begin().await?;
                let outcome = self.note_failure(uow.as_mut(), event_id, &reason).await?;
                match uow.commit().await {
                    Ok(()) => Ok(outcome),
                    Err(e) => self.settled_concurrently(event, outcome, e).await,
                }
            }
            e => self.settled_concurrently(event, attempt.outcome, e).await,
        }
    }

    /// Resolve a commit that lost to a concurrent publisher which already
    /// moved the record to a terminal state.
    async fn settled_concurrently(
        &self,
        event: &dyn DynIntegrationEvent,
        outcome: PublishOutcome,
        err: OutboxError,
    ) -> OutboxResult<PublishOutcome> {
        let from = match &err {
            OutboxError::InvalidTransition { from, .. } if from.is_terminal() => *from,
            _ => return Err(err),
        };

        let event_id = event.event_id();
        let state = self
            .store
            .get(event_id)
            .await?
            .map_or(from, |record| record.state);

        if outcome == PublishOutcome::Published {
            warn!(
                event_id = %event_id,
                event_type = event.event_type(),
                state = %state,
                "Integration event published but its outbox record was settled concurrently"
            );
            return Ok(PublishOutcome::Published);
        }

        debug!(
            event_id = %event_id,
            state = %state,
            "Outbox record settled concurrently, failure not counted"
        );
        Ok(PublishOutcome::Skipped)
    }

    /// Stage `event` as a `ReadyToSend` record in the caller's unit of work.
    ///
    /// Nothing is sent. Committing the caller's unit of work makes the event
    /// durable together with the business data; delivery follows through
    /// [`publish`](Self::publish) or the relay.
    pub async fn enqueue(
        &self,
        uow: &mut dyn OutboxUnitOfWork,
        event: &dyn DynIntegrationEvent,
    ) -> OutboxResult<()> {
        let record = OutboxRecord::from_event(event)?;
        uow.create(record).await?;
        debug!(
            event_id = %event.event_id(),
            event_type = event.event_type(),
            "Integration event enqueued in outbox"
        );
        Ok(())
    }

    /// Count a failure that happened before publishing, such as a payload
    /// that no longer decodes.
    pub async fn reject(&self, event_id: Uuid, reason: &str) -> OutboxResult<PublishOutcome> {
        let mut uow = self.store.begin().await?;
        let outcome = self.note_failure(uow.as_mut(), event_id, reason).await?;
        uow.commit().await?;
        Ok(outcome)
    }

    async fn attempt(
        &self,
        uow: &mut dyn OutboxUnitOfWork,
        event: &dyn DynIntegrationEvent,
        cancel: &CancellationToken,
    ) -> OutboxResult<Attempt> {
        let event_id = event.event_id();
        let existing = uow.get(event_id).await?;

        if let Some(record) = &existing {
            if record.state.is_terminal() {
                debug!(
                    event_id = %event_id,
                    state = %record.state,
                    "Outbox record already terminal, skipping publish"
                );
                return Ok(Attempt::done(PublishOutcome::Skipped));
            }
        }

        match self.send(event, cancel).await {
            Ok(()) => {
                if existing.is_some() {
                    if let Err(e) = uow.update_state(event_id, OutboxState::Completed).await {
                        let outcome = self
                            .settled_concurrently(event, PublishOutcome::Published, e)
                            .await?;
                        return Ok(Attempt::done(outcome));
                    }
                }
                info!(
                    event_id = %event_id,
                    event_type = event.event_type(),
                    bus = self.bus.name(),
                    "Integration event published"
                );
                Ok(Attempt::done(PublishOutcome::Published))
            }
            Err(err) => {
                let reason = err.to_string();
                warn!(
                    event_id = %event_id,
                    event_type = event.event_type(),
                    error = %err,
                    retryable = err.is_retryable(),
                    "Integration event publish failed, deferring to outbox"
                );

                if existing.is_some() {
                    let outcome = self.note_failure(uow, event_id, &reason).await?;
                    return Ok(Attempt {
                        outcome,
                        created: false,
                        error: Some(reason),
                    });
                }

                let record = OutboxRecord::from_event(event)?.with_failure(reason.as_str());
                let exhausted = self.policy.is_exhausted(&record, Utc::now());
                uow.create(record).await?;

                let mut outcome = PublishOutcome::Deferred;
                if exhausted {
                    uow.update_state(event_id, OutboxState::Failed).await?;
                    error!(
                        event_id = %event_id,
                        event_type = event.event_type(),
                        "Outbox record exhausted its retry budget on first attempt"
                    );
                    outcome = PublishOutcome::Failed;
                }

                Ok(Attempt {
                    outcome,
                    created: true,
                    error: Some(reason),
                })
            }
        }
    }

    async fn send(
        &self,
        event: &dyn DynIntegrationEvent,
        cancel: &CancellationToken,
    ) -> Result<(), BusError> {
        let message =
            BusMessage::from_event(event).map_err(|e| BusError::Serialization(e.to_string()))?;

        if cancel.is_cancelled() {
            return Err(BusError::Cancelled);
        }

        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(BusError::Cancelled),
            result = self.bus.publish(&message) => result,
        }
    }

    async fn note_failure(
        &self,
        uow: &mut dyn OutboxUnitOfWork,
        event_id: Uuid,
        reason: &str,
    ) -> OutboxResult<PublishOutcome> {
        let record = uow.record_failure(event_id, reason).await?;
        if record.state.is_terminal() {
            debug!(
                event_id = %event_id,
                state = %record.state,
                "Outbox record already terminal, failure not counted"
            );
            return Ok(PublishOutcome::Skipped);
        }
        if !self.policy.is_exhausted(&record, Utc::now()) {
            return Ok(PublishOutcome::Deferred);
        }

        uow.update_state(event_id, OutboxState::Failed).await?;
        error!(
            event_id = %event_id,
            event_type = %record.event_type,
            attempts = record.attempts,
            last_error = reason,
            "Outbox record exhausted its retry budget and was marked failed"
        );
        Ok(PublishOutcome::Failed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::InMemoryBus;
    use crate::event::IntegrationEventMetadata;
    use crate::memory::InMemoryOutboxStore;
    use async_trait::async_trait;
    use serde::{Deserialize, Serialize};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct InvoiceIssued {
        #[serde(flatten)]
        metadata: IntegrationEventMetadata,
        invoice_id: String,
    }

    impl IntegrationEvent for InvoiceIssued {
        const EVENT_TYPE: &'static str = "InvoiceIssued";

        fn metadata(&self) -> &IntegrationEventMetadata {
            &self.metadata
        }
    }

    fn invoice() -> InvoiceIssued {
        InvoiceIssued {
            metadata: IntegrationEventMetadata::new(),
            invoice_id: "INV-1".to_string(),
        }
    }

    /// Bus whose calls follow a script of (delay, succeeds).
    struct ScriptedBus {
        calls: AtomicUsize,
        script: Vec<(Duration, bool)>,
    }

    impl ScriptedBus {
        fn new(script: Vec<(Duration, bool)>) -> Arc<Self> {
            Arc::new(Self {
                calls: AtomicUsize::new(0),
                script,
            })
        }
    }

    #[async_trait]
    impl MessageBus for ScriptedBus {
        async fn publish(&self, _message: &BusMessage) -> Result<(), BusError> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            let (delay, succeeds) = self
                .script
                .get(call)
                .copied()
                .unwrap_or((Duration::ZERO, true));
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
            if succeeds {
                Ok(())
            } else {
                Err(BusError::Unavailable("scripted outage".to_string()))
            }
        }
    }

    /// Store holding one `ReadyToSend` record for `event` with one failed attempt.
    async fn store_with_pending(event: &InvoiceIssued) -> InMemoryOutboxStore {
        let store = InMemoryOutboxStore::new();
        let mut uow = store.begin().await.unwrap();
        uow.create(OutboxRecord::from_event(event).unwrap().with_failure("earlier outage"))
            .await
            .unwrap();
        uow.commit().await.unwrap();
        store
    }

    fn setup() -> (InMemoryBus, InMemoryOutboxStore, IntegrationEventDispatcher) {
        let bus = InMemoryBus::new();
        let store = InMemoryOutboxStore::new();
        let dispatcher = IntegrationEventDispatcher::new(Arc::new(bus.clone()), Arc::new(store.clone()));
        (bus, store, dispatcher)
    }

    #[tokio::test]
    async fn test_success_without_record_writes_nothing() {
        let (bus, store, dispatcher) = setup();
        let cancel = CancellationToken::new();

        let outcome = dispatcher.publish(&invoice(), &cancel).await.unwrap();

        assert_eq!(outcome, PublishOutcome::Published);
        assert_eq!(bus.published_count(), 1);
        assert!(store.is_empty().await);
    }

    #[tokio::test]
    async fn test_failure_creates_ready_record() {
        let (bus, store, dispatcher) = setup();
        bus.set_available(false);
        let event = invoice();

        let outcome = dispatcher.publish(&event, &CancellationToken::new()).await.unwrap();

        assert_eq!(outcome, PublishOutcome::Deferred);
        let record = store.get(event.metadata.id).await.unwrap().unwrap();
        assert_eq!(record.state, OutboxState::ReadyToSend);
        assert_eq!(record.attempts, 1);
        assert_eq!(record.event_type, "InvoiceIssued");
        let decoded: InvoiceIssued = serde_json::from_str(&record.payload).unwrap();
        assert_eq!(decoded, event);
    }

    #[tokio::test]
    async fn test_success_with_record_completes_it() {
        let (bus, store, dispatcher) = setup();
        let event = invoice();

        bus.fail_next(1);
        dispatcher.publish(&event, &CancellationToken::new()).await.unwrap();

        let outcome = dispatcher.publish(&event, &CancellationToken::new()).await.unwrap();
        assert_eq!(outcome, PublishOutcome::Published);

        let record = store.get(event.metadata.id).await.unwrap().unwrap();
        assert_eq!(record.state, OutboxState::Completed);
        assert_eq!(bus.published_count(), 1);
    }

    #[tokio::test]
    async fn test_terminal_record_is_skipped() {
        let (bus, store, dispatcher) = setup();
        let event = invoice();

        bus.fail_next(1);
        dispatcher.publish(&event, &CancellationToken::new()).await.unwrap();
        dispatcher.publish(&event, &CancellationToken::new()).await.unwrap();
        let attempts = bus.attempts();

        let outcome = dispatcher.publish(&event, &CancellationToken::new()).await.unwrap();
        assert_eq!(outcome, PublishOutcome::Skipped);
        assert_eq!(bus.attempts(), attempts);
        assert_eq!(bus.published_count(), 1);
        assert_eq!(store.len().await, 1);
    }

    #[tokio::test]
    async fn test_budget_exhaustion_marks_failed() {
        let (bus, store, dispatcher) = setup();
        let dispatcher = dispatcher.with_retry_policy(RetryPolicy::new(2));
        bus.set_available(false);
        let event = invoice();
        let cancel = CancellationToken::new();

        assert_eq!(dispatcher.publish(&event, &cancel).await.unwrap(), PublishOutcome::Deferred);
        assert_eq!(dispatcher.publish(&event, &cancel).await.unwrap(), PublishOutcome::Failed);

        let record = store.get(event.metadata.id).await.unwrap().unwrap();
        assert_eq!(record.state, OutboxState::Failed);
        assert_eq!(record.attempts, 2);
        assert!(store.all_ready_to_send().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_storage_failure_surfaces() {
        let (bus, store, dispatcher) = setup();
        bus.set_available(false);
        store.set_fail_commits(true);

        let result = dispatcher.publish(&invoice(), &CancellationToken::new()).await;
        assert!(matches!(result, Err(OutboxError::Storage(_))));
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancellation_defers_with_full_record() {
        let (bus, store, dispatcher) = setup();
        bus.set_latency(Duration::from_secs(30));
        let event = invoice();
        let cancel = CancellationToken::new();

        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            trigger.cancel();
        });

        let outcome = dispatcher.publish(&event, &cancel).await.unwrap();
        assert_eq!(outcome, PublishOutcome::Deferred);

        let record = store.get(event.metadata.id).await.unwrap().unwrap();
        assert_eq!(record.last_error.as_deref(), Some("Publish cancelled"));
        assert_eq!(bus.published_count(), 0);
    }

    #[tokio::test]
    async fn test_enqueue_then_publish() {
        let (bus, store, dispatcher) = setup();
        let event = invoice();

        let mut uow = store.begin().await.unwrap();
        dispatcher.enqueue(uow.as_mut(), &event).await.unwrap();
        uow.commit().await.unwrap();

        let record = store.get(event.metadata.id).await.unwrap().unwrap();
        assert_eq!(record.attempts, 0);
        assert_eq!(bus.published_count(), 0);

        dispatcher.publish(&event, &CancellationToken::new()).await.unwrap();
        let record = store.get(event.metadata.id).await.unwrap().unwrap();
        assert_eq!(record.state, OutboxState::Completed);
    }

    #[tokio::test]
    async fn test_reject_counts_against_budget() {
        let (_bus, store, dispatcher) = setup();
        let dispatcher = dispatcher.with_retry_policy(RetryPolicy::new(1));
        let event = invoice();

        let mut uow = store.begin().await.unwrap();
        dispatcher.enqueue(uow.as_mut(), &event).await.unwrap();
        uow.commit().await.unwrap();

        let outcome = dispatcher.reject(event.metadata.id, "undecodable").await.unwrap();
        assert_eq!(outcome, PublishOutcome::Failed);

        let missing = dispatcher.reject(Uuid::new_v4(), "undecodable").await;
        assert!(matches!(missing, Err(OutboxError::NotFound(_))));
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_failure_settles_record_before_delivery() {
        let event = invoice();
        let store = store_with_pending(&event).await;
        let bus = ScriptedBus::new(vec![(Duration::from_millis(50), true), (Duration::ZERO, false)]);
        let dispatcher = IntegrationEventDispatcher::new(bus.clone(), Arc::new(store.clone()))
            .with_retry_policy(RetryPolicy::new(2));
        let cancel = CancellationToken::new();

        let (delivered, failed) = tokio::join!(
            dispatcher.publish(&event, &cancel),
            dispatcher.publish(&event, &cancel)
        );

        assert_eq!(delivered.unwrap(), PublishOutcome::Published);
        assert_eq!(failed.unwrap(), PublishOutcome::Failed);
        assert_eq!(bus.calls.load(Ordering::SeqCst), 2);

        let record = store.get(event.metadata.id).await.unwrap().unwrap();
        assert_eq!(record.state, OutboxState::Failed);
        assert_eq!(record.attempts, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_delivery_settles_record_before_failure() {
        let event = invoice();
        let store = store_with_pending(&event).await;
        let bus = ScriptedBus::new(vec![(Duration::from_millis(50), false), (Duration::ZERO, true)]);
        let dispatcher = IntegrationEventDispatcher::new(bus.clone(), Arc::new(store.clone()))
            .with_retry_policy(RetryPolicy::new(2));
        let cancel = CancellationToken::new();

        let (failed, delivered) = tokio::join!(
            dispatcher.publish(&event, &cancel),
            dispatcher.publish(&event, &cancel)
        );

        assert_eq!(failed.unwrap(), PublishOutcome::Skipped);
        assert_eq!(delivered.unwrap(), PublishOutcome::Published);

        let record = store.get(event.metadata.id).await.unwrap().unwrap();
        assert_eq!(record.state, OutboxState::Completed);
        assert_eq!(record.attempts, 1);
    }
}
