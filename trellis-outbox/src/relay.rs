//! Periodic redelivery of outbox records.

use crate::dispatcher::{IntegrationEventDispatcher, PublishOutcome};
use crate::error::OutboxResult;
use crate::record::OutboxRecord;
use crate::registry::EventRegistry;
use async_trait::async_trait;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Exclusive right to run a relay tick.
///
/// Deployments with several relay instances plug a shared lock in here so
/// only one of them scans the outbox at a time.
#[async_trait]
pub trait RelayLease: Send + Sync {
    /// Try to take the lease without waiting. `false` means someone else holds it.
    async fn try_acquire(&self) -> OutboxResult<bool>;

    /// Give the lease back.
    async fn release(&self) -> OutboxResult<()>;
}

/// Process-local lease; keeps ticks of one relay from overlapping.
#[derive(Debug, Default)]
pub struct SingleInstanceLease {
    held: AtomicBool,
}

impl SingleInstanceLease {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_held(&self) -> bool {
        self.held.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl RelayLease for SingleInstanceLease {
    async fn try_acquire(&self) -> OutboxResult<bool> {
        Ok(self
            .held
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok())
    }

    async fn release(&self) -> OutboxResult<()> {
        self.held.store(false, Ordering::SeqCst);
        Ok(())
    }
}

/// Relay configuration
#[derive(Debug, Clone)]
pub struct RelayConfig {
    /// Most records handled per tick; `None` drains the whole snapshot
    pub batch_size: Option<usize>,

    /// Log a summary line for every tick
    pub enable_logging: bool,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            batch_size: None,
            enable_logging: true,
        }
    }
}

/// Summary of one relay tick.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RelayReport {
    /// Records taken from the snapshot
    pub scanned: usize,
    pub published: usize,
    pub deferred: usize,
    pub failed: usize,
    pub skipped: usize,
    /// Records whose payload could not be rebuilt
    pub undecodable: usize,
    /// Records whose processing hit a storage error
    pub errors: usize,
    /// Tick stopped early on cancellation
    pub cancelled: bool,
    /// `false` if another instance held the lease and nothing was done
    pub lease_acquired: bool,
}

impl RelayReport {
    fn count(&mut self, outcome: PublishOutcome) {
        match outcome {
            PublishOutcome::Published => self.published += 1,
            PublishOutcome::Deferred => self.deferred += 1,
            PublishOutcome::Failed => self.failed += 1,
            PublishOutcome::Skipped => self.skipped += 1,
        }
    }
}

/// Re-publishes every `ReadyToSend` record through the dispatcher.
///
/// A tick works on a snapshot taken at its start. One record failing does
/// not stop the others; only failing to take the snapshot fails the tick.
#[derive(Clone)]
pub struct OutboxRelay {
    dispatcher: Arc<IntegrationEventDispatcher>,
    registry: Arc<EventRegistry>,
    config: RelayConfig,
    lease: Arc<dyn RelayLease>,
}

impl OutboxRelay {
    pub fn new(dispatcher: Arc<IntegrationEventDispatcher>, registry: Arc<EventRegistry>) -> Self {
        Self {
            dispatcher,
            registry,
            config: RelayConfig::default(),
            lease: Arc::new(SingleInstanceLease::new()),
        }
    }

    pub fn with_config(mut self, config: RelayConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_lease(mut self, lease: Arc<dyn RelayLease>) -> Self {
        self.lease = lease;
        self
    }

    pub fn dispatcher(&self) -> &Arc<IntegrationEventDispatcher> {
        &self.dispatcher
    }

    pub fn registry(&self) -> &Arc<EventRegistry> {
        &self.registry
    }

    pub fn config(&self) -> &RelayConfig {
        &self.config
    }

    /// Run one relay tick.
    pub async fn run_once(&self, cancel: &CancellationToken) -> OutboxResult<RelayReport> {
        if !self.lease.try_acquire().await? {
            debug!("Relay lease held elsewhere, skipping tick");
            return Ok(RelayReport::default());
        }

        let result = self.drain(cancel).await;

        if let Err(e) = self.lease.release().await {
            warn!(error = %e, "Failed to release relay lease");
        }

        let report = result?;
        if self.config.enable_logging {
            info!(
                scanned = report.scanned,
                published = report.published,
                deferred = report.deferred,
                failed = report.failed,
                undecodable = report.undecodable,
                errors = report.errors,
                cancelled = report.cancelled,
                "Outbox relay tick finished"
            );
        }
        Ok(report)
    }

    async fn drain(&self, cancel: &CancellationToken) -> OutboxResult<RelayReport> {
        let mut pending = self.dispatcher.store().all_ready_to_send().await?;
        pending.sort_by_key(|record| record.created_at);
        if let Some(limit) = self.config.batch_size {
            pending.truncate(limit);
        }

        let mut report = RelayReport {
            lease_acquired: true,
            ..RelayReport::default()
        };

        for record in &pending {
            if cancel.is_cancelled() {
                report.cancelled = true;
                break;
            }
            report.scanned += 1;

            match self.relay_record(record, cancel, &mut report).await {
                Ok(outcome) => report.count(outcome),
                Err(e) => {
                    report.errors += 1;
                    error!(
                        event_id = %record.event_id,
                        event_type = %record.event_type,
                        error = %e,
                        "Outbox relay failed to process record"
                    );
                }
            }
        }

        Ok(report)
    }

    async fn relay_record(
        &self,
        record: &OutboxRecord,
        cancel: &CancellationToken,
        report: &mut RelayReport,
    ) -> OutboxResult<PublishOutcome> {
        let event = match self.registry.decode(&record.event_type, &record.payload) {
            Ok(event) => event,
            Err(e) if e.is_reconstruction_error() => {
                report.undecodable += 1;
                warn!(
                    event_id = %record.event_id,
                    event_type = %record.event_type,
                    error = %e,
                    "Outbox record cannot be decoded"
                );
                return self.dispatcher.reject(record.event_id, &e.to_string()).await;
            }
            Err(e) => return Err(e),
        };

        if event.event_id() != record.event_id {
            let reason = format!(
                "payload carries event id {} but record is keyed {}",
                event.event_id(),
                record.event_id
            );
            report.undecodable += 1;
            warn!(event_id = %record.event_id, reason = %reason, "Outbox record is inconsistent");
            return self.dispatcher.reject(record.event_id, &reason).await;
        }

        self.dispatcher.publish_dyn(event.as_ref(), cancel).await
    }
}

impl std::fmt::Debug for OutboxRelay {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OutboxRelay")
            .field("registry", &self.registry)
            .field("config", &self.config)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::InMemoryBus;
    use crate::error::OutboxError;
    use crate::event::{IntegrationEvent, IntegrationEventMetadata};
    use crate::memory::InMemoryOutboxStore;
    use crate::record::OutboxState;
    use crate::retry::RetryPolicy;
    use crate::store::OutboxStore;
    use serde::{Deserialize, Serialize};
    use uuid::Uuid;

    #[derive(Debug, Clone, Serialize, Deserialize)]
    struct ParcelShipped {
        #[serde(flatten)]
        metadata: IntegrationEventMetadata,
        parcel_id: String,
    }

    impl IntegrationEvent for ParcelShipped {
        const EVENT_TYPE: &'static str = "ParcelShipped";

        fn metadata(&self) -> &IntegrationEventMetadata {
            &self.metadata
        }
    }

    fn parcel(id: &str) -> ParcelShipped {
        ParcelShipped {
            metadata: IntegrationEventMetadata::new(),
            parcel_id: id.to_string(),
        }
    }

    struct Harness {
        bus: InMemoryBus,
        store: InMemoryOutboxStore,
        dispatcher: Arc<IntegrationEventDispatcher>,
        relay: OutboxRelay,
    }

    fn harness(policy: RetryPolicy) -> Harness {
        let bus = InMemoryBus::new();
        let store = InMemoryOutboxStore::new();
        let dispatcher = Arc::new(
            IntegrationEventDispatcher::new(Arc::new(bus.clone()), Arc::new(store.clone()))
                .with_retry_policy(policy),
        );
        let registry = EventRegistry::builder()
            .register::<ParcelShipped>()
            .unwrap()
            .build();
        let relay = OutboxRelay::new(dispatcher.clone(), Arc::new(registry));
        Harness {
            bus,
            store,
            dispatcher,
            relay,
        }
    }

    async fn defer(h: &Harness, event: &ParcelShipped) {
        h.bus.set_available(false);
        h.dispatcher.publish(event, &CancellationToken::new()).await.unwrap();
        h.bus.set_available(true);
    }

    #[tokio::test]
    async fn test_relay_publishes_deferred_records() {
        let h = harness(RetryPolicy::default());
        let first = parcel("P1");
        let second = parcel("P2");
        defer(&h, &first).await;
        defer(&h, &second).await;

        let report = h.relay.run_once(&CancellationToken::new()).await.unwrap();

        assert_eq!(report.scanned, 2);
        assert_eq!(report.published, 2);
        assert!(report.lease_acquired);
        assert_eq!(h.bus.published("ParcelShipped").len(), 2);
        for event in [&first, &second] {
            let record = h.store.get(event.metadata.id).await.unwrap().unwrap();
            assert_eq!(record.state, OutboxState::Completed);
        }
    }

    #[tokio::test]
    async fn test_empty_outbox_is_a_quiet_tick() {
        let h = harness(RetryPolicy::default());
        let report = h.relay.run_once(&CancellationToken::new()).await.unwrap();

        assert_eq!(report.scanned, 0);
        assert_eq!(h.bus.attempts(), 0);
    }

    #[tokio::test]
    async fn test_unknown_type_is_rejected() {
        let h = harness(RetryPolicy::new(1));
        let id = Uuid::new_v4();
        let mut uow = h.store.begin().await.unwrap();
        uow.create(OutboxRecord::new(id, "Unregistered", "{}", chrono::Utc::now()))
            .await
            .unwrap();
        uow.commit().await.unwrap();

        let report = h.relay.run_once(&CancellationToken::new()).await.unwrap();

        assert_eq!(report.undecodable, 1);
        assert_eq!(report.failed, 1);
        let record = h.store.get(id).await.unwrap().unwrap();
        assert_eq!(record.state, OutboxState::Failed);
        assert!(record.last_error.unwrap().contains("Unregistered"));
    }

    #[tokio::test]
    async fn test_batch_size_takes_oldest_first() {
        let h = harness(RetryPolicy::default());
        let relay = h.relay.clone().with_config(RelayConfig {
            batch_size: Some(1),
            enable_logging: false,
        });
        let older = parcel("P1");
        let newer = parcel("P2");
        defer(&h, &older).await;
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        defer(&h, &newer).await;

        let report = relay.run_once(&CancellationToken::new()).await.unwrap();

        assert_eq!(report.scanned, 1);
        let older_record = h.store.get(older.metadata.id).await.unwrap().unwrap();
        let newer_record = h.store.get(newer.metadata.id).await.unwrap().unwrap();
        assert_eq!(older_record.state, OutboxState::Completed);
        assert_eq!(newer_record.state, OutboxState::ReadyToSend);
    }

    #[tokio::test]
    async fn test_cancelled_before_start_touches_nothing() {
        let h = harness(RetryPolicy::default());
        defer(&h, &parcel("P1")).await;
        let cancel = CancellationToken::new();
        cancel.cancel();

        let report = h.relay.run_once(&cancel).await.unwrap();

        assert!(report.cancelled);
        assert_eq!(report.scanned, 0);
        assert_eq!(h.bus.published_count(), 0);
    }

    #[tokio::test]
    async fn test_held_lease_skips_tick() {
        let h = harness(RetryPolicy::default());
        let lease = Arc::new(SingleInstanceLease::new());
        let relay = h.relay.clone().with_lease(lease.clone());
        defer(&h, &parcel("P1")).await;

        assert!(lease.try_acquire().await.unwrap());
        let report = relay.run_once(&CancellationToken::new()).await.unwrap();
        assert!(!report.lease_acquired);
        assert_eq!(h.bus.published_count(), 0);

        lease.release().await.unwrap();
        let report = relay.run_once(&CancellationToken::new()).await.unwrap();
        assert_eq!(report.published, 1);
        assert!(!lease.is_held());
    }

    #[tokio::test]
    async fn test_snapshot_failure_fails_tick_and_releases_lease() {
        let h = harness(RetryPolicy::default());
        let lease = Arc::new(SingleInstanceLease::new());
        let relay = h.relay.clone().with_lease(lease.clone());
        h.store.set_fail_reads(true);

        let result = relay.run_once(&CancellationToken::new()).await;

        assert!(matches!(result, Err(OutboxError::Storage(_))));
        assert!(!lease.is_held());
    }
}
