//! Outbox persistence contract.

use crate::error::OutboxResult;
use crate::record::{OutboxRecord, OutboxState};
use async_trait::async_trait;
use uuid::Uuid;

/// Durable storage for outbox records.
///
/// Writes go through a unit of work so they commit together with the
/// business data that produced them.
#[async_trait]
pub trait OutboxStore: Send + Sync {
    /// Start a unit of work.
    async fn begin(&self) -> OutboxResult<Box<dyn OutboxUnitOfWork>>;

    /// Committed record for `event_id`.
    async fn get(&self, event_id: Uuid) -> OutboxResult<Option<OutboxRecord>>;

    /// Snapshot of every record currently in `ReadyToSend`.
    ///
    /// The snapshot is finite; records written after the call are not in
    /// it. Order is unspecified.
    async fn all_ready_to_send(&self) -> OutboxResult<Vec<OutboxRecord>>;
}

/// Staged writes against an [`OutboxStore`].
///
/// Nothing is visible to other readers until [`commit`](Self::commit).
/// Dropping the unit of work discards every staged write.
#[async_trait]
pub trait OutboxUnitOfWork: Send {
    /// Record for `event_id` as this unit of work sees it.
    async fn get(&mut self, event_id: Uuid) -> OutboxResult<Option<OutboxRecord>>;

    /// Insert a new record in `ReadyToSend`.
    ///
    /// Fails with `DuplicateKey` if the id exists, here or at commit time,
    /// and with `InvalidInitialState` for any other state.
    async fn create(&mut self, record: OutboxRecord) -> OutboxResult<()>;

    /// Move a record to `state`.
    ///
    /// Same state is a no-op; backward moves and moves out of a terminal
    /// state fail with `InvalidTransition`; unknown ids with `NotFound`.
    async fn update_state(&mut self, event_id: Uuid, state: OutboxState) -> OutboxResult<()>;

    /// Count a failed delivery attempt and return the updated record.
    ///
    /// Terminal records are returned unchanged.
    async fn record_failure(&mut self, event_id: Uuid, error: &str) -> OutboxResult<OutboxRecord>;

    /// Apply every staged write atomically.
    async fn commit(self: Box<Self>) -> OutboxResult<()>;
}
