//! In-memory outbox store.

use crate::error::{OutboxError, OutboxResult};
use crate::record::{OutboxRecord, OutboxState};
use crate::store::{OutboxStore, OutboxUnitOfWork};
use async_trait::async_trait;
use chrono::Utc;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::RwLock;
use tracing::debug;
use uuid::Uuid;

#[derive(Default)]
struct StoreState {
    records: HashMap<Uuid, OutboxRecord>,
    documents: HashMap<String, Value>,
}

#[derive(Default)]
struct Faults {
    fail_commits: AtomicBool,
    fail_reads: AtomicBool,
}

/// In-memory outbox store
///
/// Alongside outbox records it keeps business "documents", so a unit of
/// work can commit a business fact and the outbox record it produced in
/// one step.
#[derive(Clone, Default)]
pub struct InMemoryOutboxStore {
    state: Arc<RwLock<StoreState>>,
    faults: Arc<Faults>,
}

impl InMemoryOutboxStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start a unit of work with access to [`InMemoryUnitOfWork::put_document`].
    pub async fn begin_unit(&self) -> OutboxResult<InMemoryUnitOfWork> {
        self.check_reads()?;
        Ok(InMemoryUnitOfWork {
            store: self.clone(),
            staged: Vec::new(),
        })
    }

    /// Every committed record.
    pub async fn records(&self) -> Vec<OutboxRecord> {
        self.state.read().await.records.values().cloned().collect()
    }

    pub async fn len(&self) -> usize {
        self.state.read().await.records.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.state.read().await.records.is_empty()
    }

    /// Committed business document.
    pub async fn document(&self, key: &str) -> Option<Value> {
        self.state.read().await.documents.get(key).cloned()
    }

    /// Make commits fail with a storage error.
    pub fn set_fail_commits(&self, fail: bool) {
        self.faults.fail_commits.store(fail, Ordering::SeqCst);
    }

    /// Make reads and `begin` fail with a storage error.
    pub fn set_fail_reads(&self, fail: bool) {
        self.faults.fail_reads.store(fail, Ordering::SeqCst);
    }

    fn check_reads(&self) -> OutboxResult<()> {
        if self.faults.fail_reads.load(Ordering::SeqCst) {
            return Err(OutboxError::Storage("in-memory store reads disabled".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl OutboxStore for InMemoryOutboxStore {
    async fn begin(&self) -> OutboxResult<Box<dyn OutboxUnitOfWork>> {
        Ok(Box::new(self.begin_unit().await?))
    }

    async fn get(&self, event_id: Uuid) -> OutboxResult<Option<OutboxRecord>> {
        self.check_reads()?;
        Ok(self.state.read().await.records.get(&event_id).cloned())
    }

    async fn all_ready_to_send(&self) -> OutboxResult<Vec<OutboxRecord>> {
        self.check_reads()?;
        Ok(self
            .state
            .read()
            .await
            .records
            .values()
            .filter(|record| record.state == OutboxState::ReadyToSend)
            .cloned()
            .collect())
    }
}

#[derive(Debug, Clone)]
enum StagedWrite {
    Create(OutboxRecord),
    UpdateState { event_id: Uuid, state: OutboxState },
    RecordFailure { event_id: Uuid, error: String },
    PutDocument { key: String, value: Value },
}

/// Committed records with this unit of work's writes layered on top.
struct Overlay<'a> {
    base: &'a HashMap<Uuid, OutboxRecord>,
    changed: HashMap<Uuid, OutboxRecord>,
    documents: Vec<(String, Value)>,
}

impl<'a> Overlay<'a> {
    fn new(base: &'a HashMap<Uuid, OutboxRecord>) -> Self {
        Self {
            base,
            changed: HashMap::new(),
            documents: Vec::new(),
        }
    }

    fn get(&self, event_id: &Uuid) -> Option<&OutboxRecord> {
        self.changed.get(event_id).or_else(|| self.base.get(event_id))
    }

    fn get_mut(&mut self, event_id: Uuid) -> OutboxResult<&mut OutboxRecord> {
        if !self.changed.contains_key(&event_id) {
            let record = self
                .base
                .get(&event_id)
                .cloned()
                .ok_or(OutboxError::NotFound(event_id))?;
            self.changed.insert(event_id, record);
        }
        self.changed
            .get_mut(&event_id)
            .ok_or(OutboxError::NotFound(event_id))
    }

    fn apply(&mut self, write: &StagedWrite) -> OutboxResult<()> {
        match write {
            StagedWrite::Create(record) => {
                if record.state != OutboxState::ReadyToSend {
                    return Err(OutboxError::InvalidInitialState {
                        event_id: record.event_id,
                        state: record.state,
                    });
                }
                if self.get(&record.event_id).is_some() {
                    return Err(OutboxError::DuplicateKey(record.event_id));
                }
                self.changed.insert(record.event_id, record.clone());
            }
            StagedWrite::UpdateState { event_id, state } => {
                self.get_mut(*event_id)?.transition(*state)?;
            }
            StagedWrite::RecordFailure { event_id, error } => {
                let record = self.get_mut(*event_id)?;
                // terminal records keep their final attempt count
                if !record.state.is_terminal() {
                    record.record_failure(error.as_str());
                }
            }
            StagedWrite::PutDocument { key, value } => {
                self.documents.push((key.clone(), value.clone()));
            }
        }
        Ok(())
    }

    fn replay(base: &'a HashMap<Uuid, OutboxRecord>, writes: &[StagedWrite]) -> OutboxResult<Self> {
        let mut overlay = Self::new(base);
        for write in writes {
            overlay.apply(write)?;
        }
        Ok(overlay)
    }
}

/// Unit of work over an [`InMemoryOutboxStore`].
///
/// Writes are validated when staged and again against the committed state
/// at commit, where they apply all together or not at all.
pub struct InMemoryUnitOfWork {
    store: InMemoryOutboxStore,
    staged: Vec<StagedWrite>,
}

impl InMemoryUnitOfWork {
    /// Stage a business document write.
    pub fn put_document(&mut self, key: impl Into<String>, value: Value) {
        self.staged.push(StagedWrite::PutDocument {
            key: key.into(),
            value,
        });
    }

    /// Number of staged writes.
    pub fn pending_writes(&self) -> usize {
        self.staged.len()
    }

    /// Validate `write` against the current view and stage it.
    async fn stage(&mut self, write: StagedWrite) -> OutboxResult<Option<OutboxRecord>> {
        let state = self.store.state.read().await;
        let mut overlay = Overlay::replay(&state.records, &self.staged)?;
        overlay.apply(&write)?;

        let touched = match &write {
            StagedWrite::Create(record) => Some(record.event_id),
            StagedWrite::UpdateState { event_id, .. }
            | StagedWrite::RecordFailure { event_id, .. } => Some(*event_id),
            StagedWrite::PutDocument { .. } => None,
        };
        let view = touched.and_then(|id| overlay.get(&id).cloned());

        drop(overlay);
        drop(state);
        self.staged.push(write);
        Ok(view)
    }
}

#[async_trait]
impl OutboxUnitOfWork for InMemoryUnitOfWork {
    async fn get(&mut self, event_id: Uuid) -> OutboxResult<Option<OutboxRecord>> {
        self.store.check_reads()?;
        let state = self.store.state.read().await;
        let overlay = Overlay::replay(&state.records, &self.staged)?;
        Ok(overlay.get(&event_id).cloned())
    }

    async fn create(&mut self, record: OutboxRecord) -> OutboxResult<()> {
        self.stage(StagedWrite::Create(record)).await.map(|_| ())
    }

    async fn update_state(&mut self, event_id: Uuid, state: OutboxState) -> OutboxResult<()> {
        self.stage(StagedWrite::UpdateState { event_id, state })
            .await
            .map(|_| ())
    }

    async fn record_failure(&mut self, event_id: Uuid, error: &str) -> OutboxResult<OutboxRecord> {
        self.stage(StagedWrite::RecordFailure {
            event_id,
            error: error.to_string(),
        })
        .await?
        .ok_or(OutboxError::NotFound(event_id))
    }

    async fn commit(self: Box<Self>) -> OutboxResult<()> {
        if self.store.faults.fail_commits.load(Ordering::SeqCst) {
            return Err(OutboxError::Storage("in-memory store commits disabled".to_string()));
        }
        if self.staged.is_empty() {
            return Ok(());
        }

        let mut state = self.store.state.write().await;
        let (changed, documents) = {
            let overlay = Overlay::replay(&state.records, &self.staged)?;
            (overlay.changed, overlay.documents)
        };

        let records = changed.len();
        state.records.extend(changed);
        state.documents.extend(documents);

        debug!(
            records,
            writes = self.staged.len(),
            committed_at = %Utc::now(),
            "Committed outbox unit of work"
        );
        Ok(())
    }
}
