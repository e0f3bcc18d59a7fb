use crate::config::StoreConfig;
use crate::core::{NewRequest, Record, RequestStatus, Result, StoreError};
use crate::persist::{PersistHandle, PersistWorker, SaveStatus};
use crate::storage::{JsonFileBackend, RecoveryOutcome, RequestTable, SnapshotBackend};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::{Mutex, RwLock, RwLockWriteGuard};
use tracing::{error, info, warn};

/// Concurrent song request store.
///
/// Cloning is cheap; every clone shares the same table and background writer.
/// The in-memory table is authoritative. The backend is a mirror that lags by
/// at most the save currently in flight.
#[derive(Clone)]
pub struct RequestStore {
    inner: Arc<StoreInner>,
}

struct StoreInner {
    table: Arc<RwLock<RequestTable>>,
    backend: Arc<dyn SnapshotBackend>,
    persist: PersistHandle,
    worker: Mutex<Option<PersistWorker>>,
    /// Only flipped while holding the table write lock.
    closed: AtomicBool,
}

impl RequestStore {
    /// Opens the JSON file named by `config`. Fails if the file exists but
    /// cannot be parsed.
    pub async fn open(config: StoreConfig) -> Result<Self> {
        let backend =
            JsonFileBackend::new(&config.data_path).with_sync_writes(config.sync_writes);
        Self::with_backend(Arc::new(backend), config.recover_on_open).await
    }

    pub async fn with_backend(
        backend: Arc<dyn SnapshotBackend>,
        recover_on_open: bool,
    ) -> Result<Self> {
        if recover_on_open {
            let outcome = backend.recover().await?;
            if !outcome.is_clean() {
                info!(backend = %backend.describe(), "startup recovery: {}", outcome.describe());
            }
        }

        let table = RequestTable::from_records(backend.load().await?)?;
        info!(
            backend = %backend.describe(),
            records = table.len(),
            next_id = table.next_id(),
            "request store opened"
        );

        let table = Arc::new(RwLock::new(table));
        let worker = PersistWorker::spawn(table.clone(), backend.clone());

        Ok(Self {
            inner: Arc::new(StoreInner {
                table,
                backend,
                persist: worker.handle(),
                worker: Mutex::new(Some(worker)),
                closed: AtomicBool::new(false),
            }),
        })
    }

    // ------------------------------------------------------------------
    // Mutations
    // ------------------------------------------------------------------

    /// Stores a new pending request. The returned record is already visible to
    /// readers; its save happens in the background.
    pub async fn create(&self, candidate: NewRequest) -> Result<Record> {
        let record = self.writable().await?.create(candidate)?;
        self.inner.persist.mark_dirty();
        Ok(record)
    }

    /// `Ok(None)` when no record has this id.
    pub async fn update_status(&self, id: u64, status: RequestStatus) -> Result<Option<Record>> {
        let updated = self.writable().await?.update_status(id, status);
        if updated.is_some() {
            self.inner.persist.mark_dirty();
        }
        Ok(updated)
    }

    pub async fn delete(&self, id: u64) -> Result<bool> {
        let found = self.writable().await?.delete(id);
        if found {
            self.inner.persist.mark_dirty();
        }
        Ok(found)
    }

    async fn writable(&self) -> Result<RwLockWriteGuard<'_, RequestTable>> {
        let table = self.inner.table.write().await;
        if self.inner.closed.load(Ordering::SeqCst) {
            return Err(StoreError::Closed);
        }
        Ok(table)
    }

    // ------------------------------------------------------------------
    // Reads
    // ------------------------------------------------------------------

    pub async fn get_all(&self) -> Vec<Record> {
        self.inner.table.read().await.all()
    }

    pub async fn get_by_status(&self, status: RequestStatus) -> Vec<Record> {
        self.inner.table.read().await.by_status(status)
    }

    pub async fn get(&self, id: u64) -> Option<Record> {
        self.inner.table.read().await.get(id)
    }

    pub async fn len(&self) -> usize {
        self.inner.table.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.inner.table.read().await.is_empty()
    }

    pub async fn next_id(&self) -> u64 {
        self.inner.table.read().await.next_id()
    }

    // ------------------------------------------------------------------
    // Durability
    // ------------------------------------------------------------------

    /// Waits until everything applied so far has been saved, or the covering
    /// save failed.
    pub async fn flush(&self) -> Result<()> {
        let revision = self.inner.table.read().await.revision();
        self.inner.persist.flush(revision).await
    }

    pub fn save_status(&self) -> SaveStatus {
        self.inner.persist.status()
    }

    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::SeqCst)
    }

    /// Graceful shutdown: refuse further mutations, let the writer drain, then
    /// reconcile any temp snapshot left behind. Concurrent callers wait for the
    /// first one's drain; calling it again afterwards only repeats the recovery
    /// pass. A writer that died is logged, not fatal.
    pub async fn shutdown(&self) -> Result<RecoveryOutcome> {
        let revision = {
            let table = self.inner.table.write().await;
            self.inner.closed.store(true, Ordering::SeqCst);
            table.revision()
        };

        // Held through the drain and recovery: a concurrent caller must not
        // return, or touch the temp file, before the final save has landed.
        let mut worker_slot = self.inner.worker.lock().await;
        if let Some(worker) = worker_slot.take() {
            match worker.stop().await {
                Ok(status) if status.persisted < revision => warn!(
                    revision,
                    persisted = status.persisted,
                    error = status.last_error.as_deref().unwrap_or("unknown"),
                    "final snapshot was not saved"
                ),
                Ok(_) => {}
                Err(err) => error!(error = %err, "persist worker did not drain"),
            }
        }

        let outcome = self.inner.backend.recover().await?;
        drop(worker_slot);
        info!(
            backend = %self.inner.backend.describe(),
            "request store closed: {}",
            outcome.describe()
        );
        Ok(outcome)
    }
}
