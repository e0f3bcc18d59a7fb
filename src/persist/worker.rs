use crate::core::{Result, StoreError};
use crate::storage::persistence::encode_snapshot;
use crate::storage::{RequestTable, SnapshotBackend};
use std::sync::Arc;
use tokio::sync::{Notify, RwLock, oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, warn};

/// Progress of the background writer, in table revisions.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SaveStatus {
    /// Highest revision a save was attempted for.
    pub attempted: u64,
    /// Highest revision known to be on durable storage.
    pub persisted: u64,
    /// Completed saves.
    pub saves: u64,
    /// Failed saves.
    pub failures: u64,
    pub last_error: Option<String>,
}

impl SaveStatus {
    fn attempts(&self) -> u64 {
        self.saves + self.failures
    }
}

/// Cheap handle mutators use to request a save.
#[derive(Clone)]
pub struct PersistHandle {
    dirty: Arc<Notify>,
    status_rx: watch::Receiver<SaveStatus>,
}

impl PersistHandle {
    /// Never blocks. Signals raised while a save is running collapse into a
    /// single follow-up save.
    pub fn mark_dirty(&self) {
        self.dirty.notify_one();
    }

    pub fn status(&self) -> SaveStatus {
        SaveStatus::clone(&self.status_rx.borrow())
    }

    /// Waits until a save covering `revision` has been attempted.
    pub async fn flush(&self, revision: u64) -> Result<()> {
        let mut status_rx = self.status_rx.clone();
        let attempts_before = {
            let status = status_rx.borrow();
            if status.persisted >= revision {
                return Ok(());
            }
            status.attempts()
        };

        self.mark_dirty();

        let status = {
            let status = status_rx
                .wait_for(|s| s.attempts() > attempts_before && s.attempted >= revision)
                .await
                .map_err(|_| StoreError::WorkerStopped("persist worker exited".to_string()))?;
            SaveStatus::clone(&status)
        };

        if status.persisted >= revision {
            Ok(())
        } else {
            Err(StoreError::Persist(
                status
                    .last_error
                    .unwrap_or_else(|| format!("revision {} was not saved", revision)),
            ))
        }
    }
}

/// Single background task that mirrors the table to its backend.
pub struct PersistWorker {
    handle: PersistHandle,
    stop_tx: Option<oneshot::Sender<()>>,
    join_handle: Option<JoinHandle<()>>,
}

impl PersistWorker {
    /// Spawns the writer on the current tokio runtime.
    pub fn spawn(table: Arc<RwLock<RequestTable>>, backend: Arc<dyn SnapshotBackend>) -> Self {
        let dirty = Arc::new(Notify::new());
        let (stop_tx, stop_rx) = oneshot::channel::<()>();

        let (status_tx, status_rx) = watch::channel(SaveStatus::default());
        // Whatever the table holds at spawn time came from the backend.
        let loaded = table.try_read().map(|t| t.revision()).unwrap_or(0);
        status_tx.send_modify(|s| {
            s.attempted = loaded;
            s.persisted = loaded;
        });

        let join_handle = tokio::spawn(run_worker(
            table,
            backend,
            dirty.clone(),
            status_tx,
            stop_rx,
        ));

        Self {
            handle: PersistHandle { dirty, status_rx },
            stop_tx: Some(stop_tx),
            join_handle: Some(join_handle),
        }
    }

    pub fn handle(&self) -> PersistHandle {
        self.handle.clone()
    }

    /// Signals the worker to stop and waits for its final save.
    pub async fn stop(mut self) -> Result<SaveStatus> {
        if let Some(stop_tx) = self.stop_tx.take() {
            let _ = stop_tx.send(());
        }

        if let Some(join_handle) = self.join_handle.take() {
            join_handle
                .await
                .map_err(|err| StoreError::WorkerStopped(format!("persist worker join: {}", err)))?;
        }

        Ok(self.handle.status())
    }
}

impl Drop for PersistWorker {
    fn drop(&mut self) {
        if let Some(stop_tx) = self.stop_tx.take() {
            let _ = stop_tx.send(());
        }
        if let Some(join_handle) = self.join_handle.take() {
            join_handle.abort();
        }
    }
}

async fn run_worker(
    table: Arc<RwLock<RequestTable>>,
    backend: Arc<dyn SnapshotBackend>,
    dirty: Arc<Notify>,
    status_tx: watch::Sender<SaveStatus>,
    mut stop_rx: oneshot::Receiver<()>,
) {
    loop {
        tokio::select! {
            biased;
            _ = &mut stop_rx => break,
            _ = dirty.notified() => {
                save_once(&table, backend.as_ref(), &status_tx).await;
            }
        }
    }

    // Drain: anything not yet on disk gets one last attempt.
    save_once(&table, backend.as_ref(), &status_tx).await;
    let persisted = status_tx.borrow().persisted;
    if persisted < table.read().await.revision() {
        warn!(
            persisted,
            "persist worker stopped with unsaved changes"
        );
    }
}

async fn save_once(
    table: &RwLock<RequestTable>,
    backend: &dyn SnapshotBackend,
    status_tx: &watch::Sender<SaveStatus>,
) {
    // Encode under the read lock, write without it.
    let (revision, encoded) = {
        let guard = table.read().await;
        let revision = guard.revision();
        if revision <= status_tx.borrow().persisted {
            return;
        }
        (revision, encode_snapshot(guard.records()))
    };

    let result = match encoded {
        Ok(bytes) => {
            let len = bytes.len();
            backend.save(&bytes).await.map(|_| len)
        }
        Err(err) => Err(err),
    };

    match &result {
        Ok(bytes) => debug!(revision, bytes, backend = %backend.describe(), "snapshot saved"),
        Err(err) => error!(
            revision,
            backend = %backend.describe(),
            error = %err,
            "snapshot save failed"
        ),
    }

    status_tx.send_modify(|s| {
        s.attempted = s.attempted.max(revision);
        match result {
            Ok(_) => {
                s.persisted = s.persisted.max(revision);
                s.saves += 1;
                s.last_error = None;
            }
            Err(err) => {
                s.failures += 1;
                s.last_error = Some(err.to_string());
            }
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::NewRequest;
    use crate::storage::MemoryBackend;
    use std::time::Duration;

    fn table() -> Arc<RwLock<RequestTable>> {
        Arc::new(RwLock::new(RequestTable::new()))
    }

    #[tokio::test]
    async fn test_flush_saves_current_revision() {
        let table = table();
        let backend = Arc::new(MemoryBackend::new());
        let worker = PersistWorker::spawn(table.clone(), backend.clone());
        let handle = worker.handle();

        let revision = {
            let mut guard = table.write().await;
            guard.create(NewRequest::new("A", "Artist1", "Bob")).unwrap();
            guard.revision()
        };
        handle.mark_dirty();
        handle.flush(revision).await.unwrap();

        assert_eq!(backend.snapshot_records().await.unwrap().len(), 1);
        let status = worker.stop().await.unwrap();
        assert_eq!(status.persisted, revision);
        assert_eq!(status.failures, 0);
    }

    #[tokio::test]
    async fn test_flush_on_clean_table_returns_immediately() {
        let backend = Arc::new(MemoryBackend::new());
        let worker = PersistWorker::spawn(table(), backend.clone());

        worker.handle().flush(0).await.unwrap();
        worker.stop().await.unwrap();
        assert_eq!(backend.save_count().await, 0);
    }

    #[tokio::test]
    async fn test_signals_are_coalesced() {
        let table = table();
        let backend = Arc::new(MemoryBackend::new().with_save_delay(Duration::from_millis(50)));
        let worker = PersistWorker::spawn(table.clone(), backend.clone());
        let handle = worker.handle();

        for i in 0..50 {
            table
                .write()
                .await
                .create(NewRequest::new(format!("T{}", i), "Artist", "Req"))
                .unwrap();
            handle.mark_dirty();
        }
        handle.flush(50).await.unwrap();

        let saves = backend.save_count().await;
        assert!(saves >= 1);
        assert!(saves <= 3, "expected coalesced saves, got {}", saves);
        assert_eq!(backend.snapshot_records().await.unwrap().len(), 50);
        worker.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_failed_save_is_reported_and_retried() {
        let table = table();
        let backend = Arc::new(MemoryBackend::new());
        backend.set_fail_saves(true);
        let worker = PersistWorker::spawn(table.clone(), backend.clone());
        let handle = worker.handle();

        table.write().await.create(NewRequest::new("A", "B", "C")).unwrap();
        handle.mark_dirty();
        let err = handle.flush(1).await.unwrap_err();
        assert!(matches!(err, StoreError::Persist(_)));
        assert!(handle.status().failures >= 1);

        backend.set_fail_saves(false);
        handle.flush(1).await.unwrap();

        let status = worker.stop().await.unwrap();
        assert_eq!(status.persisted, 1);
        assert_eq!(status.last_error, None);
    }

    #[tokio::test]
    async fn test_stop_drains_pending_changes() {
        let table = table();
        let backend = Arc::new(MemoryBackend::new().with_save_delay(Duration::from_millis(20)));
        let worker = PersistWorker::spawn(table.clone(), backend.clone());

        // Mutate without signalling; stop must still persist it.
        table.write().await.create(NewRequest::new("A", "B", "C")).unwrap();
        let status = worker.stop().await.unwrap();

        assert_eq!(status.persisted, 1);
        assert_eq!(backend.snapshot_records().await.unwrap().len(), 1);
    }
}
