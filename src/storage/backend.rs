use super::persistence::{
    RecoveryOutcome, decode_snapshot, load_snapshot, recover_snapshot, temp_path_for,
    write_snapshot,
};
use crate::core::{Record, Result, StoreError};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::sync::Mutex;

/// Durable home of the table snapshot.
///
/// The table encodes itself under its read lock and hands the bytes over, so
/// implementations never see the lock.
#[async_trait]
pub trait SnapshotBackend: Send + Sync {
    /// Load the last complete snapshot. Absent storage is an empty table.
    async fn load(&self) -> Result<Vec<Record>>;

    /// Replace the stored snapshot. Must be all-or-nothing.
    async fn save(&self, bytes: &[u8]) -> Result<()>;

    /// Reconcile a half-finished save.
    async fn recover(&self) -> Result<RecoveryOutcome>;

    fn describe(&self) -> String;
}

// ============================================================================
// JSON file
// ============================================================================

pub struct JsonFileBackend {
    path: PathBuf,
    sync_writes: bool,
}

impl JsonFileBackend {
    pub fn new<P: AsRef<Path>>(path: P) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            sync_writes: true,
        }
    }

    pub fn with_sync_writes(mut self, sync_writes: bool) -> Self {
        self.sync_writes = sync_writes;
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn temp_path(&self) -> PathBuf {
        temp_path_for(&self.path)
    }
}

#[async_trait]
impl SnapshotBackend for JsonFileBackend {
    async fn load(&self) -> Result<Vec<Record>> {
        load_snapshot(&self.path).await
    }

    async fn save(&self, bytes: &[u8]) -> Result<()> {
        write_snapshot(&self.path, bytes, self.sync_writes).await
    }

    async fn recover(&self) -> Result<RecoveryOutcome> {
        recover_snapshot(&self.path).await
    }

    fn describe(&self) -> String {
        self.path().display().to_string()
    }
}

// ============================================================================
// Memory
// ============================================================================

#[derive(Default)]
struct MemoryState {
    bytes: Option<Vec<u8>>,
    saves: usize,
}

/// Keeps the snapshot in memory. Saves can be slowed down or made to fail.
#[derive(Default)]
pub struct MemoryBackend {
    state: Mutex<MemoryState>,
    fail_saves: AtomicBool,
    save_delay: Option<Duration>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_snapshot(bytes: Vec<u8>) -> Self {
        Self {
            state: Mutex::new(MemoryState {
                bytes: Some(bytes),
                saves: 0,
            }),
            ..Self::default()
        }
    }

    pub fn with_save_delay(mut self, delay: Duration) -> Self {
        self.save_delay = Some(delay);
        self
    }

    pub fn set_fail_saves(&self, fail: bool) {
        self.fail_saves.store(fail, Ordering::SeqCst);
    }

    /// Number of saves that completed.
    pub async fn save_count(&self) -> usize {
        self.state.lock().await.saves
    }

    pub async fn snapshot_bytes(&self) -> Option<Vec<u8>> {
        self.state.lock().await.bytes.clone()
    }

    pub async fn snapshot_records(&self) -> Result<Vec<Record>> {
        self.load().await
    }
}

#[async_trait]
impl SnapshotBackend for MemoryBackend {
    async fn load(&self) -> Result<Vec<Record>> {
        match &self.state.lock().await.bytes {
            Some(bytes) => decode_snapshot(Path::new("<memory>"), bytes),
            None => Ok(Vec::new()),
        }
    }

    async fn save(&self, bytes: &[u8]) -> Result<()> {
        if let Some(delay) = self.save_delay {
            tokio::time::sleep(delay).await;
        }
        if self.fail_saves.load(Ordering::SeqCst) {
            return Err(StoreError::io(
                "<memory>",
                std::io::Error::other("injected save failure"),
            ));
        }

        let mut state = self.state.lock().await;
        state.bytes = Some(bytes.to_vec());
        state.saves += 1;
        Ok(())
    }

    async fn recover(&self) -> Result<RecoveryOutcome> {
        Ok(RecoveryOutcome::Clean)
    }

    fn describe(&self) -> String {
        "<memory>".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::NewRequest;
    use crate::storage::persistence::encode_snapshot;
    use chrono::Utc;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_file_backend_round_trip() {
        let temp_dir = TempDir::new().unwrap();
        let backend = JsonFileBackend::new(temp_dir.path().join("data.json")).with_sync_writes(false);
        assert!(backend.load().await.unwrap().is_empty());

        let records = vec![NewRequest::new("A", "Artist1", "Bob").into_record(1, Utc::now())];
        backend.save(&encode_snapshot(&records).unwrap()).await.unwrap();

        assert_eq!(backend.load().await.unwrap(), records);
        assert!(!backend.temp_path().exists());
        assert_eq!(backend.describe(), backend.path().display().to_string());
        assert_eq!(backend.recover().await.unwrap(), RecoveryOutcome::Clean);
    }

    #[tokio::test]
    async fn test_memory_backend_failure_injection() {
        let backend = MemoryBackend::new();
        backend.set_fail_saves(true);
        assert!(backend.save(b"[]\n").await.is_err());
        assert_eq!(backend.save_count().await, 0);
        assert!(backend.snapshot_bytes().await.is_none());

        backend.set_fail_saves(false);
        backend.save(b"[]\n").await.unwrap();
        assert_eq!(backend.save_count().await, 1);
        assert!(backend.snapshot_records().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_memory_backend_rejects_corrupt_seed() {
        let backend = MemoryBackend::with_snapshot(b"{not json".to_vec());
        assert!(matches!(backend.load().await, Err(StoreError::Corrupt { .. })));
    }
}
