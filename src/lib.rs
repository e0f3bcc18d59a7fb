// ============================================================================
// songqueue Library
// ============================================================================
//
// A concurrent song request store. Records live in an in-memory table guarded
// by a readers-writer lock; a background worker mirrors the table to a single
// JSON file through write-to-temp-then-rename, and a recovery pass reconciles
// a leftover temp file at startup and shutdown.

pub mod config;
pub mod core;
pub mod facade;
pub mod persist;
pub mod storage;

pub use config::StoreConfig;
pub use self::core::{NewRequest, Record, RequestStatus, Result, StoreError};
pub use facade::RequestStore;
pub use persist::SaveStatus;
pub use storage::{JsonFileBackend, MemoryBackend, RecoveryOutcome, SnapshotBackend};
