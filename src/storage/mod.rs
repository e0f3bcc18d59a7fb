pub mod backend;
pub mod persistence;
pub mod table;

pub use backend::{JsonFileBackend, MemoryBackend, SnapshotBackend};
pub use persistence::{RecoveryOutcome, temp_path_for};
pub use table::RequestTable;
