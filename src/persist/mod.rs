//! Background persistence for the request table.
//!
//! Mutations never wait on disk. Each one signals [`PersistHandle::mark_dirty`];
//! a single [`PersistWorker`] task takes a read-locked snapshot of the whole
//! table and hands it to the backend. Because every save is a full snapshot, the
//! most recent successful save always covers everything before it, so saves need
//! no ordering among themselves.

pub mod worker;

pub use worker::{PersistHandle, PersistWorker, SaveStatus};
