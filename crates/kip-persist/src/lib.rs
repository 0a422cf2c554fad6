//! KIP Incremental Persistence Layer
//!
//! Durable, idempotent SQLite writer. Every entity is committed the moment
//! it is produced or mutated, never batched at pipeline end: if the host
//! process dies mid-run, everything written so far is independently readable
//! from a fresh connection. Writes are upserts keyed on the run plus the
//! entity's stable ID, so a retry after a crash lands on the same row and a
//! replayed run never collides with rows another run committed.
//!
//! The audit event for a mutation commits in the same transaction as the
//! entity row; losing one on crash would be a correctness defect, not bad
//! luck.
//!
//! Wraps [`tokio_rusqlite`] so database access runs off the async runtime's
//! worker threads.

pub mod encode;
pub mod error;
pub mod progress;
pub mod schema;
pub mod writer;

pub use error::{Error, Result};
pub use progress::ProgressTracker;
pub use writer::{IncrementalWriter, PersistConfig, RunSnapshot};
