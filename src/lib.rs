//! upp - push a growing file tree to a remote ingestion endpoint.
//!
//! Files are addressed by directory and content hash, so the remote can answer
//! `ALL_SAME` for anything it already holds and a restarted run only moves
//! new bytes. An optional HTTP check-in gates and records each delivery.

pub mod checkin;
pub mod classify;
pub mod config;
pub mod error;
pub mod scan;
pub mod sync;
pub mod task;
pub mod transport;

pub use config::Config;
pub use error::{Result, SyncError};
pub use sync::{SyncStats, Supervisor};
pub use task::{Task, TaskBuilder};
