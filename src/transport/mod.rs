//! TCP delivery to the ingestion server.

pub mod protocol;
pub mod session;

pub use protocol::HeaderReply;
pub use session::{SessionConfig, SyncSession, TaskOutcome, Transfer};
