//! Error taxonomy for a sync pass.
//!
//! Only [`SyncError::Config`] is fatal. Everything else is scoped to a single
//! directory, file, or task and is logged by the supervisor before it moves on.

use std::io;
use std::path::PathBuf;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, SyncError>;

#[derive(Error, Debug)]
pub enum SyncError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Failed to list directory {}: {source}", .path.display())]
    Scan {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Failed to classify {}: {source}", .path.display())]
    Classification {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Failed to build task for {}: {source}", .path.display())]
    TaskBuild {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Check-in rejected {id}: {reason}")]
    Check { id: String, reason: String },

    #[error("Protocol error: {0}")]
    Protocol(ProtocolError),

    #[error("Transport error during {op}: {source}")]
    Transport {
        op: &'static str,
        #[source]
        source: io::Error,
    },

    #[error("{} ended after {sent} of {expected} bytes", .path.display())]
    SourceTruncated {
        path: PathBuf,
        expected: u64,
        sent: u64,
    },

    #[error("Commit of {report_id} failed: {reason}")]
    Commit { report_id: String, reason: String },
}

/// Handshake and final-reply failures. All of them leave the stream in an
/// unknown state, so the session must reconnect before the next attempt.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    #[error("unexpected header reply `{0}`")]
    UnexpectedHeaderReply(String),

    #[error("unexpected final reply `{0}`")]
    UnexpectedFinalReply(String),

    #[error("short reply: expected at least {expected} bytes, got {got}")]
    ShortReply { expected: usize, got: usize },
}

impl SyncError {
    pub fn transport(op: &'static str, source: io::Error) -> Self {
        SyncError::Transport { op, source }
    }

    /// The remote hung up mid-exchange. Retried without a warning since an
    /// idle server closing a pooled connection is routine.
    pub fn is_end_of_stream(&self) -> bool {
        match self {
            SyncError::Transport { source, .. } => source.kind() == io::ErrorKind::UnexpectedEof,
            SyncError::Protocol(ProtocolError::ShortReply { got: 0, .. }) => true,
            _ => false,
        }
    }

    /// Whether the failure poisons the TCP stream.
    pub fn needs_reconnect(&self) -> bool {
        matches!(
            self,
            SyncError::Protocol(_)
                | SyncError::Transport { .. }
                | SyncError::SourceTruncated { .. }
        )
    }
}

impl From<ProtocolError> for SyncError {
    fn from(err: ProtocolError) -> Self {
        SyncError::Protocol(err)
    }
}
