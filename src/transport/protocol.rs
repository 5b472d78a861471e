//! Line protocol spoken with the ingestion server.
//!
//! Wire format, one exchange per task:
//!
//! ```text
//! client: report_id@size@content_hash@relative_path\r\n
//! server: ALL_SAME\r\n                 (done, nothing to send)
//!       | CONTINUE\r\n                 (client streams exactly `size` bytes)
//! server: OK\r\n                       (after the payload)
//! ```

use crate::error::ProtocolError;
use crate::task::Task;
use bytes::{BufMut, Bytes, BytesMut};

pub const LINE_END: &str = "\r\n";

pub const ALL_SAME: &str = "ALL_SAME";
pub const CONTINUE: &str = "CONTINUE";
pub const OK: &str = "OK";

/// Minimum bytes for a complete header reply (`ALL_SAME\r\n` / `CONTINUE\r\n`)
pub const HEADER_REPLY_LEN: usize = ALL_SAME.len() + LINE_END.len();

/// Minimum bytes for a complete final reply (`OK\r\n`)
pub const FINAL_REPLY_LEN: usize = OK.len() + LINE_END.len();

/// Reply buffer size, reused for every read on a session
pub const REPLY_BUF_SIZE: usize = 1024;

/// Payload chunk size
pub const TRANSFER_CHUNK_SIZE: usize = 64 * 1024;

// =============================================================================
// Header
// =============================================================================

pub fn encode_header(task: &Task) -> Bytes {
    let line = task.header();
    let mut buf = BytesMut::with_capacity(line.len() + LINE_END.len());
    buf.put_slice(line.as_bytes());
    buf.put_slice(LINE_END.as_bytes());
    buf.freeze()
}

// =============================================================================
// Replies
// =============================================================================

/// Server answer to a header line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeaderReply {
    /// Remote already holds this content under the report id
    AllSame,
    /// Remote wants the payload
    Continue,
}

fn trim_reply(raw: &[u8]) -> String {
    String::from_utf8_lossy(raw)
        .trim_matches(|c: char| c == '\r' || c == '\n')
        .to_string()
}

fn ensure_len(raw: &[u8], expected: usize) -> Result<(), ProtocolError> {
    if raw.len() < expected {
        return Err(ProtocolError::ShortReply {
            expected,
            got: raw.len(),
        });
    }
    Ok(())
}

impl HeaderReply {
    pub fn parse(raw: &[u8]) -> Result<Self, ProtocolError> {
        ensure_len(raw, HEADER_REPLY_LEN)?;
        match trim_reply(raw).as_str() {
            ALL_SAME => Ok(Self::AllSame),
            CONTINUE => Ok(Self::Continue),
            other => Err(ProtocolError::UnexpectedHeaderReply(other.to_string())),
        }
    }
}

/// Parse the reply that follows the payload.
pub fn parse_final_reply(raw: &[u8]) -> Result<(), ProtocolError> {
    ensure_len(raw, FINAL_REPLY_LEN)?;
    match trim_reply(raw).as_str() {
        OK => Ok(()),
        other => Err(ProtocolError::UnexpectedFinalReply(other.to_string())),
    }
}

// =============================================================================
// Tests
// =============================================================================
