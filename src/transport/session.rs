//! Sync session - owns the single TCP connection to the ingestion server.
//!
//! Each task runs the handshake/transfer exchange from [`super::protocol`]:
//!
//! ```text
//! Disconnected -> Connected -> SendHeader -> AwaitHeaderReply
//!     -> ALL_SAME                                   (skipped, success)
//!     -> CONTINUE -> Transferring -> AwaitFinalReply (OK: success)
//!     -> anything else                              (failed, reconnect)
//! ```
//!
//! Any protocol or transport failure drops the connection and flags a
//! reconnect; only a successful connect clears the flag. The session is the
//! sole owner of the stream, so every exchange takes `&mut self`.

use crate::checkin::CheckIn;
use crate::config::Config;
use crate::error::{Result, SyncError};
use crate::task::Task;
use crate::transport::protocol::{
    encode_header, parse_final_reply, HeaderReply, FINAL_REPLY_LEN, HEADER_REPLY_LEN,
    REPLY_BUF_SIZE, TRANSFER_CHUNK_SIZE,
};
use std::future::Future;
use std::io;
use std::time::Duration;
use tokio::fs::File;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Result of one successful exchange.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transfer {
    /// Remote answered `ALL_SAME`; no payload was sent
    AlreadyPresent,
    /// Payload of this many bytes was accepted with `OK`
    Sent(u64),
}

/// Final state of a task after the retry loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskOutcome {
    /// Bytes delivered (and committed, if check-in is configured)
    Synced { bytes: u64 },
    /// Remote already had the content (and the commit, if any, was accepted)
    AlreadyPresent,
    /// Pre-check refused the task; no connection attempt was made
    Rejected,
    /// Transfer succeeded but the commit call did not
    CommitFailed,
    /// Every attempt failed
    Failed { attempts: usize },
    /// Stop requested before the task could complete
    Cancelled,
}

impl TaskOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, TaskOutcome::Synced { .. } | TaskOutcome::AlreadyPresent)
    }
}

/// Connection settings for a session.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub address: String,
    pub max_retries: usize,
    pub io_timeout: Duration,
}

impl From<&Config> for SessionConfig {
    fn from(config: &Config) -> Self {
        Self {
            address: config.address.clone(),
            max_retries: config.max_retries,
            io_timeout: config.io_timeout(),
        }
    }
}

pub struct SyncSession {
    config: SessionConfig,
    check_in: Option<CheckIn>,
    cancel: CancellationToken,
    conn: Option<TcpStream>,
    reconnect_needed: bool,
    buffer: Vec<u8>,
}

impl SyncSession {
    pub fn new(
        config: SessionConfig,
        check_in: Option<CheckIn>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            config,
            check_in,
            cancel,
            conn: None,
            reconnect_needed: true,
            buffer: vec![0u8; REPLY_BUF_SIZE],
        }
    }

    /// Build a session from the run configuration, with check-in when a URL
    /// is configured.
    pub fn from_config(config: &Config, cancel: CancellationToken) -> Result<Self> {
        let check_in = match &config.url {
            Some(url) => Some(CheckIn::new(
                url.as_str(),
                config.key.as_str(),
                config.io_timeout(),
            )?),
            None => None,
        };
        Ok(Self::new(SessionConfig::from(config), check_in, cancel))
    }

    pub fn reconnect_needed(&self) -> bool {
        self.reconnect_needed
    }

    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Deliver one task with bounded retry.
    ///
    /// Never returns an error: every failure is logged and folded into the
    /// outcome so the pass can move on to the next file.
    pub async fn sync(&mut self, task: &Task) -> TaskOutcome {
        if let Some(check_in) = &self.check_in {
            if let Err(e) = check_in.pre_check(&task.id).await {
                warn!("{}", e);
                return TaskOutcome::Rejected;
            }
        }

        let attempts = self.config.max_retries + 1;
        for attempt in 1..=attempts {
            if self.cancel.is_cancelled() {
                info!("sync {} aborted", task.name);
                return TaskOutcome::Cancelled;
            }

            let transfer = match self.execute(task).await {
                Ok(transfer) => transfer,
                Err(e) if e.is_end_of_stream() => {
                    debug!("sync {} attempt {}/{}: {}", task.name, attempt, attempts, e);
                    continue;
                }
                Err(e) => {
                    warn!("sync {} attempt {}/{}: {}", task.name, attempt, attempts, e);
                    continue;
                }
            };

            if let Some(check_in) = &self.check_in {
                if let Err(e) = check_in.commit(task).await {
                    warn!("{}", e);
                    return TaskOutcome::CommitFailed;
                }
            }

            return match transfer {
                Transfer::AlreadyPresent => TaskOutcome::AlreadyPresent,
                Transfer::Sent(bytes) => TaskOutcome::Synced { bytes },
            };
        }

        warn!("sync {} failed after {} attempts", task.name, attempts);
        TaskOutcome::Failed { attempts }
    }

    /// Run a single exchange for `task`, connecting first if needed.
    pub async fn execute(&mut self, task: &Task) -> Result<Transfer> {
        if self.reconnect_needed {
            self.connect().await?;
        }

        let result = self.exchange(task).await;
        if let Err(e) = &result {
            if e.needs_reconnect() {
                self.reconnect_needed = true;
                self.conn = None;
            }
        }
        result
    }

    async fn connect(&mut self) -> Result<()> {
        self.conn = None;
        let stream = with_deadline(
            "connect",
            self.config.io_timeout,
            TcpStream::connect(self.config.address.as_str()),
        )
        .await
        .inspect_err(|e| warn!("connecting to {} failed: {}", self.config.address, e))?;

        // Header lines are tiny; don't hold them back.
        stream
            .set_nodelay(true)
            .map_err(|e| SyncError::transport("connect", e))?;

        self.conn = Some(stream);
        self.reconnect_needed = false;
        info!("connected to {}", self.config.address);
        Ok(())
    }

    async fn exchange(&mut self, task: &Task) -> Result<Transfer> {
        let mut source = File::open(&task.file)
            .await
            .map_err(|source| SyncError::TaskBuild {
                path: task.file.clone(),
                source,
            })?;

        self.write_all(&encode_header(task)).await?;

        let n = self.read_at_least(HEADER_REPLY_LEN).await?;
        match HeaderReply::parse(&self.buffer[..n])? {
            HeaderReply::AllSame => {
                info!("sync {} -> {} already present", task.name, task.report_id);
                return Ok(Transfer::AlreadyPresent);
            }
            HeaderReply::Continue => {}
        }

        let sent = self.send_payload(task, &mut source).await?;

        let n = self.read_at_least(FINAL_REPLY_LEN).await?;
        parse_final_reply(&self.buffer[..n])?;

        info!("sync {} -> {} ({} bytes)", task.name, task.report_id, sent);
        Ok(Transfer::Sent(sent))
    }

    /// Stream exactly `task.size` bytes. Content past the declared size is
    /// not sent; a file that ends early fails the attempt.
    async fn send_payload(&mut self, task: &Task, source: &mut File) -> Result<u64> {
        let mut chunk = vec![0u8; TRANSFER_CHUNK_SIZE];
        let mut sent = 0u64;

        while sent < task.size {
            let want = (task.size - sent).min(TRANSFER_CHUNK_SIZE as u64) as usize;
            let n = source
                .read(&mut chunk[..want])
                .await
                .map_err(|e| SyncError::transport("read source", e))?;
            if n == 0 {
                return Err(SyncError::SourceTruncated {
                    path: task.file.clone(),
                    expected: task.size,
                    sent,
                });
            }

            self.write_all(&chunk[..n]).await?;
            sent += n as u64;
        }

        Ok(sent)
    }

    async fn write_all(&mut self, data: &[u8]) -> Result<()> {
        let timeout = self.config.io_timeout;
        let conn = self.conn.as_mut().ok_or_else(|| not_connected("write"))?;
        with_deadline("write", timeout, conn.write_all(data)).await
    }

    /// Accumulate into the reply buffer until `min` bytes are present or the
    /// peer closes. Returns the number of buffered bytes, which may be short.
    async fn read_at_least(&mut self, min: usize) -> Result<usize> {
        let timeout = self.config.io_timeout;
        let conn = self.conn.as_mut().ok_or_else(|| not_connected("read reply"))?;

        let mut len = 0;
        while len < min {
            let n =
                with_deadline("read reply", timeout, conn.read(&mut self.buffer[len..])).await?;
            if n == 0 {
                break;
            }
            len += n;
        }
        Ok(len)
    }
}

fn not_connected(op: &'static str) -> SyncError {
    SyncError::transport(op, io::Error::new(io::ErrorKind::NotConnected, "no connection"))
}

/// Bound a single socket operation by `timeout`, measured from the call.
async fn with_deadline<T, F>(op: &'static str, timeout: Duration, fut: F) -> Result<T>
where
    F: Future<Output = io::Result<T>>,
{
    match tokio::time::timeout(timeout, fut).await {
        Ok(result) => result.map_err(|e| SyncError::transport(op, e)),
        Err(_) => Err(SyncError::transport(
            op,
            io::Error::new(io::ErrorKind::TimedOut, format!("no progress in {:?}", timeout)),
        )),
    }
}
