//! One full pass over the repertory.
//!
//! Walk, classify, build, sync: strictly sequential, one task at a time over
//! one session. A stop request is honoured between tasks; a transfer already
//! underway is allowed to finish.

use crate::classify::{sniff_file, Classifier, SniffClassifier};
use crate::config::Config;
use crate::error::Result;
use crate::scan::Walker;
use crate::task::TaskBuilder;
use crate::transport::{SyncSession, TaskOutcome};
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Tally of a pass.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct SyncStats {
    /// Non-empty regular files found by the walker
    pub discovered: u64,

    /// Files whose content type is not allowed
    pub excluded: u64,

    /// Directories, files or tasks dropped on a local error
    pub errors: u64,

    /// Files delivered
    pub synced: u64,

    /// Files the remote already held
    pub skipped_same: u64,

    /// Files refused by the check-in pre-check
    pub rejected: u64,

    /// Files transferred whose commit was refused
    pub commit_failed: u64,

    /// Files that ran out of attempts
    pub failed: u64,

    /// Payload bytes accepted by the remote
    pub bytes_sent: u64,

    /// The pass stopped early on request
    pub cancelled: bool,
}

impl SyncStats {
    /// Tasks that count as delivered.
    pub fn succeeded(&self) -> u64 {
        self.synced + self.skipped_same
    }

    fn record(&mut self, outcome: TaskOutcome) {
        match outcome {
            TaskOutcome::Synced { bytes } => {
                self.synced += 1;
                self.bytes_sent += bytes;
            }
            TaskOutcome::AlreadyPresent => self.skipped_same += 1,
            TaskOutcome::Rejected => self.rejected += 1,
            TaskOutcome::CommitFailed => self.commit_failed += 1,
            TaskOutcome::Failed { .. } => self.failed += 1,
            TaskOutcome::Cancelled => self.cancelled = true,
        }
    }
}

pub struct Supervisor {
    config: Config,
    classifier: Box<dyn Classifier>,
}

impl Supervisor {
    pub fn new(config: Config) -> Self {
        Self::with_classifier(config, Box::new(SniffClassifier))
    }

    pub fn with_classifier(config: Config, classifier: Box<dyn Classifier>) -> Self {
        Self { config, classifier }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Run one pass. Only session setup can fail; everything after that is
    /// logged per file and reflected in the returned stats.
    pub async fn run(&self, cancel: CancellationToken) -> Result<SyncStats> {
        let mut session = SyncSession::from_config(&self.config, cancel.clone())?;
        let walker = Walker::new(&self.config.repertory);
        let builder = TaskBuilder::new(&self.config.repertory);
        let mut stats = SyncStats::default();

        info!("scanning {}", walker.root().display());

        let mut found_files = walker.spawn();
        while let Some(item) = found_files.recv().await {
            if cancel.is_cancelled() {
                info!("stop requested, ending pass");
                stats.cancelled = true;
                break;
            }

            let found = match item {
                Ok(found) => found,
                Err(e) => {
                    warn!("{}", e);
                    stats.errors += 1;
                    continue;
                }
            };
            stats.discovered += 1;

            let path = found.path();
            let content_type = match sniff_file(self.classifier.as_ref(), &path).await {
                Ok(content_type) => content_type,
                Err(e) => {
                    warn!("{}", e);
                    stats.errors += 1;
                    continue;
                }
            };
            if !self.config.allows(&content_type) {
                debug!("excluding {} ({})", path.display(), content_type);
                stats.excluded += 1;
                continue;
            }

            let task = match builder.from_discovered(&found).await {
                Ok(task) => task,
                Err(e) => {
                    warn!("{}", e);
                    stats.errors += 1;
                    continue;
                }
            };

            let outcome = session.sync(&task).await;
            stats.record(outcome);
            if stats.cancelled {
                break;
            }
        }

        info!(
            "pass finished: {} succeeded ({} sent, {} skipped same), {} failed, {} rejected, {} commit failures, {} excluded, {} errors",
            stats.succeeded(),
            stats.synced,
            stats.skipped_same,
            stats.failed,
            stats.rejected,
            stats.commit_failed,
            stats.excluded,
            stats.errors
        );

        Ok(stats)
    }

    /// Run the pass on the runtime and deliver its result exactly once on the
    /// returned channel, whether it completed or was cancelled.
    pub fn spawn(self, cancel: CancellationToken) -> oneshot::Receiver<Result<SyncStats>> {
        let (done_tx, done_rx) = oneshot::channel();
        tokio::spawn(async move {
            let result = self.run(cancel).await;
            let _ = done_tx.send(result);
        });
        done_rx
    }
}
