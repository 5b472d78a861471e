//! Directory walker for the repertory.
//!
//! Yields every regular, non-empty file below the root. A directory that
//! cannot be listed produces one error item and is not descended into; the
//! rest of the tree is still visited.

use crate::error::{Result, SyncError};
use std::ffi::OsString;
use std::io;
use std::path::{Path, PathBuf};
use tokio::sync::mpsc;

/// Discovered files buffered ahead of the pass
pub const WALK_CHANNEL_SIZE: usize = 256;

/// A regular file found during the walk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscoveredFile {
    /// Directory containing the file
    pub dir: PathBuf,
    /// File name within `dir`, as stored on disk
    pub name: OsString,
    /// Size at discovery time (never zero)
    pub size: u64,
}

impl DiscoveredFile {
    pub fn path(&self) -> PathBuf {
        self.dir.join(&self.name)
    }
}

/// Walks a root directory. Each call to [`Walker::iter`] starts a fresh,
/// lazy traversal.
pub struct Walker {
    root: PathBuf,
}

impl Walker {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn iter(&self) -> WalkIter {
        // Every file counts: no hidden-file, .gitignore or .ignore filtering.
        let walk = ignore::WalkBuilder::new(&self.root)
            .standard_filters(false)
            .follow_links(false)
            .build();
        WalkIter { walk }
    }

    /// Run a fresh traversal on the blocking pool and hand its items over a
    /// bounded channel. Dropping the receiver stops the walk at the next item.
    pub fn spawn(&self) -> mpsc::Receiver<Result<DiscoveredFile>> {
        let (tx, rx) = mpsc::channel(WALK_CHANNEL_SIZE);
        let walk = self.iter();
        // readdir and stat block; keep them off the runtime workers
        tokio::task::spawn_blocking(move || {
            for item in walk {
                if tx.blocking_send(item).is_err() {
                    break;
                }
            }
        });
        rx
    }
}

pub struct WalkIter {
    walk: ignore::Walk,
}

impl Iterator for WalkIter {
    type Item = Result<DiscoveredFile>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let entry = match self.walk.next()? {
                Ok(entry) => entry,
                Err(err) => return Some(Err(scan_error(err))),
            };

            if !entry.file_type().is_some_and(|ft| ft.is_file()) {
                continue;
            }

            let size = match entry.metadata() {
                Ok(meta) => meta.len(),
                Err(err) => return Some(Err(scan_error(err))),
            };
            if size == 0 {
                continue;
            }

            let path = entry.path();
            let (Some(dir), Some(name)) = (path.parent(), path.file_name()) else {
                continue;
            };

            return Some(Ok(DiscoveredFile {
                dir: dir.to_path_buf(),
                name: name.to_os_string(),
                size,
            }));
        }
    }
}

fn error_path(err: &ignore::Error) -> Option<&Path> {
    match err {
        ignore::Error::WithPath { path, .. } => Some(path.as_path()),
        ignore::Error::WithDepth { err, .. } | ignore::Error::WithLineNumber { err, .. } => {
            error_path(err)
        }
        ignore::Error::Loop { child, .. } => Some(child.as_path()),
        _ => None,
    }
}

fn scan_error(err: ignore::Error) -> SyncError {
    let path = error_path(&err).map(Path::to_path_buf).unwrap_or_default();
    let source = err
        .into_io_error()
        .unwrap_or_else(|| io::Error::new(io::ErrorKind::Other, "directory walk failed"));
    SyncError::Scan { path, source }
}
