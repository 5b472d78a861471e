//! Content-addressed transfer tasks.
//!
//! A [`Task`] names the remote object by directory and content hash, never by
//! the file stem, so identical bytes in one directory collapse to a single
//! remote object.

use crate::error::{Result, SyncError};
use crate::scan::DiscoveredFile;
use md5::{Digest, Md5};
use std::ffi::OsStr;
use std::io;
use std::path::{Component, Path, PathBuf};
use tokio::fs::File;
use tokio::io::AsyncReadExt;

/// Read buffer for hashing file content
const HASH_BUF_SIZE: usize = 64 * 1024;

/// One file to deliver. Immutable once built.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Task {
    /// Absolute local path, exactly as found on disk
    pub file: PathBuf,

    /// Original filename (lossy UTF-8 for names that are not valid Unicode)
    pub name: String,

    /// Byte length at discovery time
    pub size: u64,

    /// MD5 hex digest of the full content
    pub content_hash: String,

    /// `/`-separated path from the root to the parent directory ("" at root)
    pub relative_path: String,

    /// Filename without extension; the remote's logical identifier
    pub id: String,

    /// `relative_path/content_hash+extension`
    pub report_id: String,
}

impl Task {
    /// Header line announcing this task on the wire.
    pub fn header(&self) -> String {
        format!(
            "{}@{}@{}@{}",
            self.report_id, self.size, self.content_hash, self.relative_path
        )
    }
}

/// Builds [`Task`]s for files below a fixed root.
#[derive(Debug, Clone)]
pub struct TaskBuilder {
    root: PathBuf,
}

impl TaskBuilder {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub async fn from_discovered(&self, found: &DiscoveredFile) -> Result<Task> {
        self.build(&found.dir, &found.name).await
    }

    pub async fn build(&self, dir: &Path, name: impl AsRef<OsStr>) -> Result<Task> {
        let file = dir.join(name.as_ref());
        let name = name.as_ref().to_string_lossy();
        let task_error = |source| SyncError::TaskBuild {
            path: file.clone(),
            source,
        };

        let meta = tokio::fs::metadata(&file).await.map_err(task_error)?;
        if !meta.is_file() {
            return Err(task_error(io::Error::new(
                io::ErrorKind::InvalidInput,
                "not a regular file",
            )));
        }

        let content_hash = hash_file(&file).await.map_err(task_error)?;
        let relative_path = relative_dir(&self.root, dir).map_err(task_error)?;
        let (id, ext) = split_extension(&name);

        let object = format!("{}{}", content_hash, ext);
        let report_id = if relative_path.is_empty() {
            object
        } else {
            format!("{}/{}", relative_path, object)
        };

        Ok(Task {
            file,
            name: name.to_string(),
            size: meta.len(),
            content_hash,
            relative_path,
            id: id.to_string(),
            report_id,
        })
    }
}

/// Split `name` at its last `.`; the extension keeps the dot.
pub fn split_extension(name: &str) -> (&str, &str) {
    match name.rfind('.') {
        Some(pos) => name.split_at(pos),
        None => (name, ""),
    }
}

/// Normalized `/`-separated path of `dir` below `root`.
fn relative_dir(root: &Path, dir: &Path) -> io::Result<String> {
    let rel = dir.strip_prefix(root).map_err(|_| {
        io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("{} is outside {}", dir.display(), root.display()),
        )
    })?;

    let parts: Vec<_> = rel
        .components()
        .filter_map(|c| match c {
            Component::Normal(part) => Some(part.to_string_lossy()),
            _ => None,
        })
        .collect();
    Ok(parts.join("/"))
}

/// MD5 of the full file content as lowercase hex.
pub async fn hash_file(path: &Path) -> io::Result<String> {
    let mut file = File::open(path).await?;
    let mut hasher = Md5::new();
    let mut buf = vec![0u8; HASH_BUF_SIZE];

    loop {
        let n = file.read(&mut buf).await?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }

    Ok(hex::encode(hasher.finalize()))
}

pub fn md5_hex(data: &[u8]) -> String {
    hex::encode(Md5::digest(data))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    const HI_MD5: &str = "49f68a5c8493ec2c0bf489821c21fc3b";

    #[test]
    fn test_split_extension() {
        assert_eq!(split_extension("b.txt"), ("b", ".txt"));
        assert_eq!(split_extension("archive.tar.gz"), ("archive.tar", ".gz"));
        assert_eq!(split_extension("README"), ("README", ""));
        assert_eq!(split_extension(".bashrc"), ("", ".bashrc"));
    }

    #[test]
    fn test_md5_hex() {
        assert_eq!(md5_hex(b"hi"), HI_MD5);
    }

    #[tokio::test]
    async fn test_build_nested_task() {
        let temp = TempDir::new().unwrap();
        let dir = temp.path().join("a");
        fs::create_dir(&dir).unwrap();
        fs::write(dir.join("b.txt"), "hi").unwrap();

        let task = TaskBuilder::new(temp.path())
            .build(&dir, "b.txt")
            .await
            .unwrap();

        assert_eq!(task.file, dir.join("b.txt"));
        assert_eq!(task.name, "b.txt");
        assert_eq!(task.size, 2);
        assert_eq!(task.content_hash, HI_MD5);
        assert_eq!(task.relative_path, "a");
        assert_eq!(task.id, "b");
        assert_eq!(task.report_id, format!("a/{}.txt", HI_MD5));
        assert_eq!(
            task.header(),
            format!("a/{}.txt@2@{}@a", HI_MD5, HI_MD5)
        );
    }

    #[tokio::test]
    async fn test_build_root_level_task() {
        let temp = TempDir::new().unwrap();
        fs::write(temp.path().join("c.jpg"), "hi").unwrap();

        let task = TaskBuilder::new(temp.path())
            .build(temp.path(), "c.jpg")
            .await
            .unwrap();

        assert_eq!(task.relative_path, "");
        assert_eq!(task.report_id, format!("{}.jpg", HI_MD5));
        assert!(task.header().ends_with('@'));
    }

    #[tokio::test]
    async fn test_deep_relative_path() {
        let temp = TempDir::new().unwrap();
        let dir = temp.path().join("x/y/z");
        fs::create_dir_all(&dir).unwrap();
        fs::write(dir.join("f.bin"), [1u8, 2, 3]).unwrap();

        let task = TaskBuilder::new(temp.path())
            .build(&dir, "f.bin")
            .await
            .unwrap();

        assert_eq!(task.relative_path, "x/y/z");
        assert!(task.report_id.starts_with("x/y/z/"));
    }

    #[tokio::test]
    async fn test_identical_content_shares_report_id() {
        let temp = TempDir::new().unwrap();
        let dir = temp.path().join("photos");
        fs::create_dir(&dir).unwrap();
        fs::write(dir.join("first.png"), "same bytes").unwrap();
        fs::write(dir.join("second.png"), "same bytes").unwrap();

        let builder = TaskBuilder::new(temp.path());
        let first = builder.build(&dir, "first.png").await.unwrap();
        let second = builder.build(&dir, "second.png").await.unwrap();

        assert_eq!(first.report_id, second.report_id);
        assert_ne!(first.id, second.id);
    }

    #[tokio::test]
    async fn test_missing_file_is_task_build_error() {
        let temp = TempDir::new().unwrap();
        let err = TaskBuilder::new(temp.path())
            .build(temp.path(), "vanished.txt")
            .await
            .unwrap_err();

        assert!(matches!(err, SyncError::TaskBuild { .. }));
    }

    #[tokio::test]
    async fn test_from_discovered() {
        let temp = TempDir::new().unwrap();
        fs::write(temp.path().join("d.txt"), "hi").unwrap();

        let found = DiscoveredFile {
            dir: temp.path().to_path_buf(),
            name: "d.txt".into(),
            size: 2,
        };
        let task = TaskBuilder::new(temp.path())
            .from_discovered(&found)
            .await
            .unwrap();
        assert_eq!(task.id, "d");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_non_utf8_name_reads_real_file() {
        use std::os::unix::ffi::OsStrExt;

        let temp = TempDir::new().unwrap();
        let name = OsStr::from_bytes(b"caf\xe9.txt");
        if fs::write(temp.path().join(name), "hi").is_err() {
            return;
        }

        let found = DiscoveredFile {
            dir: temp.path().to_path_buf(),
            name: name.to_os_string(),
            size: 2,
        };
        let task = TaskBuilder::new(temp.path())
            .from_discovered(&found)
            .await
            .unwrap();

        assert_eq!(task.file, temp.path().join(name));
        assert_eq!(task.content_hash, HI_MD5);
        assert_eq!(task.id, "caf\u{FFFD}");
        assert_eq!(task.report_id, format!("{}.txt", HI_MD5));
    }
}
