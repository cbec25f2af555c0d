//! Digest-keyed download cache shared by concurrent builds.
//!
//! Entries live at `<root>/sha256/<digest>`. Writers and readers of one key
//! serialise on an advisory lock at `<root>/locks/<digest>.lock`; entries are
//! published with a temp file and an atomic rename.

use std::fs::{self, File, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};

use tempfile::NamedTempFile;
use tracing::{debug, warn};

use crate::util::hash::hash_file;

#[derive(Debug, Clone)]
pub struct DownloadCache {
  root: PathBuf,
}

/// Exclusive advisory lock on one cache key, released on drop.
struct KeyLock {
  _file: File,
}

impl DownloadCache {
  pub fn new(root: impl Into<PathBuf>) -> Self {
    Self { root: root.into() }
  }

  pub fn root(&self) -> &Path {
    &self.root
  }

  fn entry_path(&self, digest: &str) -> PathBuf {
    self.root.join("sha256").join(digest)
  }

  fn lock(&self, digest: &str) -> io::Result<KeyLock> {
    let dir = self.root.join("locks");
    fs::create_dir_all(&dir)?;
    let file = OpenOptions::new()
      .read(true)
      .write(true)
      .create(true)
      .truncate(false)
      .open(dir.join(format!("{digest}.lock")))?;
    lock_exclusive(&file)?;
    Ok(KeyLock { _file: file })
  }

  /// Copies the cached entry for `digest` to `dest`. Returns `false` on a miss.
  ///
  /// A corrupted entry is evicted and reported as a miss.
  pub fn restore(&self, digest: &str, dest: &Path) -> io::Result<bool> {
    let entry = self.entry_path(digest);
    if !entry.exists() {
      return Ok(false);
    }
    let _lock = self.lock(digest)?;

    let actual = hash_file(&entry)?;
    if actual.0 != digest {
      warn!(entry = %entry.display(), actual = %actual, "evicting corrupted cache entry");
      fs::remove_file(&entry)?;
      return Ok(false);
    }

    let parent = dest.parent().unwrap_or(Path::new("."));
    fs::create_dir_all(parent)?;
    let temp = NamedTempFile::new_in(parent)?;
    fs::copy(&entry, temp.path())?;
    temp.persist(dest).map_err(|e| e.error)?;
    debug!(digest, dest = %dest.display(), "restored from download cache");
    Ok(true)
  }

  /// Publishes `source` under `digest` unless an entry already exists.
  pub fn store(&self, digest: &str, source: &Path) -> io::Result<()> {
    let _lock = self.lock(digest)?;
    let entry = self.entry_path(digest);
    if entry.exists() {
      return Ok(());
    }
    let parent = entry.parent().unwrap_or(&self.root);
    fs::create_dir_all(parent)?;
    let temp = NamedTempFile::new_in(parent)?;
    fs::copy(source, temp.path())?;
    temp.persist(&entry).map_err(|e| e.error)?;
    debug!(digest, "stored in download cache");
    Ok(())
  }
}

#[cfg(unix)]
fn lock_exclusive(file: &File) -> io::Result<()> {
  use rustix::fs::{FlockOperation, flock};
  use std::os::unix::io::AsFd;

  flock(file.as_fd(), FlockOperation::LockExclusive).map_err(|e| io::Error::from_raw_os_error(e.raw_os_error()))
}

#[cfg(not(unix))]
fn lock_exclusive(_file: &File) -> io::Result<()> {
  Ok(())
}
