//! Filesystem stager: confined file load/save, copy and link.
//!
//! Every operation takes the raw, script-supplied path strings and resolves
//! them through [`Confinement`] before touching the disk.

pub mod confine;

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::debug;
use walkdir::WalkDir;

pub use confine::{Anchor, ConfineError, Confinement};

/// What `link` does when the link path already exists.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LinkPolicy {
  #[default]
  Fail,
  Overwrite,
}

#[derive(Debug, Error)]
pub enum StageError {
  #[error(transparent)]
  Confine(#[from] ConfineError),

  #[error("failed to {op} '{path}': {source}")]
  Io {
    op: &'static str,
    path: PathBuf,
    #[source]
    source: io::Error,
  },

  #[error("'{0}' is not valid UTF-8")]
  NotUtf8(PathBuf),

  #[error("'{0}' is neither a file, a directory nor a symlink")]
  UnsupportedSource(PathBuf),

  #[error("link path '{0}' already exists")]
  LinkExists(PathBuf),

  #[error("link target '{target}' climbs above the package root")]
  LinkTargetEscape { target: String },
}

impl StageError {
  fn io<'a>(op: &'static str, path: &'a Path) -> impl FnOnce(io::Error) -> Self + 'a {
    move |source| Self::Io {
      op,
      path: path.to_path_buf(),
      source,
    }
  }

  /// Whether this is a confinement violation rather than an I/O failure.
  pub fn is_capability(&self) -> bool {
    matches!(self, Self::Confine(_) | Self::LinkTargetEscape { .. })
  }
}

/// Reads a UTF-8 text file. Relative paths resolve against `SRC_DIR`.
pub fn load_file(confine: &Confinement, raw: &str) -> Result<String, StageError> {
  let path = confine.resolve(raw, Anchor::Source)?;
  let bytes = fs::read(&path).map_err(StageError::io("read", &path))?;
  String::from_utf8(bytes).map_err(|_| StageError::NotUtf8(path))
}

/// Writes `contents`, creating parent directories. Relative paths resolve
/// against `SRC_DIR`; install-root paths are not accepted here.
pub fn save_file(confine: &Confinement, raw: &str, contents: &[u8]) -> Result<PathBuf, StageError> {
  let path = confine.resolve(raw, Anchor::Source)?;
  if let Some(parent) = path.parent() {
    fs::create_dir_all(parent).map_err(StageError::io("create directory", parent))?;
  }
  fs::write(&path, contents).map_err(StageError::io("write", &path))?;
  debug!(path = %path.display(), bytes = contents.len(), "saved file");
  Ok(path)
}

/// Copies a file or directory tree from the source side into the package.
///
/// `source` resolves against `SRC_DIR`, `dest` against `PKG_DIR`. Copying a
/// file onto an existing directory places it inside that directory; copying
/// a directory merges its contents into `dest`. Permission bits are kept and
/// symlinks are recreated rather than followed.
pub fn copy(confine: &Confinement, source: &str, dest: &str) -> Result<PathBuf, StageError> {
  let from = confine.resolve(source, Anchor::Source)?;
  let mut to = confine.resolve(dest, Anchor::Package)?;

  let meta = fs::symlink_metadata(&from).map_err(StageError::io("stat", &from))?;
  if meta.is_dir() {
    copy_tree(confine, &from, &to)?;
  } else {
    if to.is_dir()
      && let Some(name) = from.file_name()
    {
      to = to.join(name);
      confine.check_existing(&to, dest)?;
    }
    copy_entry(&from, &to, &meta)?;
  }
  debug!(from = %from.display(), to = %to.display(), "copied");
  Ok(to)
}

fn copy_tree(confine: &Confinement, from: &Path, to: &Path) -> Result<(), StageError> {
  for entry in WalkDir::new(from).follow_links(false).sort_by_file_name() {
    let entry = entry.map_err(|e| StageError::Io {
      op: "walk",
      path: from.to_path_buf(),
      source: e.into(),
    })?;
    let rel = entry.path().strip_prefix(from).unwrap_or(entry.path());
    let target = to.join(rel);
    confine.check_existing(&target, &target.to_string_lossy())?;
    let meta = entry
      .path()
      .symlink_metadata()
      .map_err(StageError::io("stat", entry.path()))?;
    copy_entry(entry.path(), &target, &meta)?;
  }
  Ok(())
}

fn copy_entry(from: &Path, to: &Path, meta: &fs::Metadata) -> Result<(), StageError> {
  let file_type = meta.file_type();
  if file_type.is_dir() {
    fs::create_dir_all(to).map_err(StageError::io("create directory", to))?;
    return Ok(());
  }

  if let Some(parent) = to.parent() {
    fs::create_dir_all(parent).map_err(StageError::io("create directory", parent))?;
  }

  if file_type.is_symlink() {
    let target = fs::read_link(from).map_err(StageError::io("read link", from))?;
    remove_existing(to)?;
    std::os::unix::fs::symlink(&target, to).map_err(StageError::io("create symlink", to))?;
  } else if file_type.is_file() {
    // fs::copy carries the permission bits over.
    fs::copy(from, to).map_err(StageError::io("copy", to))?;
  } else {
    return Err(StageError::UnsupportedSource(from.to_path_buf()));
  }
  Ok(())
}

fn remove_existing(path: &Path) -> Result<(), StageError> {
  match fs::symlink_metadata(path) {
    Ok(meta) if meta.is_dir() => Err(StageError::LinkExists(path.to_path_buf())),
    Ok(_) => fs::remove_file(path).map_err(StageError::io("remove", path)),
    Err(_) => Ok(()),
  }
}

/// Creates a symlink at `link_path` (inside the package) pointing at `target`.
///
/// `target` is stored verbatim; it usually names an install-time location
/// such as `/usr/lib/zig/zig`. Relative targets may not climb above the
/// package root.
pub fn link(confine: &Confinement, target: &str, link_path: &str, policy: LinkPolicy) -> Result<PathBuf, StageError> {
  let link = confine.resolve_entry(link_path, Anchor::Package)?;

  let target_path = Path::new(target);
  if !target_path.has_root() {
    let parent_rel = link
      .parent()
      .and_then(|parent| parent.strip_prefix(confine.pkg_dir()).ok())
      .unwrap_or(Path::new(""));
    if confine::join_within(Path::new(""), &parent_rel.join(target_path)).is_none() {
      return Err(StageError::LinkTargetEscape {
        target: target.to_string(),
      });
    }
  }

  if fs::symlink_metadata(&link).is_ok() {
    match policy {
      LinkPolicy::Fail => return Err(StageError::LinkExists(link)),
      LinkPolicy::Overwrite => remove_existing(&link)?,
    }
  }

  if let Some(parent) = link.parent() {
    fs::create_dir_all(parent).map_err(StageError::io("create directory", parent))?;
  }
  std::os::unix::fs::symlink(target_path, &link).map_err(StageError::io("create symlink", &link))?;
  debug!(link = %link.display(), target, "linked");
  Ok(link)
}
