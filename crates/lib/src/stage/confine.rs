//! Path confinement for every filesystem-touching host call.
//!
//! Script-supplied paths are resolved lexically against `SRC_DIR` or
//! `PKG_DIR`, then the deepest existing ancestor is canonicalised so a
//! symlink cannot smuggle a write outside the build directories.

use std::fs;
use std::path::{Component, Path, PathBuf};

use thiserror::Error;

/// Which build directory a relative path is resolved against.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Anchor {
  /// `SRC_DIR`: absolute paths outside the build are rejected.
  Source,
  /// `PKG_DIR`: absolute paths outside the build are install-root paths and
  /// get re-rooted under `PKG_DIR`.
  Package,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfineError {
  #[error("empty path")]
  Empty,

  #[error("path '{path}' escapes the build directories")]
  Escape { path: String },

  #[error("path '{path}' resolves through a symlink outside the build directories")]
  SymlinkEscape { path: String },
}

/// The two roots a build may touch.
#[derive(Debug, Clone)]
pub struct Confinement {
  src_dir: PathBuf,
  pkg_dir: PathBuf,
}

impl Confinement {
  /// Both roots must be absolute and canonical.
  pub fn new(src_dir: impl Into<PathBuf>, pkg_dir: impl Into<PathBuf>) -> Self {
    Self {
      src_dir: src_dir.into(),
      pkg_dir: pkg_dir.into(),
    }
  }

  pub fn src_dir(&self) -> &Path {
    &self.src_dir
  }

  pub fn pkg_dir(&self) -> &Path {
    &self.pkg_dir
  }

  fn root(&self, anchor: Anchor) -> &Path {
    match anchor {
      Anchor::Source => &self.src_dir,
      Anchor::Package => &self.pkg_dir,
    }
  }

  /// Whether `path` lies lexically inside one of the roots.
  pub fn contains(&self, path: &Path) -> bool {
    path.starts_with(&self.src_dir) || path.starts_with(&self.pkg_dir)
  }

  /// Resolves `raw`, following the final component if it is a symlink.
  pub fn resolve(&self, raw: &str, anchor: Anchor) -> Result<PathBuf, ConfineError> {
    let candidate = self.lexical(raw, anchor)?;
    self.check_existing(&candidate, raw)?;
    Ok(candidate)
  }

  /// Resolves `raw` without following the final component. Used for paths
  /// that name a directory entry itself, such as a link to create or replace.
  pub fn resolve_entry(&self, raw: &str, anchor: Anchor) -> Result<PathBuf, ConfineError> {
    let candidate = self.lexical(raw, anchor)?;
    if let Some(parent) = candidate.parent() {
      self.check_existing(parent, raw)?;
    }
    Ok(candidate)
  }

  /// Rejects `path` if its deepest existing ancestor resolves outside the roots.
  pub fn check_existing(&self, path: &Path, raw: &str) -> Result<(), ConfineError> {
    for probe in path.ancestors() {
      let Ok(meta) = probe.symlink_metadata() else {
        continue;
      };
      let resolved = match dunce::canonicalize(probe) {
        Ok(resolved) => resolved,
        Err(_) if meta.file_type().is_symlink() => dangling_target(probe),
        Err(_) => continue,
      };
      if self.contains(&resolved) {
        return Ok(());
      }
      return Err(ConfineError::SymlinkEscape { path: raw.to_string() });
    }
    Ok(())
  }

  fn lexical(&self, raw: &str, anchor: Anchor) -> Result<PathBuf, ConfineError> {
    if raw.is_empty() {
      return Err(ConfineError::Empty);
    }
    let escape = || ConfineError::Escape { path: raw.to_string() };
    let path = Path::new(raw);

    if !path.has_root() {
      return join_within(self.root(anchor), path).ok_or_else(escape);
    }

    let normalized = normalize_absolute(path);
    if self.contains(&normalized) {
      return Ok(normalized);
    }
    match anchor {
      Anchor::Source => Err(escape()),
      Anchor::Package => join_within(&self.pkg_dir, path).ok_or_else(escape),
    }
  }
}

/// Joins `rel` onto `root` lexically. Returns `None` if `rel` climbs above `root`.
/// Root and prefix components of `rel` are ignored, so `/usr/bin` joins as `usr/bin`.
pub fn join_within(root: &Path, rel: &Path) -> Option<PathBuf> {
  let mut out = root.to_path_buf();
  let mut depth = 0usize;
  for component in rel.components() {
    match component {
      Component::Prefix(_) | Component::RootDir | Component::CurDir => {}
      Component::ParentDir => {
        if depth == 0 {
          return None;
        }
        out.pop();
        depth -= 1;
      }
      Component::Normal(part) => {
        out.push(part);
        depth += 1;
      }
    }
  }
  Some(out)
}

/// Folds `.` and `..` out of an absolute path without touching the filesystem.
fn normalize_absolute(path: &Path) -> PathBuf {
  let mut out = PathBuf::new();
  for component in path.components() {
    match component {
      Component::ParentDir => {
        out.pop();
      }
      Component::CurDir => {}
      other => out.push(other.as_os_str()),
    }
  }
  out
}

fn dangling_target(link: &Path) -> PathBuf {
  match fs::read_link(link) {
    Ok(target) if target.has_root() => normalize_absolute(&target),
    Ok(target) => {
      let parent = link.parent().unwrap_or(link);
      normalize_absolute(&parent.join(target))
    }
    Err(_) => link.to_path_buf(),
  }
}
