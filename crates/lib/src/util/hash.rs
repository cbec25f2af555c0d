//! SHA-256 digests of byte strings, files and staged package trees.

use std::fmt;
use std::fs::{self, File};
use std::io;
use std::path::Path;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use walkdir::WalkDir;

/// A full 64-character SHA-256 digest in lowercase hex.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ContentHash(pub String);

impl ContentHash {
  fn from_hasher(hasher: Sha256) -> Self {
    Self(hex::encode(hasher.finalize()))
  }

  pub fn as_str(&self) -> &str {
    &self.0
  }
}

impl fmt::Display for ContentHash {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(&self.0)
  }
}

#[derive(Debug, thiserror::Error)]
pub enum DirHashError {
  #[error("failed to walk directory: {message}")]
  WalkDir { message: String },

  #[error("failed to read file {path}: {source}")]
  ReadFile {
    path: String,
    #[source]
    source: io::Error,
  },

  #[error("failed to read symlink {path}: {source}")]
  ReadSymlink {
    path: String,
    #[source]
    source: io::Error,
  },
}

/// Digest of a whole tree: relative paths, file contents and symlink targets.
///
/// Timestamps and permission bits are not covered. Sockets and device nodes
/// are skipped. Each entry contributes one `kind:path:payload` line, in walk
/// order with siblings sorted by name.
pub fn hash_directory(root: &Path) -> Result<ContentHash, DirHashError> {
  let mut tree = Sha256::new();

  for entry in WalkDir::new(root).min_depth(1).sort_by_file_name() {
    let entry = entry.map_err(|e| DirHashError::WalkDir { message: e.to_string() })?;
    let path = entry.path();
    let rel = path.strip_prefix(root).unwrap_or(path).to_string_lossy();
    let kind = entry.file_type();

    let line = if kind.is_dir() {
      format!("D:{rel}")
    } else if kind.is_symlink() {
      let target = fs::read_link(path).map_err(|source| DirHashError::ReadSymlink {
        path: path.display().to_string(),
        source,
      })?;
      format!("L:{rel}:{}", hash_bytes(target.as_os_str().as_encoded_bytes()))
    } else if kind.is_file() {
      let digest = hash_file(path).map_err(|source| DirHashError::ReadFile {
        path: path.display().to_string(),
        source,
      })?;
      format!("F:{rel}:{digest}")
    } else {
      continue;
    };

    tree.update(line.as_bytes());
    tree.update(b"\n");
  }

  Ok(ContentHash::from_hasher(tree))
}

/// Streams a file through SHA-256.
pub fn hash_file(path: &Path) -> io::Result<ContentHash> {
  let mut file = File::open(path)?;
  let mut hasher = Sha256::new();
  io::copy(&mut file, &mut hasher)?;
  Ok(ContentHash::from_hasher(hasher))
}

pub fn hash_bytes(data: &[u8]) -> ContentHash {
  ContentHash::from_hasher(Sha256::new_with_prefix(data))
}
