//! Integrity verifier: SHA-256 digests of files and strings, and checksum checks.

use std::io;
use std::path::{Path, PathBuf};

use thiserror::Error;

use crate::consts::SHA256_HEX_LEN;
use crate::util::hash::{ContentHash, hash_bytes, hash_file};

#[derive(Debug, Error)]
pub enum VerifyError {
  #[error("failed to read {path}: {source}")]
  Read {
    path: PathBuf,
    #[source]
    source: io::Error,
  },

  #[error("checksum mismatch for {path}: expected {expected}, got {actual}")]
  Mismatch {
    path: PathBuf,
    expected: String,
    actual: String,
  },

  #[error("invalid sha256 digest '{0}': expected 64 hexadecimal characters")]
  InvalidDigest(String),
}

/// Lowercases `digest` and checks that it looks like a SHA-256 hex digest.
pub fn normalize_digest(digest: &str) -> Result<String, VerifyError> {
  let digest = digest.trim().to_ascii_lowercase();
  if digest.len() != SHA256_HEX_LEN || !digest.bytes().all(|b| b.is_ascii_hexdigit()) {
    return Err(VerifyError::InvalidDigest(digest));
  }
  Ok(digest)
}

pub fn digest_file(path: &Path) -> Result<ContentHash, VerifyError> {
  hash_file(path).map_err(|source| VerifyError::Read {
    path: path.to_path_buf(),
    source,
  })
}

pub fn digest_str(text: &str) -> ContentHash {
  hash_bytes(text.as_bytes())
}

/// Checks `path` against `expected`, returning the actual digest on success.
pub fn verify_file(path: &Path, expected: &str) -> Result<ContentHash, VerifyError> {
  let expected = normalize_digest(expected)?;
  let actual = digest_file(path)?;
  if actual.0 != expected {
    return Err(VerifyError::Mismatch {
      path: path.to_path_buf(),
      expected,
      actual: actual.0,
    });
  }
  Ok(actual)
}
