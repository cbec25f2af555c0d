//! HTTP downloads with retry, checksum verification and the shared cache.

use std::path::{Path, PathBuf};
use std::time::Duration;

use sha2::{Digest, Sha256};
use tempfile::NamedTempFile;
use thiserror::Error;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, warn};

use super::cache::DownloadCache;
use crate::interrupt::{Interrupt, InterruptReason};
use crate::verify::{self, VerifyError};

/// Download behaviour knobs.
#[derive(Debug, Clone)]
pub struct FetchConfig {
  /// Extra attempts after the first one for transient failures.
  pub retries: u32,
  /// Delay before the first retry; doubled on every further attempt.
  pub backoff: Duration,
  /// Whole-request timeout.
  pub timeout: Duration,
  pub user_agent: String,
}

impl Default for FetchConfig {
  fn default() -> Self {
    Self {
      retries: 3,
      backoff: Duration::from_millis(500),
      timeout: Duration::from_secs(300),
      user_agent: format!("buildpkg/{}", env!("CARGO_PKG_VERSION")),
    }
  }
}

#[derive(Debug, Error)]
pub enum FetchError {
  #[error("request to {url} timed out")]
  Timeout { url: String },

  #[error("{url} returned HTTP {status}")]
  Status { url: String, status: u16 },

  #[error("failed to fetch {url}: {message}")]
  Transport { url: String, message: String },

  #[error("hash mismatch for {url}: expected {expected}, got {actual}")]
  HashMismatch {
    url: String,
    expected: String,
    actual: String,
  },

  #[error(transparent)]
  Digest(#[from] VerifyError),

  #[error("failed to write {path}: {source}")]
  Io {
    path: PathBuf,
    #[source]
    source: std::io::Error,
  },

  #[error("download of {url} {reason}")]
  Interrupted { url: String, reason: InterruptReason },
}

impl FetchError {
  /// Failures worth another attempt: transport errors, timeouts, 5xx and 429.
  pub fn is_transient(&self) -> bool {
    match self {
      Self::Timeout { .. } | Self::Transport { .. } => true,
      Self::Status { status, .. } => *status == 429 || (500..=599).contains(status),
      _ => false,
    }
  }

  fn from_reqwest(url: &str, err: reqwest::Error) -> Self {
    if err.is_timeout() {
      Self::Timeout { url: url.to_string() }
    } else {
      Self::Transport {
        url: url.to_string(),
        message: err.to_string(),
      }
    }
  }
}

/// HTTP fetcher shared by every build of an engine.
#[derive(Debug, Clone)]
pub struct Fetcher {
  client: reqwest::Client,
  config: FetchConfig,
  cache: Option<DownloadCache>,
}

impl Fetcher {
  pub fn new(config: FetchConfig, cache: Option<DownloadCache>) -> Result<Self, FetchError> {
    let client = reqwest::Client::builder()
      .user_agent(config.user_agent.clone())
      .timeout(config.timeout)
      .build()
      .map_err(|e| FetchError::Transport {
        url: String::new(),
        message: e.to_string(),
      })?;
    Ok(Self { client, config, cache })
  }

  pub fn config(&self) -> &FetchConfig {
    &self.config
  }

  /// Downloads `url` to `dest`, returning `dest`.
  ///
  /// When `expected_sha256` is given the body is verified before it is moved
  /// into place, and the shared cache is consulted first. `dest` is only ever
  /// replaced atomically, so a failed download leaves it untouched.
  pub async fn download(
    &self,
    url: &str,
    dest: &Path,
    expected_sha256: Option<&str>,
    interrupt: &Interrupt,
  ) -> Result<PathBuf, FetchError> {
    let expected = expected_sha256.map(verify::normalize_digest).transpose()?;

    if let (Some(cache), Some(digest)) = (&self.cache, &expected) {
      match cache.restore(digest, dest) {
        Ok(true) => {
          info!(url = %url, path = %dest.display(), "using cached download");
          return Ok(dest.to_path_buf());
        }
        Ok(false) => {}
        Err(e) => warn!(url = %url, error = %e, "download cache unavailable"),
      }
    }

    info!(url = %url, "fetching URL");
    let mut attempt = 0u32;
    loop {
      let result = tokio::select! {
        result = self.fetch_once(url, dest, expected.as_deref()) => result,
        reason = interrupt.tripped() => Err(FetchError::Interrupted { url: url.to_string(), reason }),
      };
      match result {
        Ok(size) => {
          info!(path = %dest.display(), size, "download complete");
          break;
        }
        Err(err) if err.is_transient() && attempt < self.config.retries => {
          let delay = self.config.backoff.saturating_mul(2u32.saturating_pow(attempt));
          attempt += 1;
          warn!(url = %url, error = %err, attempt, delay_ms = delay.as_millis() as u64, "retrying download");
          tokio::select! {
            _ = tokio::time::sleep(delay) => {}
            reason = interrupt.tripped() => {
              return Err(FetchError::Interrupted { url: url.to_string(), reason });
            }
          }
        }
        Err(err) => return Err(err),
      }
    }

    if let (Some(cache), Some(digest)) = (&self.cache, &expected)
      && let Err(e) = cache.store(digest, dest)
    {
      warn!(url = %url, error = %e, "failed to populate download cache");
    }
    Ok(dest.to_path_buf())
  }

  async fn fetch_once(&self, url: &str, dest: &Path, expected: Option<&str>) -> Result<u64, FetchError> {
    let mut response = self
      .client
      .get(url)
      .send()
      .await
      .map_err(|e| FetchError::from_reqwest(url, e))?;

    let status = response.status();
    if !status.is_success() {
      return Err(FetchError::Status {
        url: url.to_string(),
        status: status.as_u16(),
      });
    }

    let io_err = |source| FetchError::Io {
      path: dest.to_path_buf(),
      source,
    };
    let parent = dest.parent().unwrap_or(Path::new("."));
    tokio::fs::create_dir_all(parent).await.map_err(io_err)?;
    let temp = NamedTempFile::new_in(parent).map_err(io_err)?;
    let mut file = tokio::fs::File::from_std(temp.reopen().map_err(io_err)?);

    let mut hasher = Sha256::new();
    let mut size = 0u64;
    while let Some(chunk) = response.chunk().await.map_err(|e| FetchError::from_reqwest(url, e))? {
      hasher.update(&chunk);
      file.write_all(&chunk).await.map_err(io_err)?;
      size += chunk.len() as u64;
    }
    file.flush().await.map_err(io_err)?;
    file.sync_all().await.map_err(io_err)?;
    drop(file);

    let actual = hex::encode(hasher.finalize());
    if let Some(expected) = expected
      && actual != expected
    {
      return Err(FetchError::HashMismatch {
        url: url.to_string(),
        expected: expected.to_string(),
        actual,
      });
    }
    debug!(url = %url, sha256 = %actual, "verified body");

    temp.persist(dest).map_err(|e| io_err(e.error))?;
    Ok(size)
  }
}

/// Convert a URL to a safe filename.
///
/// Takes the last path component and sanitizes it. Falls back to a hash of
/// the URL if no suitable filename can be extracted.
pub fn url_to_filename(url: &str) -> String {
  let without_query = url.split(['?', '#']).next().unwrap_or(url);
  if let Some(filename) = without_query.rsplit('/').next() {
    let sanitized: String = filename
      .chars()
      .map(|c| {
        if c.is_alphanumeric() || c == '-' || c == '_' || c == '.' {
          c
        } else {
          '_'
        }
      })
      .collect();

    if !sanitized.is_empty() && sanitized != "." && sanitized != ".." {
      return sanitized;
    }
  }

  let mut hasher = Sha256::new();
  hasher.update(url.as_bytes());
  format!("download_{}", &hex::encode(hasher.finalize())[..16])
}
