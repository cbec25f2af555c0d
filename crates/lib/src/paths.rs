//! Default locations for build workspaces and the download cache.

use std::path::PathBuf;

use crate::consts::{APP_NAME, CACHE_DIR_ENV, WORK_DIR_ENV};

/// Returns the user's home directory, falling back to the temp dir when `HOME` is unset
pub fn home_dir() -> PathBuf {
  std::env::var_os("HOME")
    .map(PathBuf::from)
    .unwrap_or_else(std::env::temp_dir)
}

/// Returns the directory for data files for the application
pub fn data_dir() -> PathBuf {
  let data_home = std::env::var("XDG_DATA_HOME")
    .map(PathBuf::from)
    .unwrap_or_else(|_| home_dir().join(".local").join("share"));
  data_home.join(APP_NAME)
}

/// Returns the directory for cache files for the application
pub fn cache_dir() -> PathBuf {
  let cache_home = std::env::var("XDG_CACHE_HOME")
    .map(PathBuf::from)
    .unwrap_or_else(|_| home_dir().join(".cache"));
  cache_home.join(APP_NAME)
}

/// Directory holding one subdirectory per build.
pub fn work_root() -> PathBuf {
  std::env::var_os(WORK_DIR_ENV)
    .map(PathBuf::from)
    .unwrap_or_else(|| data_dir().join("builds"))
}

/// Shared, digest-keyed download cache.
pub fn download_cache_dir() -> PathBuf {
  std::env::var_os(CACHE_DIR_ENV)
    .map(PathBuf::from)
    .unwrap_or_else(|| cache_dir().join("downloads"))
}
