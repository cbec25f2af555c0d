//! Configuration, requests and outcomes of the build orchestrator.

use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use serde::Serialize;
use thiserror::Error;

use super::lifecycle::{BuildMode, Phase};
use super::record::PackageRecord;
use crate::arch::Arch;
use crate::definition::DefinitionSource;
use crate::error::ErrorKind;
use crate::fetch::{FetchConfig, FetchError};
use crate::host::ExecConfig;
use crate::interrupt::CancelToken;
use crate::paths;
use crate::sandbox::{SandboxConfig, SandboxError};
use crate::stage::LinkPolicy;

/// Engine-wide settings.
#[derive(Debug, Clone)]
pub struct EngineConfig {
  /// Maximum number of builds running at once.
  pub parallelism: usize,
  /// Directory holding per-build workspaces.
  pub work_root: PathBuf,
  /// Shared download cache. `None` disables caching.
  pub cache_dir: Option<PathBuf>,
  /// Wall-clock budget for a single phase.
  pub phase_timeout: Option<Duration>,
  /// Keep the workspace of failed builds for inspection.
  pub preserve_failed: bool,
  /// Keep `SRC_DIR` after a successful build.
  pub keep_sources: bool,
  pub link_policy: LinkPolicy,
  pub fetch: FetchConfig,
  pub exec: ExecConfig,
  pub sandbox: SandboxConfig,
}

impl Default for EngineConfig {
  fn default() -> Self {
    Self {
      parallelism: num_cpus(),
      work_root: paths::work_root(),
      cache_dir: Some(paths::download_cache_dir()),
      phase_timeout: Some(Duration::from_secs(3600)),
      preserve_failed: false,
      keep_sources: false,
      link_policy: LinkPolicy::default(),
      fetch: FetchConfig::default(),
      exec: ExecConfig::default(),
      sandbox: SandboxConfig::default(),
    }
  }
}

fn num_cpus() -> usize {
  std::thread::available_parallelism().map(|p| p.get()).unwrap_or(4)
}

/// Which architectures to build.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ArchSelection {
  /// The host architecture.
  #[default]
  Host,
  Arch(Arch),
  /// Every architecture the definition declares.
  All,
}

/// One definition to build.
#[derive(Debug, Clone)]
pub struct BuildRequest {
  pub source: DefinitionSource,
  pub arch: ArchSelection,
  pub mode: BuildMode,
  /// Fail when no version is resolved before `PREPARE`.
  pub require_version: bool,
  pub cancel: CancelToken,
}

impl BuildRequest {
  pub fn new(source: DefinitionSource) -> Self {
    Self {
      source,
      arch: ArchSelection::default(),
      mode: BuildMode::default(),
      require_version: false,
      cancel: CancelToken::new(),
    }
  }

  pub fn arch(mut self, arch: ArchSelection) -> Self {
    self.arch = arch;
    self
  }

  pub fn mode(mut self, mode: BuildMode) -> Self {
    self.mode = mode;
    self
  }

  pub fn require_version(mut self, require: bool) -> Self {
    self.require_version = require;
    self
  }

  pub fn cancel(mut self, cancel: CancelToken) -> Self {
    self.cancel = cancel;
    self
  }
}

/// Result of a version-only run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct VersionReport {
  pub name: String,
  pub arch: Arch,
  pub version: Option<String>,
}

/// Why a build ended in `Failed`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BuildFailure {
  /// Package name, or the definition's origin when `INFO` never loaded.
  pub package: String,
  pub arch: Option<Arch>,
  /// `None` when the failure happened before any phase ran.
  pub phase: Option<Phase>,
  pub kind: ErrorKind,
  pub message: String,
  /// Preserved workspace, if any.
  #[serde(skip_serializing_if = "Option::is_none")]
  pub workspace: Option<PathBuf>,
}

impl fmt::Display for BuildFailure {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{}", self.package)?;
    if let Some(arch) = self.arch {
      write!(f, " [{arch}]")?;
    }
    if let Some(phase) = self.phase {
      write!(f, " {phase}")?;
    }
    write!(f, ": {}: {}", self.kind, self.message)
  }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum BuildOutcome {
  Packaged(PackageRecord),
  Versioned(VersionReport),
  Failed(BuildFailure),
}

impl BuildOutcome {
  pub fn arch(&self) -> Option<Arch> {
    match self {
      BuildOutcome::Packaged(record) => Some(record.arch),
      BuildOutcome::Versioned(report) => Some(report.arch),
      BuildOutcome::Failed(failure) => failure.arch,
    }
  }

  pub fn is_failed(&self) -> bool {
    matches!(self, BuildOutcome::Failed(_))
  }
}

/// Every outcome of one [`BuildRequest`], ordered by architecture.
#[derive(Debug, Clone, Default)]
pub struct BuildReport {
  pub outcomes: Vec<BuildOutcome>,
}

impl BuildReport {
  pub fn is_success(&self) -> bool {
    !self.outcomes.iter().any(BuildOutcome::is_failed)
  }

  pub fn packaged(&self) -> impl Iterator<Item = &PackageRecord> {
    self.outcomes.iter().filter_map(|o| match o {
      BuildOutcome::Packaged(record) => Some(record),
      _ => None,
    })
  }

  pub fn versions(&self) -> impl Iterator<Item = &VersionReport> {
    self.outcomes.iter().filter_map(|o| match o {
      BuildOutcome::Versioned(report) => Some(report),
      _ => None,
    })
  }

  pub fn failures(&self) -> impl Iterator<Item = &BuildFailure> {
    self.outcomes.iter().filter_map(|o| match o {
      BuildOutcome::Failed(failure) => Some(failure),
      _ => None,
    })
  }
}

/// Engine-level failures, as opposed to a build ending in `Failed`.
#[derive(Debug, Error)]
pub enum BuildError {
  #[error("the engine must be created inside a Tokio runtime")]
  NoRuntime,

  #[error("failed to set up HTTP client: {0}")]
  Fetch(#[from] FetchError),

  #[error(transparent)]
  Sandbox(#[from] SandboxError),

  #[error("build task failed: {0}")]
  Join(String),
}

impl BuildError {
  pub fn kind(&self) -> ErrorKind {
    match self {
      BuildError::Sandbox(e) => e.kind(),
      BuildError::Fetch(_) => ErrorKind::Network,
      BuildError::NoRuntime | BuildError::Join(_) => ErrorKind::Runtime,
    }
  }
}
