use std::path::{Path, PathBuf};

use crate::arch::Arch;
use crate::stage::Confinement;

/// Per-build, per-architecture state handed to every hook invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildContext {
  arch: Arch,
  src_dir: PathBuf,
  pkg_dir: PathBuf,
  version: Option<String>,
}

impl BuildContext {
  /// `src_dir` and `pkg_dir` must be absolute, canonical and distinct.
  pub fn new(arch: Arch, src_dir: impl Into<PathBuf>, pkg_dir: impl Into<PathBuf>) -> Self {
    Self {
      arch,
      src_dir: src_dir.into(),
      pkg_dir: pkg_dir.into(),
      version: None,
    }
  }

  pub fn arch(&self) -> Arch {
    self.arch
  }

  pub fn src_dir(&self) -> &Path {
    &self.src_dir
  }

  pub fn pkg_dir(&self) -> &Path {
    &self.pkg_dir
  }

  /// Resolved version, `None` until `VERSION` ran or a static version was applied.
  pub fn version(&self) -> Option<&str> {
    self.version.as_deref()
  }

  pub fn set_version(&mut self, version: impl Into<String>) {
    self.version = Some(version.into());
  }

  pub fn confinement(&self) -> Confinement {
    Confinement::new(&self.src_dir, &self.pkg_dir)
  }
}
