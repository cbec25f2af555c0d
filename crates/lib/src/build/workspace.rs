//! Per-build directories under the work root.
//!
//! Every (definition × arch) build gets `work_root/<name>-<arch>-<id>/` with
//! `src/` and `pkg/` inside. The id is fresh per build, so concurrent builds of
//! the same package never share a directory.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use super::BuildContext;
use crate::arch::Arch;
use crate::consts::WORKSPACE_ID_LEN;

const SRC_DIR_NAME: &str = "src";
const PKG_DIR_NAME: &str = "pkg";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Workspace {
  root: PathBuf,
  src_dir: PathBuf,
  pkg_dir: PathBuf,
}

impl Workspace {
  /// Creates a fresh workspace. The returned paths are canonical.
  pub fn create(work_root: &Path, name: &str, arch: Arch) -> io::Result<Self> {
    fs::create_dir_all(work_root)?;
    let work_root = dunce::canonicalize(work_root)?;

    let root = tempfile::Builder::new()
      .prefix(&format!("{name}-{arch}-"))
      .rand_bytes(WORKSPACE_ID_LEN)
      .tempdir_in(&work_root)?
      .keep();

    let src_dir = root.join(SRC_DIR_NAME);
    let pkg_dir = root.join(PKG_DIR_NAME);
    fs::create_dir(&src_dir)?;
    fs::create_dir(&pkg_dir)?;
    debug!(path = %root.display(), "created workspace");
    Ok(Self { root, src_dir, pkg_dir })
  }

  pub fn root(&self) -> &Path {
    &self.root
  }

  pub fn src_dir(&self) -> &Path {
    &self.src_dir
  }

  pub fn pkg_dir(&self) -> &Path {
    &self.pkg_dir
  }

  pub fn context(&self, arch: Arch) -> BuildContext {
    BuildContext::new(arch, &self.src_dir, &self.pkg_dir)
  }

  /// Whether `pkg/` holds nothing at all.
  pub fn is_package_empty(&self) -> io::Result<bool> {
    Ok(fs::read_dir(&self.pkg_dir)?.next().is_none())
  }

  pub fn remove(&self) {
    remove_tree(&self.root);
  }

  pub fn remove_sources(&self) {
    remove_tree(&self.src_dir);
  }
}

fn remove_tree(path: &Path) {
  match fs::remove_dir_all(path) {
    Ok(()) => debug!(path = %path.display(), "removed"),
    Err(e) if e.kind() == io::ErrorKind::NotFound => {}
    Err(e) => warn!(path = %path.display(), error = %e, "failed to remove build directory"),
  }
}
