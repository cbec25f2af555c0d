//! Package records: what the engine hands to the package database and the
//! archive writer after a successful build.

use std::collections::BTreeSet;
use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use walkdir::WalkDir;

use crate::arch::Arch;
use crate::definition::PackageDefinition;
use crate::util::hash::{DirHashError, hash_directory, hash_file};

#[derive(Debug, Error)]
pub enum RecordError {
  #[error("failed to walk package tree: {message}")]
  Walk { message: String },

  #[error("failed to read {path}: {source}")]
  Read {
    path: PathBuf,
    #[source]
    source: std::io::Error,
  },

  #[error(transparent)]
  Hash(#[from] DirHashError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FileKind {
  File,
  Dir,
  Symlink,
}

/// One entry of the package tree, rooted at `PKG_DIR`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileEntry {
  /// `/`-separated path relative to the package root.
  pub path: String,
  pub kind: FileKind,
  pub mode: u32,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub size: Option<u64>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub sha256: Option<String>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub target: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PackageRecord {
  pub name: String,
  pub version: String,
  pub arch: Arch,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub description: Option<String>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub url: Option<String>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub license: Option<String>,
  pub maintainers: Vec<String>,
  pub dev: bool,
  pub provides: BTreeSet<String>,
  pub dependencies: Vec<String>,
  pub build_dependencies: Vec<String>,
  pub optional_dependencies: Vec<String>,
  pub conflicts: Vec<String>,
  pub replaces: Vec<String>,
  pub pkg_dir: PathBuf,
  pub files: Vec<FileEntry>,
  pub tree_sha256: String,
}

impl PackageRecord {
  /// Builds the record for a staged tree.
  pub fn collect(definition: &PackageDefinition, version: &str, arch: Arch, pkg_dir: &Path) -> Result<Self, RecordError> {
    Ok(Self {
      name: definition.name.clone(),
      version: version.to_string(),
      arch,
      description: definition.description.clone(),
      url: definition.url.clone(),
      license: definition.license.clone(),
      maintainers: definition.maintainers.clone(),
      dev: definition.dev,
      provides: definition.provides.clone(),
      dependencies: definition.dependencies.clone(),
      build_dependencies: definition.build_dependencies.clone(),
      optional_dependencies: definition.optional_dependencies.clone(),
      conflicts: definition.conflicts.clone(),
      replaces: definition.replaces.clone(),
      pkg_dir: pkg_dir.to_path_buf(),
      files: manifest(pkg_dir)?,
      tree_sha256: hash_directory(pkg_dir)?.0,
    })
  }

  /// `<name>-<version>-<arch>.json`
  pub fn file_name(&self) -> String {
    format!("{}-{}-{}.json", self.name, self.version, self.arch)
  }
}

fn manifest(root: &Path) -> Result<Vec<FileEntry>, RecordError> {
  let mut files = Vec::new();
  for entry in WalkDir::new(root).min_depth(1).sort_by_file_name() {
    let entry = entry.map_err(|e| RecordError::Walk { message: e.to_string() })?;
    let path = entry.path();
    let read_err = |source| RecordError::Read {
      path: path.to_path_buf(),
      source,
    };
    let meta = entry.metadata().map_err(|e| RecordError::Walk { message: e.to_string() })?;
    let rel = path
      .strip_prefix(root)
      .unwrap_or(path)
      .components()
      .map(|c| c.as_os_str().to_string_lossy())
      .collect::<Vec<_>>()
      .join("/");

    let file_type = entry.file_type();
    let (kind, size, sha256, target) = if file_type.is_symlink() {
      let target = fs::read_link(path).map_err(read_err)?;
      (FileKind::Symlink, None, None, Some(target.to_string_lossy().into_owned()))
    } else if file_type.is_dir() {
      (FileKind::Dir, None, None, None)
    } else if file_type.is_file() {
      let digest = hash_file(path).map_err(read_err)?;
      (FileKind::File, Some(meta.len()), Some(digest.0), None)
    } else {
      continue;
    };

    files.push(FileEntry {
      path: rel,
      kind,
      mode: meta.permissions().mode() & 0o7777,
      size,
      sha256,
      target,
    });
  }
  Ok(files)
}
