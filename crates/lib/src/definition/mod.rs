//! Package definitions: where they come from and the validated `INFO` metadata.

mod parse;

use std::collections::BTreeSet;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use parse::parse_info;

use crate::arch::Arch;
use crate::consts::DEFINITION_FILE;

/// Immutable package metadata parsed from a definition's `INFO` table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PackageDefinition {
  pub name: String,
  pub description: Option<String>,
  pub url: Option<String>,
  pub license: Option<String>,
  pub maintainers: Vec<String>,
  pub dev: bool,
  /// Static version. Mutually exclusive with a `VERSION` hook.
  pub version: Option<String>,
  pub provides: BTreeSet<String>,
  /// Supported architectures in declaration order, without duplicates.
  pub arch: Vec<Arch>,
  pub dependencies: Vec<String>,
  pub build_dependencies: Vec<String>,
  pub optional_dependencies: Vec<String>,
  pub conflicts: Vec<String>,
  pub replaces: Vec<String>,
}

impl PackageDefinition {
  pub fn new(name: impl Into<String>) -> Self {
    Self {
      name: name.into(),
      description: None,
      url: None,
      license: None,
      maintainers: Vec::new(),
      dev: false,
      version: None,
      provides: BTreeSet::new(),
      arch: Vec::new(),
      dependencies: Vec::new(),
      build_dependencies: Vec::new(),
      optional_dependencies: Vec::new(),
      conflicts: Vec::new(),
      replaces: Vec::new(),
    }
  }

  pub fn supports(&self, arch: Arch) -> bool {
    self.arch.contains(&arch)
  }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DefinitionError {
  #[error("definition does not declare an INFO table")]
  MissingInfo,

  #[error("INFO must be a table, found {0}")]
  InfoNotTable(String),

  #[error("INFO.name is required")]
  MissingName,

  #[error("INFO.name '{0}' is not a valid package name")]
  InvalidName(String),

  #[error("INFO.version '{0}' is not a valid version")]
  InvalidVersion(String),

  #[error("INFO.{field} must be {expected}, found {found}")]
  WrongType {
    field: String,
    expected: &'static str,
    found: String,
  },

  #[error("INFO has an unknown field '{0}'")]
  UnknownField(String),

  #[error("INFO.{field} must be a sequence of strings")]
  NotASequence { field: String },

  #[error("INFO.arch: {0}")]
  UnknownArch(String),

  #[error("INFO.arch is empty")]
  NoArch,

  #[error("host architecture '{0}' is not supported; declare INFO.arch explicitly")]
  UnsupportedHost(String),

  #[error("global {hook} must be a function, found {found}")]
  HookNotFunction { hook: &'static str, found: String },

  #[error("INFO.version and a VERSION hook are mutually exclusive")]
  VersionConflict,

  #[error("{package} does not support architecture {requested} (declared: {declared})")]
  ArchNotDeclared {
    package: String,
    requested: Arch,
    declared: String,
  },

  #[error("{0} did not resolve a version before PREPARE")]
  VersionRequired(String),

  #[error("failed to read INFO: {0}")]
  Malformed(String),
}

/// Versions are embedded in record file names, so path separators, `..` and
/// a leading dot are refused along with anything outside the usual
/// `[A-Za-z0-9._+~:-]` version alphabet.
pub fn is_valid_version(version: &str) -> bool {
  !version.is_empty()
    && !version.starts_with('.')
    && !version.contains("..")
    && version
      .chars()
      .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '+' | '~' | ':' | '-'))
}

/// Source text of one definition plus where it came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DefinitionSource {
  origin: String,
  text: String,
  dir: Option<PathBuf>,
}

impl DefinitionSource {
  pub fn from_text(origin: impl Into<String>, text: impl Into<String>) -> Self {
    Self {
      origin: origin.into(),
      text: text.into(),
      dir: None,
    }
  }

  /// Reads a `buildpkg.lua` file, or the one inside a directory.
  pub fn from_path(path: &Path) -> io::Result<Self> {
    let file = if path.is_dir() {
      path.join(DEFINITION_FILE)
    } else {
      path.to_path_buf()
    };
    let file = dunce::canonicalize(&file)?;
    let text = fs::read_to_string(&file)?;
    Ok(Self {
      origin: file.display().to_string(),
      dir: file.parent().map(Path::to_path_buf),
      text,
    })
  }

  pub fn origin(&self) -> &str {
    &self.origin
  }

  pub fn text(&self) -> &str {
    &self.text
  }

  /// Directory holding the definition file, when it was read from disk.
  pub fn dir(&self) -> Option<&Path> {
    self.dir.as_deref()
  }
}
