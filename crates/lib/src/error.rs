//! Error taxonomy shared by the sandbox, the host API and the orchestrator.
//!
//! Every module keeps its own `thiserror` enum; each of them maps onto one
//! [`ErrorKind`] so failure reports can be classified uniformly.

use std::fmt;

use serde::{Serialize, Serializer};

/// Classification of a build failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
  Parse,
  Definition,
  Capability,
  Network,
  Git,
  Io,
  Archive,
  Format,
  Pattern,
  Timeout,
  Cancelled,
  Runtime,
  EmptyPackage,
}

impl ErrorKind {
  pub fn as_str(&self) -> &'static str {
    match self {
      Self::Parse => "ParseError",
      Self::Definition => "DefinitionError",
      Self::Capability => "CapabilityError",
      Self::Network => "NetworkError",
      Self::Git => "GitError",
      Self::Io => "IOError",
      Self::Archive => "ArchiveError",
      Self::Format => "FormatError",
      Self::Pattern => "PatternError",
      Self::Timeout => "TimeoutError",
      Self::Cancelled => "CancelledError",
      Self::Runtime => "RuntimeError",
      Self::EmptyPackage => "EmptyPackageError",
    }
  }

  /// Whether the failure came from an interrupt rather than the definition itself.
  pub fn is_interrupt(&self) -> bool {
    matches!(self, Self::Timeout | Self::Cancelled)
  }
}

impl fmt::Display for ErrorKind {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.as_str())
  }
}

impl Serialize for ErrorKind {
  fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(self.as_str())
  }
}
