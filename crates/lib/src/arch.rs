use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Target architectures a package definition may declare.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Arch {
  #[serde(rename = "x86_64")]
  X86_64,
  #[serde(rename = "aarch64")]
  Aarch64,
  #[serde(rename = "armv7")]
  Armv7,
  #[serde(rename = "i686")]
  I686,
  #[serde(rename = "riscv64")]
  Riscv64,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown architecture '{0}' (expected one of x86_64, aarch64, armv7, i686, riscv64)")]
pub struct ParseArchError(pub String);

impl Arch {
  pub const ALL: [Arch; 5] = [Self::X86_64, Self::Aarch64, Self::Armv7, Self::I686, Self::Riscv64];

  /// Detect the architecture of the running host
  pub fn current() -> Option<Self> {
    match std::env::consts::ARCH {
      "x86_64" => Some(Self::X86_64),
      "aarch64" => Some(Self::Aarch64),
      "arm" => Some(Self::Armv7),
      "x86" => Some(Self::I686),
      "riscv64" => Some(Self::Riscv64),
      _ => None,
    }
  }

  /// Returns the lowercase string identifier for this architecture
  pub fn as_str(&self) -> &'static str {
    match self {
      Self::X86_64 => "x86_64",
      Self::Aarch64 => "aarch64",
      Self::Armv7 => "armv7",
      Self::I686 => "i686",
      Self::Riscv64 => "riscv64",
    }
  }
}

impl FromStr for Arch {
  type Err = ParseArchError;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    match s {
      "x86_64" | "amd64" => Ok(Self::X86_64),
      "aarch64" | "arm64" => Ok(Self::Aarch64),
      "armv7" => Ok(Self::Armv7),
      "i686" => Ok(Self::I686),
      "riscv64" => Ok(Self::Riscv64),
      other => Err(ParseArchError(other.to_string())),
    }
  }
}

impl fmt::Display for Arch {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{}", self.as_str())
  }
}
