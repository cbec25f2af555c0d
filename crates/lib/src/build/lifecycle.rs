//! The lifecycle state machine.
//!
//! A build walks `SOURCES → VERSION → PREPARE → BUILD → PACKAGE` (or just
//! `VERSION` in version-only mode). Each phase either succeeds and advances or
//! fails and ends the build; nothing is retried.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::ErrorKind;

/// One lifecycle phase. The serialized form is the hook name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Phase {
  Sources,
  Version,
  Prepare,
  Build,
  Package,
}

impl Phase {
  pub const ALL: [Phase; 5] = [Phase::Sources, Phase::Version, Phase::Prepare, Phase::Build, Phase::Package];

  /// Name of the global function implementing this phase.
  pub fn hook_name(self) -> &'static str {
    match self {
      Phase::Sources => "SOURCES",
      Phase::Version => "VERSION",
      Phase::Prepare => "PREPARE",
      Phase::Build => "BUILD",
      Phase::Package => "PACKAGE",
    }
  }

  pub fn next(self) -> Option<Phase> {
    match self {
      Phase::Sources => Some(Phase::Version),
      Phase::Version => Some(Phase::Prepare),
      Phase::Prepare => Some(Phase::Build),
      Phase::Build => Some(Phase::Package),
      Phase::Package => None,
    }
  }
}

impl fmt::Display for Phase {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.hook_name())
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BuildMode {
  /// All five phases, ending in `Packaged`.
  #[default]
  Full,
  /// Only `VERSION`, ending in `Versioned`.
  VersionOnly,
}

impl BuildMode {
  fn first(self) -> Phase {
    match self {
      BuildMode::Full => Phase::Sources,
      BuildMode::VersionOnly => Phase::Version,
    }
  }

  fn last(self) -> Phase {
    match self {
      BuildMode::Full => Phase::Package,
      BuildMode::VersionOnly => Phase::Version,
    }
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleState {
  /// The phase is next to run.
  Ready(Phase),
  Packaged,
  Versioned,
  Failed { phase: Phase, kind: ErrorKind },
}

impl LifecycleState {
  pub fn is_terminal(&self) -> bool {
    !matches!(self, LifecycleState::Ready(_))
  }
}

#[derive(Debug, Clone)]
pub struct Lifecycle {
  mode: BuildMode,
  state: LifecycleState,
}

impl Lifecycle {
  pub fn new(mode: BuildMode) -> Self {
    Self {
      mode,
      state: LifecycleState::Ready(mode.first()),
    }
  }

  pub fn mode(&self) -> BuildMode {
    self.mode
  }

  pub fn state(&self) -> LifecycleState {
    self.state
  }

  /// The phase about to run, `None` once terminal.
  pub fn current(&self) -> Option<Phase> {
    match self.state {
      LifecycleState::Ready(phase) => Some(phase),
      _ => None,
    }
  }

  /// Records success of the current phase. Terminal states are left alone.
  pub fn advance(&mut self) -> LifecycleState {
    if let LifecycleState::Ready(phase) = self.state {
      self.state = if phase == self.mode.last() {
        match self.mode {
          BuildMode::Full => LifecycleState::Packaged,
          BuildMode::VersionOnly => LifecycleState::Versioned,
        }
      } else {
        phase.next().map_or(LifecycleState::Packaged, LifecycleState::Ready)
      };
    }
    self.state
  }

  /// Records failure of the current phase.
  pub fn fail(&mut self, kind: ErrorKind) -> LifecycleState {
    if let LifecycleState::Ready(phase) = self.state {
      self.state = LifecycleState::Failed { phase, kind };
    }
    self.state
  }
}
