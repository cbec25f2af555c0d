use thiserror::Error;

use crate::error::ErrorKind;
use crate::fetch::{FetchError, GitError};
use crate::interrupt::InterruptReason;
use crate::stage::{ConfineError, StageError};
use crate::unpack::UnpackError;
use crate::verify::VerifyError;

use super::exec::ExecError;

/// Failure of a host function, raised into Lua as an external error.
#[derive(Debug, Error)]
pub enum HostError {
  #[error("{0}")]
  Capability(String),

  #[error(transparent)]
  Confine(#[from] ConfineError),

  #[error(transparent)]
  Fetch(#[from] FetchError),

  #[error(transparent)]
  Git(#[from] GitError),

  #[error(transparent)]
  Stage(#[from] StageError),

  #[error(transparent)]
  Unpack(#[from] UnpackError),

  #[error(transparent)]
  Verify(#[from] VerifyError),

  #[error(transparent)]
  Exec(#[from] ExecError),

  #[error("invalid regular expression: {0}")]
  Pattern(#[from] regex::Error),

  #[error("malformed JSON: {0}")]
  Format(#[from] serde_json::Error),

  #[error("operation {0}")]
  Interrupted(InterruptReason),
}

fn interrupt_kind(reason: InterruptReason) -> ErrorKind {
  match reason {
    InterruptReason::Cancelled => ErrorKind::Cancelled,
    InterruptReason::TimedOut => ErrorKind::Timeout,
  }
}

fn verify_kind(err: &VerifyError) -> ErrorKind {
  match err {
    VerifyError::InvalidDigest(_) => ErrorKind::Format,
    VerifyError::Read { .. } | VerifyError::Mismatch { .. } => ErrorKind::Io,
  }
}

impl HostError {
  pub fn kind(&self) -> ErrorKind {
    match self {
      Self::Capability(_) | Self::Confine(_) => ErrorKind::Capability,
      Self::Fetch(err) => match err {
        FetchError::Timeout { .. } | FetchError::Status { .. } | FetchError::Transport { .. } => ErrorKind::Network,
        FetchError::HashMismatch { .. } | FetchError::Io { .. } => ErrorKind::Io,
        FetchError::Digest(err) => verify_kind(err),
        FetchError::Interrupted { reason, .. } => interrupt_kind(*reason),
      },
      Self::Git(err) if err.is_network() => ErrorKind::Network,
      Self::Git(GitError::Interrupted { .. }) => ErrorKind::Cancelled,
      Self::Git(_) => ErrorKind::Git,
      Self::Stage(err) if err.is_capability() => ErrorKind::Capability,
      Self::Stage(_) => ErrorKind::Io,
      Self::Unpack(err) => match err {
        UnpackError::Open { .. } | UnpackError::Destination { .. } => ErrorKind::Io,
        UnpackError::Interrupted(reason) => interrupt_kind(*reason),
        _ => ErrorKind::Archive,
      },
      Self::Verify(err) => verify_kind(err),
      Self::Exec(err) => match err {
        ExecError::Disabled => ErrorKind::Capability,
        ExecError::Spawn { .. } => ErrorKind::Io,
        ExecError::Failed { .. } => ErrorKind::Runtime,
        ExecError::Interrupted { reason, .. } => interrupt_kind(*reason),
      },
      Self::Pattern(_) => ErrorKind::Pattern,
      Self::Format(_) => ErrorKind::Format,
      Self::Interrupted(reason) => interrupt_kind(*reason),
    }
  }
}
