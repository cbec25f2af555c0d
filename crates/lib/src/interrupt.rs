//! Per-build interrupt shared by cancellation and phase timeouts.
//!
//! An [`Interrupt`] is tripped at most once; the first reason wins. It is
//! observed three ways: as an atomic flag (handed to gix and polled by the Lua
//! instruction hook), synchronously via [`Interrupt::reason`], and
//! asynchronously via [`Interrupt::tripped`] for `select!`-style races
//! against downloads and subprocesses.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tokio::sync::watch;

/// Why an interrupt was tripped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InterruptReason {
  Cancelled,
  TimedOut,
}

impl fmt::Display for InterruptReason {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      Self::Cancelled => f.write_str("cancelled"),
      Self::TimedOut => f.write_str("timed out"),
    }
  }
}

/// Cloneable trip wire; all clones observe the same state.
#[derive(Debug, Clone)]
pub struct Interrupt {
  inner: Arc<Inner>,
}

#[derive(Debug)]
struct Inner {
  flag: AtomicBool,
  reason: watch::Sender<Option<InterruptReason>>,
}

/// Handle callers use to cancel builds.
pub type CancelToken = Interrupt;

impl Default for Interrupt {
  fn default() -> Self {
    Self::new()
  }
}

impl Interrupt {
  pub fn new() -> Self {
    let (reason, _) = watch::channel(None);
    Self {
      inner: Arc::new(Inner {
        flag: AtomicBool::new(false),
        reason,
      }),
    }
  }

  /// Trips the interrupt. Returns `false` if it was already tripped.
  pub fn trip(&self, reason: InterruptReason) -> bool {
    let first = self.inner.reason.send_if_modified(|current| {
      if current.is_some() {
        return false;
      }
      *current = Some(reason);
      true
    });
    if first {
      self.inner.flag.store(true, Ordering::SeqCst);
    }
    first
  }

  /// Requests cancellation.
  pub fn cancel(&self) -> bool {
    self.trip(InterruptReason::Cancelled)
  }

  pub fn reason(&self) -> Option<InterruptReason> {
    *self.inner.reason.borrow()
  }

  pub fn is_tripped(&self) -> bool {
    self.inner.flag.load(Ordering::SeqCst)
  }

  /// The raw flag, for APIs that poll an `AtomicBool` (gix).
  pub fn flag(&self) -> &AtomicBool {
    &self.inner.flag
  }

  /// Resolves once the interrupt is tripped.
  pub async fn tripped(&self) -> InterruptReason {
    let mut rx = self.inner.reason.subscribe();
    let observed = rx.wait_for(Option::is_some).await.map(|reason| *reason);
    match observed {
      Ok(Some(reason)) => reason,
      // The sender lives as long as `self`, so the channel never closes here.
      _ => std::future::pending().await,
    }
  }
}
