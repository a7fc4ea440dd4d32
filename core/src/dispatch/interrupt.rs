// balmap/src/dispatch/interrupt.rs

//! Interrupt plumbing.
//!
//! Worker processes block SIGINT on their own threads so they can only be
//! stopped by a sentinel. The driver does the opposite: while a run is active
//! it counts SIGINTs and turns the first one into a `Kill` broadcast. The
//! caller can also trip an [`AbortHandle`] from any thread for the same effect.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use tracing::{event, Level};

use crate::error::{BalmapError, BalmapResult};

/// Cloneable flag that asks a running driver to abort with `Kill`.
#[derive(Debug, Clone, Default)]
pub struct AbortHandle(Arc<AtomicBool>);

impl AbortHandle {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn abort(&self) {
    self.0.store(true, Ordering::Release);
  }

  pub fn is_aborted(&self) -> bool {
    self.0.load(Ordering::Acquire)
  }
}

/// Blocks SIGINT for the calling thread. Threads spawned afterwards inherit the mask,
/// so calling this first thing in a worker process covers its stage threads too.
#[cfg(unix)]
pub fn mask_interrupts() -> BalmapResult<()> {
  use nix::sys::signal::{pthread_sigmask, SigSet, SigmaskHow, Signal};

  let mut set = SigSet::empty();
  set.add(Signal::SIGINT);
  pthread_sigmask(SigmaskHow::SIG_BLOCK, Some(&set), None).map_err(|e| BalmapError::Signal(e.to_string()))
}

#[cfg(not(unix))]
pub fn mask_interrupts() -> BalmapResult<()> {
  Ok(())
}

static SIGINT_COUNT: AtomicUsize = AtomicUsize::new(0);

#[cfg(unix)]
extern "C" fn on_sigint(_signal: nix::libc::c_int) {
  SIGINT_COUNT.fetch_add(1, Ordering::SeqCst);
}

#[cfg(unix)]
struct Installed {
  watchers: usize,
  previous: Option<nix::sys::signal::SigAction>,
}

#[cfg(unix)]
static INSTALLED: parking_lot::Mutex<Installed> = parking_lot::const_mutex(Installed {
  watchers: 0,
  previous: None,
});

/// Notices SIGINTs delivered while it is alive.
///
/// The first active watch installs the counting handler; the last one to be
/// dropped restores whatever handler was there before.
#[derive(Debug)]
pub struct InterruptWatch {
  baseline: usize,
  active: bool,
}

impl InterruptWatch {
  #[cfg(unix)]
  pub fn install() -> BalmapResult<Self> {
    use nix::sys::signal::{sigaction, SaFlags, SigAction, SigHandler, SigSet, Signal};

    let mut installed = INSTALLED.lock();
    if installed.watchers == 0 {
      let action = SigAction::new(SigHandler::Handler(on_sigint), SaFlags::SA_RESTART, SigSet::empty());
      // SAFETY: the handler only touches an atomic counter, which is async-signal-safe.
      let previous = unsafe { sigaction(Signal::SIGINT, &action) }.map_err(|e| BalmapError::Signal(e.to_string()))?;
      installed.previous = Some(previous);
      event!(Level::DEBUG, "SIGINT handler installed.");
    }
    installed.watchers += 1;
    Ok(Self {
      baseline: SIGINT_COUNT.load(Ordering::SeqCst),
      active: true,
    })
  }

  #[cfg(not(unix))]
  pub fn install() -> BalmapResult<Self> {
    Ok(Self::inactive())
  }

  /// A watch that never fires and installs nothing.
  pub fn inactive() -> Self {
    Self {
      baseline: SIGINT_COUNT.load(Ordering::SeqCst),
      active: false,
    }
  }

  pub fn triggered(&self) -> bool {
    self.active && SIGINT_COUNT.load(Ordering::SeqCst) != self.baseline
  }
}

impl Drop for InterruptWatch {
  fn drop(&mut self) {
    if !self.active {
      return;
    }
    #[cfg(unix)]
    {
      use nix::sys::signal::{sigaction, Signal};

      let mut installed = INSTALLED.lock();
      installed.watchers = installed.watchers.saturating_sub(1);
      if installed.watchers == 0 {
        if let Some(previous) = installed.previous.take() {
          // SAFETY: restores the action that was in place before `install`.
          if let Err(e) = unsafe { sigaction(Signal::SIGINT, &previous) } {
            event!(Level::ERROR, error = %e, "Failed to restore the previous SIGINT handler.");
          } else {
            event!(Level::DEBUG, "Previous SIGINT handler restored.");
          }
        }
      }
    }
  }
}
