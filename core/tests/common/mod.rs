// tests/common/mod.rs
#![allow(dead_code)] // Allow unused code in this common test module

use balmap::{BalancedMap, ProgressSink, ThreadFactory};
use parking_lot::Mutex;
use std::sync::{
  atomic::{AtomicUsize, Ordering},
  Arc,
};
use std::time::Duration;
use tracing::Level;

// --- Helper for Tracing Setup (call once per test run if needed) ---
use once_cell::sync::Lazy;
static TRACING_INIT: Lazy<()> = Lazy::new(|| {
  tracing_subscriber::fmt()
    .with_max_level(Level::DEBUG)
    .with_test_writer() // Important for tests to capture output
    .try_init()
    .ok(); // Allow multiple initializations in tests (ok if fails)
});

pub fn setup_tracing() {
  Lazy::force(&TRACING_INIT);
}

// --- Progress sink that records how it was called ---
#[derive(Clone, Default)]
pub struct RecordingProgress {
  pub begun_with: Arc<AtomicUsize>,
  pub updates: Arc<AtomicUsize>,
  pub closes: Arc<AtomicUsize>,
  /// `(process, abandoned)` for every kill notice.
  pub kills: Arc<Mutex<Vec<(usize, usize)>>>,
}

impl ProgressSink for RecordingProgress {
  fn begin(&mut self, total: usize) {
    self.begun_with.store(total, Ordering::SeqCst);
  }

  fn update(&mut self) {
    self.updates.fetch_add(1, Ordering::SeqCst);
  }

  fn killed(&mut self, process: usize, abandoned: usize) {
    self.kills.lock().push((process, abandoned));
  }

  fn close(&mut self) {
    self.closes.fetch_add(1, Ordering::SeqCst);
  }
}

/// A builder with quiet defaults for tests: no console output, short polls,
/// and no process-wide SIGINT handler.
pub fn quiet_map<T: Send + 'static>(n_procs: usize) -> BalancedMap<T> {
  BalancedMap::new(n_procs)
    .progress(balmap::NoProgress)
    .poll_interval(Duration::from_millis(5))
    .catch_interrupts(false)
}

pub fn sorted<T: Ord>(mut v: Vec<T>) -> Vec<T> {
  v.sort();
  v
}

/// Stage function that sleeps before returning its input unchanged.
pub fn slow_identity(delay: Duration) -> impl Fn(u64) -> anyhow::Result<u64> + Send + Sync + 'static {
  move |x| {
    std::thread::sleep(delay);
    Ok(x)
  }
}

/// Counts how many items are inside a stage function at the same time.
#[derive(Clone, Default)]
pub struct Concurrency {
  current: Arc<AtomicUsize>,
  peak: Arc<AtomicUsize>,
}

impl Concurrency {
  pub fn enter(&self) {
    let now = self.current.fetch_add(1, Ordering::SeqCst) + 1;
    self.peak.fetch_max(now, Ordering::SeqCst);
  }

  pub fn exit(&self) {
    self.current.fetch_sub(1, Ordering::SeqCst);
  }

  pub fn peak(&self) -> usize {
    self.peak.load(Ordering::SeqCst)
  }
}

/// A thread factory that refuses to build the thread called `refused`.
pub fn refusing_factory(refused: &'static str) -> ThreadFactory {
  ThreadFactory::new(move |name| {
    if name == refused {
      return Err(std::io::Error::new(std::io::ErrorKind::WouldBlock, format!("no thread for {}", name)));
    }
    Ok(std::thread::Builder::new().name(name.to_string()))
  })
}
