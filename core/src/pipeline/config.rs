// balmap/src/pipeline/config.rs

//! Per-stage configuration and the configuration every worker process is started with.

use std::fmt;
use std::io;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use crate::core::stage::{Stage, Stages};
use crate::error::{BalmapError, BalmapResult};

/// Type alias for a stage function.
///
/// A stage function takes ownership of an item and returns the transformed
/// item, or an error describing why this particular item failed. It is shared
/// by every thread of the stage's pool, across every worker process.
pub type StageFn<T> = Arc<dyn Fn(T) -> anyhow::Result<T> + Send + Sync + 'static>;

/// Hands out the [`thread::Builder`] for every thread balmap starts, worker
/// processes and stage workers alike, given the thread's name.
///
/// The default names the thread and changes nothing else. A custom factory can
/// set a stack size, or refuse a spawn by returning an error, which goes
/// through the same rollback as a failed OS spawn.
#[derive(Clone)]
pub struct ThreadFactory(Arc<dyn Fn(&str) -> io::Result<thread::Builder> + Send + Sync + 'static>);

impl ThreadFactory {
  pub fn new<F>(factory: F) -> Self
  where
    F: Fn(&str) -> io::Result<thread::Builder> + Send + Sync + 'static,
  {
    Self(Arc::new(factory))
  }

  pub fn builder(&self, name: &str) -> io::Result<thread::Builder> {
    (self.0)(name)
  }
}

impl Default for ThreadFactory {
  fn default() -> Self {
    Self::new(|name| Ok(thread::Builder::new().name(name.to_string())))
  }
}

impl fmt::Debug for ThreadFactory {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str("ThreadFactory")
  }
}

/// Default number of items a single worker process may hold in flight.
pub const DEFAULT_PRELOAD: usize = 10;

/// Default bounded wait used by the controller and driver loops.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Configuration of one enabled stage. A stage is enabled by being present
/// in a [`Stages`] container; an absent slot means the stage is skipped.
pub struct StageConfig<T> {
  pub(crate) threads: usize,
  pub(crate) func: StageFn<T>,
}

impl<T: Send + 'static> StageConfig<T> {
  /// A single-threaded stage running `func`.
  pub fn new<F>(func: F) -> Self
  where
    F: Fn(T) -> anyhow::Result<T> + Send + Sync + 'static,
  {
    Self {
      threads: 1,
      func: Arc::new(func),
    }
  }

  /// A stage whose function also receives a shared argument value,
  /// called as `func(item, &args)` on every thread.
  pub fn with_args<A, F>(func: F, args: A) -> Self
  where
    A: Send + Sync + 'static,
    F: Fn(T, &A) -> anyhow::Result<T> + Send + Sync + 'static,
  {
    let args = Arc::new(args);
    Self::new(move |item| func(item, &args))
  }

  /// Sets the thread count of the stage pool.
  pub fn threads(mut self, threads: usize) -> Self {
    self.threads = threads;
    self
  }

  pub fn thread_count(&self) -> usize {
    self.threads
  }

  pub fn function(&self) -> &StageFn<T> {
    &self.func
  }
}

impl<T> Clone for StageConfig<T> {
  fn clone(&self) -> Self {
    Self {
      threads: self.threads,
      func: Arc::clone(&self.func),
    }
  }
}

impl<T> fmt::Debug for StageConfig<T> {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("StageConfig")
      .field("threads", &self.threads)
      .field("func", &"<stage fn>")
      .finish()
  }
}

/// Everything a worker process needs to wire and run its pipeline.
pub struct PipelineConfig<T> {
  pub stages: Stages<StageConfig<T>>,
  /// Per-process in-flight budget.
  pub preload: usize,
  /// Bounded wait of the admission loop.
  pub poll_interval: Duration,
  /// Block SIGINT on the worker's threads so only sentinels can stop it.
  pub mask_interrupts: bool,
  pub thread_factory: ThreadFactory,
}

impl<T> PipelineConfig<T> {
  pub fn new(stages: Stages<StageConfig<T>>) -> Self {
    Self {
      stages,
      preload: DEFAULT_PRELOAD,
      poll_interval: DEFAULT_POLL_INTERVAL,
      mask_interrupts: true,
      thread_factory: ThreadFactory::default(),
    }
  }

  pub fn validate(&self) -> BalmapResult<()> {
    if self.preload == 0 {
      return Err(BalmapError::configuration("preload", "must be at least 1"));
    }
    if self.poll_interval.is_zero() {
      return Err(BalmapError::configuration("poll_interval", "must be greater than zero"));
    }
    for (stage, config) in self.stages.iter() {
      if config.threads == 0 {
        return Err(BalmapError::configuration(
          &format!("{}_threads", stage),
          "an enabled stage needs at least 1 thread",
        ));
      }
    }
    Ok(())
  }

  /// Thread count of `stage`, or `None` if the stage is disabled.
  pub fn thread_count(&self, stage: Stage) -> Option<usize> {
    self.stages.get(stage).map(|c| c.threads)
  }
}

impl<T> Clone for PipelineConfig<T> {
  fn clone(&self) -> Self {
    Self {
      stages: self.stages.clone(),
      preload: self.preload,
      poll_interval: self.poll_interval,
      mask_interrupts: self.mask_interrupts,
      thread_factory: self.thread_factory.clone(),
    }
  }
}

impl<T> fmt::Debug for PipelineConfig<T> {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("PipelineConfig")
      .field("stages", &self.stages)
      .field("preload", &self.preload)
      .field("poll_interval", &self.poll_interval)
      .field("mask_interrupts", &self.mask_interrupts)
      .field("thread_factory", &self.thread_factory)
      .finish()
  }
}
