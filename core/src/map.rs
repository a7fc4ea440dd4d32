// balmap/src/map.rs

//! The caller-facing entry points: [`map`] and the [`BalancedMap`] builder.

use std::time::Duration;

use tracing::{event, instrument, Level};

use crate::core::stage::{Stage, Stages};
use crate::dispatch::dispatcher::Dispatcher;
use crate::dispatch::driver::{Driver, ErrorPolicy, MapReport};
use crate::dispatch::interrupt::AbortHandle;
use crate::error::{BalmapError, BalmapResult};
use crate::pipeline::config::{PipelineConfig, StageConfig, ThreadFactory, DEFAULT_POLL_INTERVAL, DEFAULT_PRELOAD};
use crate::progress::{ConsoleProgress, ProgressSink};

/// Options of a single [`map`] call.
pub struct MapOptions<T> {
  /// Enabled stages; an absent slot is skipped.
  pub stages: Stages<StageConfig<T>>,
  /// Per-process in-flight budget.
  pub preload: usize,
  /// Pool-wide in-flight budget; defaults to `2 * n_procs * preload`.
  pub pool_preload: Option<usize>,
  pub collect_results: bool,
  /// Defaults to a [`ConsoleProgress`] on stderr.
  pub progress: Option<Box<dyn ProgressSink>>,
  pub error_policy: ErrorPolicy,
  pub poll_interval: Duration,
  /// Block SIGINT inside worker processes.
  pub mask_worker_interrupts: bool,
  /// Turn SIGINT received by the driver into a forced abort.
  pub catch_interrupts: bool,
  pub abort: Option<AbortHandle>,
  /// Builds every thread the pool starts.
  pub thread_factory: ThreadFactory,
}

impl<T> Default for MapOptions<T> {
  fn default() -> Self {
    Self {
      stages: Stages::new(),
      preload: DEFAULT_PRELOAD,
      pool_preload: None,
      collect_results: false,
      progress: None,
      error_policy: ErrorPolicy::default(),
      poll_interval: DEFAULT_POLL_INTERVAL,
      mask_worker_interrupts: true,
      catch_interrupts: true,
      abort: None,
      thread_factory: ThreadFactory::default(),
    }
  }
}

impl<T> MapOptions<T> {
  pub fn resolved_pool_preload(&self, n_procs: usize) -> usize {
    self
      .pool_preload
      .unwrap_or_else(|| 2 * n_procs.max(1) * self.preload)
  }

  fn validate(&self, n_procs: usize) -> BalmapResult<()> {
    if n_procs == 0 {
      return Err(BalmapError::configuration("n_procs", "must be at least 1"));
    }
    if self.pool_preload == Some(0) {
      return Err(BalmapError::configuration("pool_preload", "must be at least 1"));
    }
    Ok(())
  }
}

/// Maps `data` through the configured stages on `n_procs` worker processes.
///
/// Results (when collected) arrive in completion order, not input order.
/// Returns `Err` for invalid options, when the pool cannot be started, or
/// when a stage fails under [`ErrorPolicy::Fatal`]. Aborts and interrupts
/// are reported through [`MapReport::outcome`].
#[instrument(
  name = "balmap::map",
  skip_all,
  fields(n_procs = n_procs, items = data.len(), stages = options.stages.len()),
  err(Display)
)]
pub fn map<T: Send + 'static>(n_procs: usize, data: Vec<T>, options: MapOptions<T>) -> BalmapResult<MapReport<T>> {
  options.validate(n_procs)?;
  let pool_preload = options.resolved_pool_preload(n_procs);

  let MapOptions {
    stages,
    preload,
    collect_results,
    progress,
    error_policy,
    poll_interval,
    mask_worker_interrupts,
    catch_interrupts,
    abort,
    thread_factory,
    ..
  } = options;

  let pipeline = PipelineConfig {
    stages,
    preload,
    poll_interval,
    mask_interrupts: mask_worker_interrupts,
    thread_factory,
  };
  event!(Level::DEBUG, preload, pool_preload, "Spawning worker processes.");
  let dispatcher = Dispatcher::spawn(n_procs, pipeline)?;

  let progress = progress.unwrap_or_else(|| Box::new(ConsoleProgress::new()));
  Driver::new(dispatcher, pool_preload)
    .collect_results(collect_results)
    .error_policy(error_policy)
    .poll_interval(poll_interval)
    .progress(progress)
    .abort_handle(abort.unwrap_or_default())
    .catch_interrupts(catch_interrupts)
    .run(data)
}

/// Fluent builder over [`MapOptions`].
///
/// ```no_run
/// use balmap::BalancedMap;
///
/// let report = BalancedMap::new(2)
///   .pre(3, |x: i32| Ok(x * 2))
///   .intra(1, |x| Ok(x + 1))
///   .collect_results(true)
///   .run(vec![0, 1, 2, 3, 4, 5])?;
/// let mut results = report.into_results();
/// results.sort();
/// assert_eq!(results, vec![1, 3, 5, 7, 9, 11]);
/// # Ok::<(), balmap::BalmapError>(())
/// ```
pub struct BalancedMap<T> {
  n_procs: usize,
  options: MapOptions<T>,
}

impl<T: Send + 'static> BalancedMap<T> {
  pub fn new(n_procs: usize) -> Self {
    Self {
      n_procs,
      options: MapOptions::default(),
    }
  }

  /// Enables `stage` with an explicit configuration, replacing any previous one.
  pub fn stage(mut self, stage: Stage, config: StageConfig<T>) -> Self {
    self.options.stages.set(stage, config);
    self
  }

  /// Enables the stage named `name` ("pre", "intra" or "post").
  pub fn stage_named(self, name: &str, config: StageConfig<T>) -> BalmapResult<Self> {
    let stage = name.parse::<Stage>()?;
    Ok(self.stage(stage, config))
  }

  pub fn pre<F>(self, threads: usize, func: F) -> Self
  where
    F: Fn(T) -> anyhow::Result<T> + Send + Sync + 'static,
  {
    self.stage(Stage::Pre, StageConfig::new(func).threads(threads))
  }

  pub fn intra<F>(self, threads: usize, func: F) -> Self
  where
    F: Fn(T) -> anyhow::Result<T> + Send + Sync + 'static,
  {
    self.stage(Stage::Intra, StageConfig::new(func).threads(threads))
  }

  pub fn post<F>(self, threads: usize, func: F) -> Self
  where
    F: Fn(T) -> anyhow::Result<T> + Send + Sync + 'static,
  {
    self.stage(Stage::Post, StageConfig::new(func).threads(threads))
  }

  pub fn pre_with_args<A, F>(self, threads: usize, func: F, args: A) -> Self
  where
    A: Send + Sync + 'static,
    F: Fn(T, &A) -> anyhow::Result<T> + Send + Sync + 'static,
  {
    self.stage(Stage::Pre, StageConfig::with_args(func, args).threads(threads))
  }

  pub fn intra_with_args<A, F>(self, threads: usize, func: F, args: A) -> Self
  where
    A: Send + Sync + 'static,
    F: Fn(T, &A) -> anyhow::Result<T> + Send + Sync + 'static,
  {
    self.stage(Stage::Intra, StageConfig::with_args(func, args).threads(threads))
  }

  pub fn post_with_args<A, F>(self, threads: usize, func: F, args: A) -> Self
  where
    A: Send + Sync + 'static,
    F: Fn(T, &A) -> anyhow::Result<T> + Send + Sync + 'static,
  {
    self.stage(Stage::Post, StageConfig::with_args(func, args).threads(threads))
  }

  pub fn preload(mut self, preload: usize) -> Self {
    self.options.preload = preload;
    self
  }

  pub fn pool_preload(mut self, pool_preload: usize) -> Self {
    self.options.pool_preload = Some(pool_preload);
    self
  }

  pub fn collect_results(mut self, collect: bool) -> Self {
    self.options.collect_results = collect;
    self
  }

  pub fn progress(mut self, sink: impl ProgressSink + 'static) -> Self {
    self.options.progress = Some(Box::new(sink));
    self
  }

  pub fn error_policy(mut self, policy: ErrorPolicy) -> Self {
    self.options.error_policy = policy;
    self
  }

  pub fn poll_interval(mut self, interval: Duration) -> Self {
    self.options.poll_interval = interval;
    self
  }

  pub fn mask_worker_interrupts(mut self, mask: bool) -> Self {
    self.options.mask_worker_interrupts = mask;
    self
  }

  pub fn catch_interrupts(mut self, catch: bool) -> Self {
    self.options.catch_interrupts = catch;
    self
  }

  pub fn abort_handle(mut self, handle: AbortHandle) -> Self {
    self.options.abort = Some(handle);
    self
  }

  pub fn thread_factory(mut self, factory: ThreadFactory) -> Self {
    self.options.thread_factory = factory;
    self
  }

  pub fn options(&self) -> &MapOptions<T> {
    &self.options
  }

  pub fn run(self, data: Vec<T>) -> BalmapResult<MapReport<T>> {
    map(self.n_procs, data, self.options)
  }
}
