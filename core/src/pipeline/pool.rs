// balmap/src/pipeline/pool.rs

//! A fixed-size pool of stage workers sharing one input and one output channel.

use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use std::thread::JoinHandle;

use tracing::{event, instrument, Level};

use crate::core::control::{Control, Packet};
use crate::core::link::{broadcast, Link};
use crate::core::stage::Stage;
use crate::error::{BalmapError, BalmapResult};
use crate::pipeline::config::{StageConfig, ThreadFactory};
use crate::pipeline::worker::{StageWorker, WorkerStats};

pub struct StagePool<T> {
  stage: Stage,
  threads: usize,
  input: Link<Packet<T>>,
  output: Link<Packet<T>>,
  handles: Vec<JoinHandle<WorkerStats>>,
}

impl<T: Send + 'static> StagePool<T> {
  /// Starts `config.threads` workers reading `input` and writing `output`.
  ///
  /// If a thread fails to start, the workers already running are sent `End`
  /// and joined before the error is returned.
  #[instrument(
    name = "StagePool::start",
    skip_all,
    fields(process = process, stage = %stage, threads = config.threads),
    err(Display)
  )]
  pub fn start(
    process: usize,
    stage: Stage,
    config: &StageConfig<T>,
    input: Link<Packet<T>>,
    output: Link<Packet<T>>,
    abandon: Arc<AtomicBool>,
    factory: &ThreadFactory,
  ) -> BalmapResult<Self> {
    let mut pool = Self {
      stage,
      threads: config.threads,
      input,
      output,
      handles: Vec::with_capacity(config.threads),
    };

    for idx in 0..config.threads {
      let worker = StageWorker {
        stage,
        input: pool.input.receiver().clone(),
        output: pool.output.sender().clone(),
        func: Arc::clone(&config.func),
        abandon: Arc::clone(&abandon),
      };
      let spawned = factory
        .builder(&format!("balmap-p{}-{}-{}", process, stage, idx))
        .and_then(|builder| builder.spawn(move || worker.run()));
      match spawned {
        Ok(handle) => pool.handles.push(handle),
        Err(source) => {
          event!(Level::ERROR, thread_index = idx, error = %source, "Failed to spawn stage worker.");
          pool.send_end();
          pool.join();
          return Err(BalmapError::Spawn {
            what: format!("{} worker {} of process {}", stage, idx, process),
            source,
          });
        }
      }
    }

    event!(Level::DEBUG, "Stage pool started.");
    Ok(pool)
  }
}

impl<T> StagePool<T> {
  pub fn stage(&self) -> Stage {
    self.stage
  }

  pub fn thread_count(&self) -> usize {
    self.threads
  }

  pub fn input(&self) -> &Link<Packet<T>> {
    &self.input
  }

  pub fn output(&self) -> &Link<Packet<T>> {
    &self.output
  }

  /// Sends exactly one `End` per running worker of this pool.
  pub fn send_end(&self) -> usize {
    broadcast(self.input.sender(), Control::End, self.handles.len())
  }

  /// Waits for every worker and sums their stats. A worker that panicked
  /// outside the stage function is logged and counted as having done nothing.
  pub fn join(&mut self) -> WorkerStats {
    let mut total = WorkerStats::default();
    for handle in self.handles.drain(..) {
      match handle.join() {
        Ok(stats) => {
          total.processed += stats.processed;
          total.failed += stats.failed;
          total.discarded += stats.discarded;
        }
        Err(_) => event!(Level::ERROR, stage = %self.stage, "Stage worker thread panicked."),
      }
    }
    total
  }
}
