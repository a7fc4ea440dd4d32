// balmap/src/dispatch/dispatcher.rs

//! The process-pool manager: starts worker processes and exposes
//! submit / receive / join over the two channels they all share.

use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use crossbeam_channel::{unbounded, Receiver, RecvTimeoutError, Sender};
use tracing::{event, instrument, Level};

use crate::core::control::{Control, Message, Outcome};
use crate::core::link::broadcast;
use crate::dispatch::interrupt;
use crate::error::{BalmapError, BalmapResult};
use crate::pipeline::config::PipelineConfig;
use crate::pipeline::controller::{PipelineController, ProcessReport};

/// Handle to a running pool of worker processes.
///
/// Every process reads the same inbound channel and writes the same outbound
/// channel, so whichever process is free picks up the next item. Dropping a
/// dispatcher that was never joined kills and joins its processes.
pub struct Dispatcher<T> {
  inbound: Sender<Message<T>>,
  outbound: Receiver<Outcome<T>>,
  handles: Vec<(usize, JoinHandle<BalmapResult<ProcessReport>>)>,
  process_count: usize,
}

impl<T: Send + 'static> Dispatcher<T> {
  /// Starts `n_procs` worker processes, each wiring its own pipeline from `config`.
  ///
  /// If a process fails to start, the ones already running are killed and
  /// joined before the spawn error is returned.
  #[instrument(
    name = "Dispatcher::spawn",
    skip_all,
    fields(n_procs = n_procs, preload = config.preload),
    err(Display)
  )]
  pub fn spawn(n_procs: usize, config: PipelineConfig<T>) -> BalmapResult<Self> {
    if n_procs == 0 {
      return Err(BalmapError::configuration("n_procs", "must be at least 1"));
    }
    config.validate()?;

    let config = Arc::new(config);
    let (inbound_tx, inbound_rx) = unbounded();
    let (outbound_tx, outbound_rx) = unbounded();
    let mut dispatcher = Self {
      inbound: inbound_tx,
      outbound: outbound_rx,
      handles: Vec::with_capacity(n_procs),
      process_count: 0,
    };

    for process in 0..n_procs {
      let config = Arc::clone(&config);
      let inbound = inbound_rx.clone();
      let outbound = outbound_tx.clone();
      let spawned = config
        .thread_factory
        .builder(&format!("balmap-p{}", process))
        .and_then(|builder| builder.spawn(move || run_worker_process(process, &config, inbound, outbound)));

      match spawned {
        Ok(handle) => {
          dispatcher.handles.push((process, handle));
          dispatcher.process_count += 1;
        }
        Err(source) => {
          event!(Level::ERROR, process, error = %source, "Failed to spawn worker process.");
          dispatcher.broadcast(Control::Kill);
          for result in dispatcher.join() {
            if let Err(e) = result {
              event!(Level::ERROR, error = %e, "Worker process failed during spawn rollback.");
            }
          }
          return Err(BalmapError::Spawn {
            what: format!("worker process {}", process),
            source,
          });
        }
      }
    }

    event!(Level::DEBUG, "Worker processes started.");
    Ok(dispatcher)
  }
}

impl<T> Dispatcher<T> {
  pub fn process_count(&self) -> usize {
    self.process_count
  }

  /// Puts an item on the shared inbound channel.
  pub fn submit(&self, item: T) -> BalmapResult<()> {
    self
      .inbound
      .send(Message::Item(item))
      .map_err(|_| BalmapError::disconnected("inbound"))
  }

  /// A finished item, if one is waiting.
  pub fn try_receive(&self) -> Option<Outcome<T>> {
    self.outbound.try_recv().ok()
  }

  /// Waits up to `timeout` for a finished item.
  ///
  /// `Ok(None)` means the wait timed out; `Err` means every worker process has
  /// exited and nothing is left to receive.
  pub fn receive_timeout(&self, timeout: Duration) -> BalmapResult<Option<Outcome<T>>> {
    match self.outbound.recv_timeout(timeout) {
      Ok(outcome) => Ok(Some(outcome)),
      Err(RecvTimeoutError::Timeout) => Ok(None),
      Err(RecvTimeoutError::Disconnected) => Err(BalmapError::disconnected("outbound")),
    }
  }

  /// Sends one sentinel per worker process. Returns how many were sent.
  pub fn broadcast(&self, control: Control) -> usize {
    let sent = broadcast(&self.inbound, control, self.process_count);
    event!(Level::DEBUG, ?control, sent, "Sentinels broadcast to worker processes.");
    sent
  }

  /// Waits for every worker process to exit.
  ///
  /// The caller must have broadcast a sentinel first, otherwise this blocks
  /// until the processes notice their inbound channel is gone.
  pub fn join(&mut self) -> Vec<BalmapResult<ProcessReport>> {
    self
      .handles
      .drain(..)
      .map(|(process, handle)| match handle.join() {
        Ok(result) => result,
        Err(_) => {
          event!(Level::ERROR, process, "Worker process panicked.");
          Err(BalmapError::ProcessPanicked { process })
        }
      })
      .collect()
  }
}

impl<T> Drop for Dispatcher<T> {
  fn drop(&mut self) {
    if self.handles.is_empty() {
      return;
    }
    event!(Level::WARN, processes = self.handles.len(), "Dispatcher dropped without join; killing workers.");
    broadcast(&self.inbound, Control::Kill, self.handles.len());
    let _ = self.join();
  }
}

/// Body of one worker process.
fn run_worker_process<T: Send + 'static>(
  process: usize,
  config: &PipelineConfig<T>,
  inbound: Receiver<Message<T>>,
  outbound: Sender<Outcome<T>>,
) -> BalmapResult<ProcessReport> {
  if config.mask_interrupts {
    interrupt::mask_interrupts()?;
  }
  let controller = PipelineController::wire(process, config, inbound, outbound)?;
  Ok(controller.run())
}
