// balmap/src/pipeline/controller.rs

//! The per-process pipeline controller.
//!
//! A controller owns up to three [`StagePool`]s chained pre → intra → post and
//! moves items between the process-level channels and its pipeline:
//!
//!  - `WIRING`: pools are started, each enabled stage reading from the previous
//!    enabled stage's output channel. With no stage enabled, entry and exit are
//!    the same channel and items pass through unchanged.
//!  - `RUNNING`: a single-threaded loop waits (bounded by `poll_interval`) on the
//!    inbound channel, but only while the in-flight budget has room, and on
//!    the pipeline exit. Items are admitted into the entry; finished items are
//!    forwarded to the outbound channel.
//!  - `DRAINING`: on `End`, every pool is sent one sentinel per thread and joined
//!    in pipeline order, then the exit is flushed. On `Kill`, pools are told to
//!    drop whatever they still receive and nothing more is forwarded.
//!  - `TERMINATED`: the controller hands back a [`ProcessReport`].

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crossbeam_channel::{Receiver, RecvError, Select, Sender};
use tracing::{event, instrument, span, Level};

use crate::core::control::{Message, Outcome, Packet, Shutdown};
use crate::core::credit::Credit;
use crate::core::link::Link;
use crate::core::stage::{Stage, Stages};
use crate::error::BalmapResult;
use crate::pipeline::config::PipelineConfig;
use crate::pipeline::pool::StagePool;
use crate::pipeline::worker::WorkerStats;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControllerState {
  Wiring,
  Running,
  Draining,
  Terminated,
}

/// Counters a worker process reports once it has terminated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessReport {
  pub process: usize,
  pub shutdown: Shutdown,
  pub state: ControllerState,
  /// Items taken from the inbound channel into the pipeline.
  pub admitted: usize,
  /// Items (or error envelopes) handed to the outbound channel.
  pub forwarded: usize,
  /// Items admitted but never forwarded because the process was killed.
  pub abandoned: usize,
  /// Largest number of items this process ever held in flight.
  pub high_water: usize,
  pub preload: usize,
  pub stages: Stages<WorkerStats>,
}

/// One step of the admission loop.
enum Event<T> {
  Inbound(Result<Message<T>, RecvError>),
  Exit(Result<Packet<T>, RecvError>),
  Idle,
}

pub struct PipelineController<T> {
  process: usize,
  inbound: Receiver<Message<T>>,
  outbound: Sender<Outcome<T>>,
  pools: Stages<StagePool<T>>,
  entry: Link<Packet<T>>,
  exit: Link<Packet<T>>,
  credit: Credit,
  poll_interval: Duration,
  abandon: Arc<AtomicBool>,
  state: ControllerState,
  admitted: usize,
  forwarded: usize,
  stage_stats: Stages<WorkerStats>,
}

impl<T: Send + 'static> PipelineController<T> {
  /// Starts the stage pools and links them together.
  ///
  /// If a pool fails to start, the pools already running are stopped and
  /// joined before the error is returned.
  #[instrument(
    name = "PipelineController::wire",
    skip_all,
    fields(process = process, stages = config.stages.len(), preload = config.preload),
    err(Display)
  )]
  pub fn wire(
    process: usize,
    config: &PipelineConfig<T>,
    inbound: Receiver<Message<T>>,
    outbound: Sender<Outcome<T>>,
  ) -> BalmapResult<Self> {
    let abandon = Arc::new(AtomicBool::new(false));
    let mut pools: Stages<StagePool<T>> = Stages::new();
    let mut entry: Option<Link<Packet<T>>> = None;
    let mut exit: Option<Link<Packet<T>>> = None;

    for (stage, stage_config) in config.stages.iter() {
      // The previous enabled stage's output becomes this stage's input.
      let input = exit.clone().unwrap_or_default();
      let output = Link::new();
      let pool = match StagePool::start(
        process,
        stage,
        stage_config,
        input.clone(),
        output.clone(),
        Arc::clone(&abandon),
        &config.thread_factory,
      ) {
        Ok(pool) => pool,
        Err(e) => {
          abandon.store(true, Ordering::Release);
          stop_pools(&mut pools);
          return Err(e);
        }
      };
      pools.set(stage, pool);
      entry.get_or_insert(input);
      exit = Some(output);
    }

    let (entry, exit) = match (entry, exit) {
      (Some(entry), Some(exit)) => (entry, exit),
      _ => {
        event!(Level::DEBUG, "No stage enabled, process runs as a pass-through.");
        let link = Link::new();
        (link.clone(), link)
      }
    };

    Ok(Self {
      process,
      inbound,
      outbound,
      pools,
      entry,
      exit,
      credit: Credit::new(config.preload),
      poll_interval: config.poll_interval,
      abandon,
      state: ControllerState::Wiring,
      admitted: 0,
      forwarded: 0,
      stage_stats: Stages::new(),
    })
  }

  /// Runs the admission loop until a sentinel arrives, then shuts the pipeline down.
  pub fn run(mut self) -> ProcessReport {
    let run_span = span!(Level::DEBUG, "pipeline_controller", process = self.process);
    let _run_span_guard = run_span.enter();

    self.state = ControllerState::Running;
    event!(Level::DEBUG, "Controller running.");
    let shutdown = self.admission_loop();

    self.state = ControllerState::Draining;
    let abandoned = match shutdown {
      Shutdown::Drained => self.drain(),
      Shutdown::Killed | Shutdown::Disconnected => self.abandon_pipeline(shutdown),
    };

    self.state = ControllerState::Terminated;
    event!(
      Level::DEBUG,
      ?shutdown,
      admitted = self.admitted,
      forwarded = self.forwarded,
      abandoned,
      "Controller terminated."
    );
    ProcessReport {
      process: self.process,
      shutdown,
      state: self.state,
      admitted: self.admitted,
      forwarded: self.forwarded,
      abandoned,
      high_water: self.credit.high_water(),
      preload: self.credit.limit(),
      stages: std::mem::take(&mut self.stage_stats),
    }
  }

  fn admission_loop(&mut self) -> Shutdown {
    loop {
      match self.wait() {
        Event::Idle => {}
        Event::Inbound(Ok(Message::Item(item))) => self.admit(item),
        Event::Inbound(Ok(Message::End)) => {
          event!(Level::DEBUG, "Received End.");
          return Shutdown::Drained;
        }
        Event::Inbound(Ok(Message::Kill)) => {
          event!(Level::DEBUG, "Received Kill.");
          return Shutdown::Killed;
        }
        Event::Inbound(Err(_)) => {
          event!(Level::ERROR, "Inbound channel closed without a sentinel.");
          return Shutdown::Disconnected;
        }
        Event::Exit(Ok(packet)) => {
          if !self.forward(packet) {
            event!(Level::ERROR, "Outbound channel closed while running.");
            return Shutdown::Disconnected;
          }
        }
        // The exit link keeps its own sender alive, so this cannot close first.
        Event::Exit(Err(_)) => return Shutdown::Disconnected,
      }
    }
  }

  /// Blocks until the inbound channel (only while there is credit) or the
  /// pipeline exit has a message, or `poll_interval` elapses.
  fn wait(&self) -> Event<T> {
    let mut sel = Select::new();
    let inbound_op = if self.credit.has_room() {
      Some(sel.recv(&self.inbound))
    } else {
      None
    };
    sel.recv(self.exit.receiver());

    match sel.select_timeout(self.poll_interval) {
      Err(_) => Event::Idle,
      Ok(oper) if Some(oper.index()) == inbound_op => Event::Inbound(oper.recv(&self.inbound)),
      Ok(oper) => Event::Exit(oper.recv(self.exit.receiver())),
    }
  }

  fn admit(&mut self, item: T) {
    if !self.credit.acquire() {
      // Unreachable while `wait` only selects inbound with room left.
      event!(Level::ERROR, "Admitted an item past the preload budget.");
    }
    // The entry link holds a receiver of its own, so the send cannot fail.
    let sent = self.entry.sender().send(Message::Item(Ok(item)));
    debug_assert!(sent.is_ok(), "pipeline entry closed while its link is alive");
    self.admitted += 1;
    event!(Level::TRACE, in_flight = self.credit.in_flight(), "Item admitted.");
  }

  /// Hands a finished packet to the outbound channel. Returns `false` if the
  /// outbound channel is gone.
  fn forward(&mut self, packet: Packet<T>) -> bool {
    let outcome = match packet {
      Message::Item(outcome) => outcome,
      // Workers consume sentinels; nothing upstream puts one on the exit.
      Message::End | Message::Kill => return true,
    };
    self.credit.release();
    if self.outbound.send(outcome).is_err() {
      return false;
    }
    self.forwarded += 1;
    event!(Level::TRACE, in_flight = self.credit.in_flight(), "Item forwarded.");
    true
  }

  /// Graceful shutdown. Returns the number of items that could not be delivered.
  fn drain(&mut self) -> usize {
    for stage in Stage::ALL {
      if let Some(pool) = self.pools.get_mut(stage) {
        let sent = pool.send_end();
        let stats = pool.join();
        event!(Level::DEBUG, %stage, sentinels = sent, processed = stats.processed, "Stage drained.");
        self.stage_stats.set(stage, stats);
      }
    }

    while let Ok(packet) = self.exit.receiver().try_recv() {
      if !self.forward(packet) {
        event!(Level::ERROR, "Outbound channel closed while draining.");
        break;
      }
    }
    self.credit.forfeit()
  }

  /// Forced shutdown. Returns the number of abandoned items.
  fn abandon_pipeline(&mut self, shutdown: Shutdown) -> usize {
    self.abandon.store(true, Ordering::Release);
    let stats = stop_pools(&mut self.pools);
    for (stage, s) in stats.into_entries() {
      self.stage_stats.set(stage, s);
    }
    let abandoned = self.credit.forfeit();
    event!(
      Level::WARN,
      process = self.process,
      ?shutdown,
      abandoned,
      "Worker process killed; in-flight items dropped."
    );
    abandoned
  }
}

impl<T> PipelineController<T> {
  pub fn process(&self) -> usize {
    self.process
  }

  pub fn state(&self) -> ControllerState {
    self.state
  }

  pub fn preload(&self) -> usize {
    self.credit.limit()
  }

  pub fn pool(&self, stage: Stage) -> Option<&StagePool<T>> {
    self.pools.get(stage)
  }

  /// Where admitted items are sent: the first enabled stage's input.
  pub fn entry(&self) -> &Link<Packet<T>> {
    &self.entry
  }

  /// Where finished items appear: the last enabled stage's output.
  pub fn exit(&self) -> &Link<Packet<T>> {
    &self.exit
  }
}

/// Sends every pool its sentinels first, then joins them all.
fn stop_pools<T>(pools: &mut Stages<StagePool<T>>) -> Stages<WorkerStats> {
  for stage in Stage::ALL {
    if let Some(pool) = pools.get(stage) {
      pool.send_end();
    }
  }
  let mut stats = Stages::new();
  for stage in Stage::ALL {
    if let Some(pool) = pools.get_mut(stage) {
      stats.set(stage, pool.join());
    }
  }
  stats
}
