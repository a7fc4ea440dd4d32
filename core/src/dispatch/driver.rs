// balmap/src/dispatch/driver.rs

//! The dispatch driver: feeds a backlog into a [`Dispatcher`] under a global
//! credit limit, collects what comes back, and runs the shutdown protocol.

use std::time::Duration;

use tracing::{event, instrument, Level};

use crate::core::control::{Control, RunOutcome, Shutdown};
use crate::core::credit::Credit;
use crate::dispatch::dispatcher::Dispatcher;
use crate::dispatch::interrupt::{AbortHandle, InterruptWatch};
use crate::error::{BalmapError, BalmapResult, StageError};
use crate::pipeline::config::DEFAULT_POLL_INTERVAL;
use crate::pipeline::controller::ProcessReport;
use crate::progress::{NoProgress, ProgressSink};

/// What the driver does when an item comes back as a failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ErrorPolicy {
  /// Record the failure in the report and keep going.
  #[default]
  Skip,
  /// Abort the whole run with `Kill` and return the failure as an error.
  Fatal,
}

/// Everything a run produced.
#[derive(Debug)]
pub struct MapReport<T> {
  /// Successful items in completion order; `Some` iff results were collected.
  pub results: Option<Vec<T>>,
  pub submitted: usize,
  /// Items that came back, successful or not.
  pub completed: usize,
  pub failures: Vec<StageError>,
  pub outcome: RunOutcome,
  /// Largest number of items the pool ever held in flight.
  pub pool_high_water: usize,
  pub pool_preload: usize,
  pub processes: Vec<ProcessReport>,
  /// Worker processes that did not produce a report (failed wiring, panicked).
  pub process_errors: Vec<BalmapError>,
}

impl<T> MapReport<T> {
  /// Consumes the report, returning the collected results (empty if not collected).
  pub fn into_results(self) -> Vec<T> {
    self.results.unwrap_or_default()
  }
}

pub struct Driver<T> {
  dispatcher: Dispatcher<T>,
  pool_preload: usize,
  collect_results: bool,
  error_policy: ErrorPolicy,
  poll_interval: Duration,
  progress: Box<dyn ProgressSink>,
  abort: AbortHandle,
  catch_interrupts: bool,
}

impl<T: Send + 'static> Driver<T> {
  pub fn new(dispatcher: Dispatcher<T>, pool_preload: usize) -> Self {
    Self {
      dispatcher,
      pool_preload,
      collect_results: false,
      error_policy: ErrorPolicy::default(),
      poll_interval: DEFAULT_POLL_INTERVAL,
      progress: Box::new(NoProgress),
      abort: AbortHandle::new(),
      catch_interrupts: false,
    }
  }

  pub fn collect_results(mut self, collect: bool) -> Self {
    self.collect_results = collect;
    self
  }

  pub fn error_policy(mut self, policy: ErrorPolicy) -> Self {
    self.error_policy = policy;
    self
  }

  pub fn poll_interval(mut self, interval: Duration) -> Self {
    self.poll_interval = interval;
    self
  }

  pub fn progress(mut self, sink: Box<dyn ProgressSink>) -> Self {
    self.progress = sink;
    self
  }

  pub fn abort_handle(mut self, handle: AbortHandle) -> Self {
    self.abort = handle;
    self
  }

  /// Turn SIGINT into a forced abort while the run is active.
  pub fn catch_interrupts(mut self, catch: bool) -> Self {
    self.catch_interrupts = catch;
    self
  }

  /// Drives `backlog` through the pool and tears it down.
  ///
  /// Items are taken from the tail of `backlog`. Teardown (sentinel broadcast,
  /// join of every process, `progress.close()`) runs on every path.
  #[instrument(
    name = "Driver::run",
    skip_all,
    fields(
      backlog = backlog.len(),
      pool_preload = self.pool_preload,
      processes = self.dispatcher.process_count(),
    ),
    err(Display)
  )]
  pub fn run(mut self, mut backlog: Vec<T>) -> BalmapResult<MapReport<T>> {
    if self.pool_preload == 0 {
      return Err(BalmapError::configuration("pool_preload", "must be at least 1"));
    }

    let interrupts = if self.catch_interrupts {
      InterruptWatch::install().unwrap_or_else(|e| {
        event!(Level::WARN, error = %e, "Could not watch for SIGINT; continuing without it.");
        InterruptWatch::inactive()
      })
    } else {
      InterruptWatch::inactive()
    };

    let total = backlog.len();
    let mut credit = Credit::new(self.pool_preload);
    let mut results = self.collect_results.then(|| Vec::with_capacity(total));
    let mut failures = Vec::new();
    let mut fatal: Option<StageError> = None;
    let mut submitted = 0;
    let mut completed = 0;

    self.progress.begin(total);
    event!(Level::DEBUG, total, "Driver loop starting.");

    let outcome = 'run: loop {
      if completed >= total {
        break RunOutcome::Completed;
      }
      if self.abort.is_aborted() {
        event!(Level::WARN, "Abort requested by caller.");
        break RunOutcome::Aborted;
      }
      if interrupts.triggered() {
        event!(Level::WARN, "Interrupted; killing worker processes.");
        break RunOutcome::Interrupted;
      }

      while credit.has_room() {
        let Some(item) = backlog.pop() else { break };
        if let Err(e) = self.dispatcher.submit(item) {
          event!(Level::ERROR, error = %e, "Submit failed.");
          break 'run RunOutcome::Failed(e.to_string());
        }
        if !credit.acquire() {
          // Unreachable while the loop only submits with room left.
          event!(Level::ERROR, "Submitted an item past the pool_preload budget.");
        }
        submitted += 1;
      }

      let outcome = match self.dispatcher.receive_timeout(self.poll_interval) {
        Ok(Some(outcome)) => outcome,
        Ok(None) => continue,
        Err(e) => {
          event!(Level::ERROR, error = %e, completed, total, "Worker pool vanished before finishing.");
          break RunOutcome::Failed(e.to_string());
        }
      };

      credit.release();
      completed += 1;
      self.progress.update();
      match outcome {
        Ok(item) => {
          if let Some(results) = results.as_mut() {
            results.push(item);
          }
        }
        Err(failure) => match self.error_policy {
          ErrorPolicy::Skip => {
            event!(Level::WARN, error = %failure, "Item failed; skipping.");
            failures.push(failure);
          }
          ErrorPolicy::Fatal => {
            event!(Level::ERROR, error = %failure, "Item failed; aborting run.");
            failures.push(failure.clone());
            let message = failure.to_string();
            fatal = Some(failure);
            break RunOutcome::Failed(message);
          }
        },
      }
    };

    // --- Teardown ---
    let control = if outcome.is_completed() { Control::End } else { Control::Kill };
    self.dispatcher.broadcast(control);

    let mut processes = Vec::with_capacity(self.dispatcher.process_count());
    let mut process_errors = Vec::new();
    for result in self.dispatcher.join() {
      match result {
        Ok(report) => processes.push(report),
        Err(e) => {
          event!(Level::ERROR, error = %e, "Worker process ended with an error.");
          process_errors.push(e);
        }
      }
    }
    for report in processes.iter().filter(|r| r.shutdown != Shutdown::Drained) {
      self.progress.killed(report.process, report.abandoned);
    }
    self.progress.close();
    drop(interrupts);

    event!(
      Level::INFO,
      ?outcome,
      submitted,
      completed,
      failed = failures.len(),
      "Run finished."
    );

    if let Some(failure) = fatal {
      return Err(BalmapError::Stage(failure));
    }

    Ok(MapReport {
      results,
      submitted,
      completed,
      failures,
      outcome,
      pool_high_water: credit.high_water(),
      pool_preload: credit.limit(),
      processes,
      process_errors,
    })
  }
}
