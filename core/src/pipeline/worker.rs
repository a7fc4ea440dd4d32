// balmap/src/pipeline/worker.rs

//! The stage worker: a long-lived thread body that serves one stage function.

use std::any::Any;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crossbeam_channel::{Receiver, Sender};
use tracing::{event, span, Level};

use crate::core::control::{Message, Outcome, Packet};
use crate::core::stage::Stage;
use crate::error::StageError;
use crate::pipeline::config::StageFn;

/// What one worker did before it exited.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WorkerStats {
  /// Items the stage function was applied to, whether it succeeded or not.
  pub processed: usize,
  pub failed: usize,
  /// Items received after the process was killed and dropped unprocessed.
  pub discarded: usize,
}

/// Everything a worker thread is parameterized by.
pub struct StageWorker<T> {
  pub stage: Stage,
  pub input: Receiver<Packet<T>>,
  pub output: Sender<Packet<T>>,
  pub func: StageFn<T>,
  /// Set by the controller on `Kill`; the worker then drops whatever it receives.
  pub abandon: Arc<AtomicBool>,
}

impl<T: Send + 'static> StageWorker<T> {
  /// Receives until `End` (or a closed channel) and applies the function to every item.
  ///
  /// Sentinels are consumed, never forwarded: the controller sends one per
  /// worker. Error envelopes coming from an earlier stage pass through untouched.
  pub fn run(self) -> WorkerStats {
    let worker_span = span!(Level::DEBUG, "stage_worker", stage = %self.stage);
    let _worker_span_guard = worker_span.enter();
    event!(Level::DEBUG, "Stage worker started.");

    let mut stats = WorkerStats::default();
    loop {
      let outcome = match self.input.recv() {
        Ok(Message::Item(outcome)) => outcome,
        Ok(Message::End) | Ok(Message::Kill) => break,
        Err(_) => {
          event!(Level::DEBUG, "Stage input closed, worker exiting.");
          break;
        }
      };

      if self.abandon.load(Ordering::Acquire) {
        stats.discarded += 1;
        continue;
      }

      let result = match outcome {
        Ok(item) => {
          stats.processed += 1;
          let result = self.apply(item);
          if let Err(e) = &result {
            stats.failed += 1;
            event!(Level::DEBUG, error = %e, "Stage function failed for an item.");
          }
          result
        }
        Err(upstream) => Err(upstream),
      };

      if self.output.send(Message::Item(result)).is_err() {
        event!(Level::DEBUG, "Stage output closed, worker exiting.");
        break;
      }
    }

    event!(
      Level::DEBUG,
      processed = stats.processed,
      failed = stats.failed,
      discarded = stats.discarded,
      "Stage worker finished."
    );
    stats
  }

  /// Runs the stage function, turning both error returns and panics into an error envelope.
  fn apply(&self, item: T) -> Outcome<T> {
    match catch_unwind(AssertUnwindSafe(|| (self.func)(item))) {
      Ok(Ok(out)) => Ok(out),
      Ok(Err(e)) => Err(StageError::from_anyhow(self.stage, &e)),
      Err(payload) => Err(StageError::new(
        self.stage,
        format!("stage function panicked: {}", panic_message(payload.as_ref())),
      )),
    }
  }
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
  if let Some(s) = payload.downcast_ref::<&'static str>() {
    s
  } else if let Some(s) = payload.downcast_ref::<String>() {
    s.as_str()
  } else {
    "<non-string panic payload>"
  }
}
