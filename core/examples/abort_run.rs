// balmap/examples/abort_run.rs

use std::thread;
use std::time::Duration;

use balmap::{AbortHandle, BalancedMap, BalmapError, RunOutcome};
use tracing::info;

// Press Ctrl-C to interrupt instead of waiting for the timer.
fn main() -> Result<(), BalmapError> {
  tracing_subscriber::fmt().with_max_level(tracing::Level::INFO).init();
  info!("--- Abort Example ---");

  let abort = AbortHandle::new();
  let trigger = abort.clone();
  thread::spawn(move || {
    thread::sleep(Duration::from_secs(2));
    info!("Timer fired, aborting.");
    trigger.abort();
  });

  let report = BalancedMap::new(2)
    .pre(4, |x: u64| {
      thread::sleep(Duration::from_millis(20));
      Ok(x)
    })
    .abort_handle(abort)
    .run((0..10_000).collect())?;

  match &report.outcome {
    RunOutcome::Completed => info!("All items completed."),
    RunOutcome::Aborted | RunOutcome::Interrupted => {
      let abandoned: usize = report.processes.iter().map(|p| p.abandoned).sum();
      info!(
        outcome = ?report.outcome,
        submitted = report.submitted,
        completed = report.completed,
        abandoned,
        "Pool killed before the backlog was exhausted."
      );
    }
    RunOutcome::Failed(reason) => info!(%reason, "Run failed."),
  }
  Ok(())
}
