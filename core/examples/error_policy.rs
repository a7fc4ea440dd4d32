// balmap/examples/error_policy.rs

use anyhow::Context as _;
use balmap::{BalancedMap, BalmapError, ErrorPolicy, NoProgress};
use tracing::{error, info, warn};

fn parse_record(line: String) -> anyhow::Result<String> {
  let (key, value) = line
    .split_once('=')
    .with_context(|| format!("record '{}' has no '='", line))?;
  let value: i64 = value.trim().parse().context("value is not an integer")?;
  Ok(format!("{}={}", key.trim(), value * 2))
}

fn main() -> Result<(), BalmapError> {
  tracing_subscriber::fmt().with_max_level(tracing::Level::INFO).init();

  let lines: Vec<String> = ["a=1", "b=2", "broken", "c=x", "d=4"]
    .iter()
    .map(|s| s.to_string())
    .collect();

  // 1. Skip (the default): failed items are reported, the rest still complete.
  info!("--- Skip policy ---");
  let report = BalancedMap::new(2)
    .intra(2, parse_record)
    .progress(NoProgress)
    .collect_results(true)
    .run(lines.clone())?;
  for failure in &report.failures {
    warn!(stage = %failure.stage, reason = %failure.message, "Item skipped.");
  }
  info!(ok = ?report.results, "Skip policy finished.");

  // 2. Fatal: the first failure kills the pool and is returned as an error.
  info!("--- Fatal policy ---");
  let result = BalancedMap::new(2)
    .intra(2, parse_record)
    .progress(NoProgress)
    .error_policy(ErrorPolicy::Fatal)
    .run(lines);
  match result {
    Err(BalmapError::Stage(e)) => error!(stage = %e.stage, reason = %e.message, "Run aborted."),
    Err(e) => return Err(e),
    Ok(report) => info!(outcome = ?report.outcome, "Unexpectedly completed."),
  }
  Ok(())
}
