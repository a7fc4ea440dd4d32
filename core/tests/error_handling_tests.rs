// tests/error_handling_tests.rs
mod common;

use anyhow::Context as _;
use balmap::{BalmapError, ErrorPolicy, RunOutcome, Shutdown, Stage, StageError};
use common::*;
use serial_test::serial;
use std::time::Duration;

#[test]
fn test_skip_policy_records_failures_and_keeps_going() {
  setup_tracing();
  let report = quiet_map::<i64>(2)
    .pre(2, |x| {
      if x % 2 == 1 {
        anyhow::bail!("odd item {}", x);
      }
      Ok(x)
    })
    .collect_results(true)
    .run((0..20).collect())
    .unwrap();

  assert_eq!(report.outcome, RunOutcome::Completed);
  assert_eq!(report.completed, 20);
  assert_eq!(report.failures.len(), 10);
  assert!(report.failures.iter().all(|f| f.stage == Stage::Pre));
  assert!(report.failures.iter().any(|f| f.message == "odd item 7"));
  assert_eq!(sorted(report.into_results()), (0..20).step_by(2).collect::<Vec<_>>());
}

#[test]
fn test_failed_item_skips_later_stages() {
  setup_tracing();
  let report = quiet_map::<i64>(1)
    .pre(1, |x| {
      if x == 3 {
        anyhow::bail!("cannot load");
      }
      Ok(x)
    })
    .post(1, |x| Ok(x * 100))
    .collect_results(true)
    .run((0..5).collect())
    .unwrap();

  // The failure carries the stage it happened in, not the last stage.
  assert_eq!(report.failures, vec![StageError::new(Stage::Pre, "cannot load")]);
  assert_eq!(sorted(report.into_results()), vec![0, 100, 200, 400]);
}

#[test]
fn test_error_context_chain_is_kept() {
  setup_tracing();
  let report = quiet_map::<String>(1)
    .intra(1, |s: String| {
      s.parse::<u32>()
        .map(|n| (n + 1).to_string())
        .with_context(|| format!("parsing '{}'", s))
    })
    .collect_results(true)
    .run(vec!["41".to_string(), "x".to_string()])
    .unwrap();

  assert_eq!(report.failures.len(), 1);
  let message = &report.failures[0].message;
  assert!(message.starts_with("parsing 'x': "), "got {}", message);
  assert_eq!(report.into_results(), vec!["42".to_string()]);
}

#[test]
fn test_panicking_stage_does_not_lose_capacity() {
  setup_tracing();
  // One process, one thread: if a panic killed the worker, the run would stall.
  let report = quiet_map::<u32>(1)
    .pre(1, |x| {
      if x % 3 == 0 {
        panic!("boom on {}", x);
      }
      Ok(x)
    })
    .preload(2)
    .collect_results(true)
    .run((1..=30).collect())
    .unwrap();

  assert_eq!(report.outcome, RunOutcome::Completed);
  assert_eq!(report.completed, 30);
  assert_eq!(report.failures.len(), 10);
  assert!(report.failures[0].message.contains("panicked: boom on"));
  assert_eq!(report.results.as_ref().map(Vec::len), Some(20));
  let pre = report.processes[0].stages.get(Stage::Pre).copied().unwrap();
  assert_eq!(pre.processed, 30);
  assert_eq!(pre.failed, 10);
}

#[test]
#[serial]
fn test_fatal_policy_aborts_run() {
  setup_tracing();
  let result = quiet_map::<u64>(2)
    .pre(2, |x| {
      std::thread::sleep(Duration::from_millis(1));
      if x == 5 {
        anyhow::bail!("item five is fatal");
      }
      Ok(x)
    })
    .error_policy(ErrorPolicy::Fatal)
    .run((0..10_000).collect());

  match result {
    Err(BalmapError::Stage(e)) => {
      assert_eq!(e.stage, Stage::Pre);
      assert_eq!(e.message, "item five is fatal");
    }
    other => panic!("expected a fatal stage error, got {:?}", other.map(|r| r.outcome)),
  }
}

#[test]
fn test_invalid_options_are_rejected_before_spawning() {
  setup_tracing();
  let cases: Vec<(&str, balmap::BalmapResult<balmap::MapReport<u8>>)> = vec![
    ("n_procs", quiet_map::<u8>(0).run(vec![1])),
    ("preload", quiet_map::<u8>(1).preload(0).run(vec![1])),
    ("pool_preload", quiet_map::<u8>(1).pool_preload(0).run(vec![1])),
    ("intra_threads", quiet_map::<u8>(1).intra(0, Ok).run(vec![1])),
    ("poll_interval", quiet_map::<u8>(1).poll_interval(Duration::ZERO).run(vec![1])),
  ];

  for (field, result) in cases {
    match result {
      Err(BalmapError::Configuration { field: f, .. }) => assert_eq!(f, field),
      other => panic!("expected configuration error for {}, got {:?}", field, other.map(|r| r.outcome)),
    }
  }
}

#[test]
fn test_spawn_failure_surfaces_as_error() {
  setup_tracing();
  let result = quiet_map::<u8>(3)
    .pre(2, Ok)
    .thread_factory(refusing_factory("balmap-p1"))
    .run(vec![1, 2, 3]);

  match result {
    Err(BalmapError::Spawn { what, .. }) => assert_eq!(what, "worker process 1"),
    other => panic!("expected a spawn error, got {:?}", other.map(|r| r.outcome)),
  }
}

#[test]
fn test_anyhow_conversion_recovers_stage_errors() {
  let stage_err = StageError::new(Stage::Post, "write failed");
  let converted = BalmapError::from(anyhow::Error::new(stage_err.clone()));
  match converted {
    BalmapError::Stage(e) => assert_eq!(e, stage_err),
    other => panic!("expected Stage, got {:?}", other),
  }

  let other = BalmapError::from(anyhow::anyhow!("disk full"));
  assert!(matches!(other, BalmapError::Handler { .. }));
  assert!(other.to_string().contains("disk full"));
  assert_eq!(stage_err.to_string(), "Stage 'post' failed: write failed");
}

#[test]
fn test_failures_do_not_disturb_shutdown() {
  setup_tracing();
  let report = quiet_map::<u32>(3)
    .pre(2, |x| if x % 5 == 0 { Err(anyhow::anyhow!("skip {}", x)) } else { Ok(x) })
    .post(2, Ok)
    .run((0..50).collect())
    .unwrap();

  assert_eq!(report.outcome, RunOutcome::Completed);
  assert!(report.processes.iter().all(|p| p.shutdown == Shutdown::Drained));
  assert_eq!(report.processes.iter().map(|p| p.forwarded).sum::<usize>(), 50);
}
