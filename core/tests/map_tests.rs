// tests/map_tests.rs
mod common;

use balmap::{map, MapOptions, RunOutcome, Shutdown, Stage, StageConfig};
use common::*;
use std::sync::atomic::Ordering;
use std::time::Duration;

#[test]
fn test_two_stage_scenario_yields_expected_multiset() {
  setup_tracing();
  let report = quiet_map::<i64>(2)
    .pre(3, |x| Ok(x * 2))
    .intra(1, |x| Ok(x + 1))
    .collect_results(true)
    .run(vec![0, 1, 2, 3, 4, 5])
    .unwrap();

  assert_eq!(report.outcome, RunOutcome::Completed);
  assert_eq!(report.completed, 6);
  assert!(report.failures.is_empty());
  assert_eq!(sorted(report.into_results()), vec![1, 3, 5, 7, 9, 11]);
}

#[test]
fn test_pass_through_pool_returns_input_multiset() {
  setup_tracing();
  let report = quiet_map::<String>(1)
    .collect_results(true)
    .run(vec!["a".to_string(), "b".to_string(), "c".to_string()])
    .unwrap();

  assert_eq!(report.outcome, RunOutcome::Completed);
  assert_eq!(sorted(report.into_results()), vec!["a", "b", "c"]);
}

#[test]
fn test_pass_through_preserves_duplicates_across_processes() {
  setup_tracing();
  let data: Vec<u32> = (0..500).map(|i| i % 37).collect();
  let report = quiet_map::<u32>(4).collect_results(true).run(data.clone()).unwrap();

  assert_eq!(report.completed, data.len());
  assert_eq!(report.submitted, data.len());
  assert_eq!(sorted(report.into_results()), sorted(data));
}

#[test]
fn test_identity_stage_round_trip() {
  setup_tracing();
  for threads in [1, 4] {
    let report = quiet_map::<u32>(2)
      .pre(threads, Ok)
      .collect_results(true)
      .run((1..=100).collect())
      .unwrap();

    let results = report.into_results();
    assert_eq!(results.len(), 100);
    assert_eq!(sorted(results), (1..=100).collect::<Vec<_>>());
  }
}

#[test]
fn test_stages_apply_in_pipeline_order() {
  setup_tracing();
  // Order matters: ((x + 1) * 10) - 3 differs from any other ordering.
  let report = quiet_map::<i64>(2)
    .post(2, |x| Ok(x - 3))
    .pre(2, |x| Ok(x + 1))
    .intra(2, |x| Ok(x * 10))
    .collect_results(true)
    .run(vec![0, 1, 2])
    .unwrap();

  assert_eq!(sorted(report.into_results()), vec![7, 17, 27]);
}

#[test]
fn test_skipped_middle_stage_links_pre_to_post() {
  setup_tracing();
  let report = quiet_map::<i64>(1)
    .pre(2, |x| Ok(x * 3))
    .post(1, |x| Ok(x + 1))
    .collect_results(true)
    .run((0..10).collect())
    .unwrap();

  let expected: Vec<i64> = (0..10).map(|x| x * 3 + 1).collect();
  assert_eq!(sorted(report.into_results()), expected);
}

#[test]
fn test_stage_arguments_are_passed_to_every_call() {
  setup_tracing();
  let report = quiet_map::<i64>(2)
    .pre_with_args(2, |x, (mul, add): &(i64, i64)| Ok(x * mul + add), (5, 2))
    .collect_results(true)
    .run(vec![1, 2, 3])
    .unwrap();

  assert_eq!(sorted(report.into_results()), vec![7, 12, 17]);
}

#[test]
fn test_stage_named_enables_stage_by_name() {
  setup_tracing();
  let report = quiet_map::<i64>(1)
    .stage_named("intra", StageConfig::new(|x: i64| Ok(-x)))
    .unwrap()
    .collect_results(true)
    .run(vec![1, 2])
    .unwrap();

  assert_eq!(sorted(report.into_results()), vec![-2, -1]);
  assert!(quiet_map::<i64>(1).stage_named("middle", StageConfig::new(Ok)).is_err());
}

#[test]
fn test_results_not_collected_by_default() {
  setup_tracing();
  let report = quiet_map::<u8>(2).pre(1, Ok).run(vec![1, 2, 3]).unwrap();

  assert!(report.results.is_none());
  assert_eq!(report.completed, 3);
  assert_eq!(report.outcome, RunOutcome::Completed);
}

#[test]
fn test_empty_backlog_terminates_cleanly() {
  setup_tracing();
  let report = quiet_map::<u8>(3).pre(2, Ok).collect_results(true).run(Vec::new()).unwrap();

  assert_eq!(report.outcome, RunOutcome::Completed);
  assert_eq!(report.results, Some(Vec::new()));
  assert_eq!(report.processes.len(), 3);
  assert!(report.processes.iter().all(|p| p.shutdown == Shutdown::Drained));
}

#[test]
fn test_progress_sink_updates_once_per_item_and_closes_once() {
  setup_tracing();
  let progress = RecordingProgress::default();
  let report = quiet_map::<u32>(2)
    .pre(2, Ok)
    .progress(progress.clone())
    .run((0..57).collect())
    .unwrap();

  assert_eq!(report.completed, 57);
  assert_eq!(progress.begun_with.load(Ordering::SeqCst), 57);
  assert_eq!(progress.updates.load(Ordering::SeqCst), 57);
  assert_eq!(progress.closes.load(Ordering::SeqCst), 1);
}

#[test]
fn test_in_flight_never_exceeds_budgets() {
  setup_tracing();
  let preload = 3;
  let pool_preload = 5;
  let report = quiet_map::<u64>(3)
    .pre(4, slow_identity(Duration::from_millis(2)))
    .intra(2, slow_identity(Duration::from_millis(1)))
    .preload(preload)
    .pool_preload(pool_preload)
    .collect_results(true)
    .run((0..120).collect())
    .unwrap();

  assert_eq!(report.completed, 120);
  assert_eq!(report.pool_preload, pool_preload);
  assert!(report.pool_high_water <= pool_preload);
  assert!(report.pool_high_water > 0);
  for process in &report.processes {
    assert_eq!(process.preload, preload);
    assert!(process.high_water <= preload, "process {} held {}", process.process, process.high_water);
  }
}

#[test]
fn test_stage_concurrency_bounded_by_process_preload() {
  setup_tracing();
  // One process, a wide pool and a tiny budget: the pool can never be saturated.
  let concurrency = Concurrency::default();
  let probe = concurrency.clone();
  let report = quiet_map::<u64>(1)
    .pre(8, move |x| {
      probe.enter();
      std::thread::sleep(Duration::from_millis(3));
      probe.exit();
      Ok(x)
    })
    .preload(2)
    .run((0..40).collect())
    .unwrap();

  assert_eq!(report.completed, 40);
  assert!(concurrency.peak() <= 2, "peak concurrency {}", concurrency.peak());
}

#[test]
fn test_default_pool_preload_is_twice_procs_times_preload() {
  let options = MapOptions::<u8>::default();
  assert_eq!(options.preload, 10);
  assert_eq!(options.resolved_pool_preload(3), 60);

  let report = quiet_map::<u8>(2).preload(4).run(vec![1, 2, 3]).unwrap();
  assert_eq!(report.pool_preload, 16);
}

#[test]
fn test_free_function_entry_point() {
  setup_tracing();
  let mut options = MapOptions::default();
  options.stages.set(Stage::Pre, StageConfig::new(|s: String| Ok(s.to_uppercase())).threads(2));
  options.stages.set(Stage::Post, StageConfig::new(|s: String| Ok(format!("<{}>", s))));
  options.collect_results = true;
  options.progress = Some(Box::new(balmap::NoProgress));
  options.catch_interrupts = false;

  let report = map(2, vec!["x".to_string(), "y".to_string()], options).unwrap();
  assert_eq!(sorted(report.into_results()), vec!["<X>", "<Y>"]);
}

#[test]
fn test_process_reports_account_for_every_item() {
  setup_tracing();
  let report = quiet_map::<u32>(3)
    .pre(2, Ok)
    .post(3, Ok)
    .run((0..90).collect())
    .unwrap();

  assert_eq!(report.processes.len(), 3);
  let admitted: usize = report.processes.iter().map(|p| p.admitted).sum();
  let forwarded: usize = report.processes.iter().map(|p| p.forwarded).sum();
  let pre_processed: usize = report
    .processes
    .iter()
    .map(|p| p.stages.get(Stage::Pre).map_or(0, |s| s.processed))
    .sum();
  let post_processed: usize = report
    .processes
    .iter()
    .map(|p| p.stages.get(Stage::Post).map_or(0, |s| s.processed))
    .sum();

  assert_eq!(admitted, 90);
  assert_eq!(forwarded, 90);
  assert_eq!(pre_processed, 90);
  assert_eq!(post_processed, 90);
  assert!(report.processes.iter().all(|p| p.abandoned == 0));
  assert!(report.processes.iter().all(|p| !p.stages.contains(Stage::Intra)));
}
