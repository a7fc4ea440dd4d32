// balmap/src/progress.rs

//! Progress reporting collaborators for the driver.

use std::io::{self, Write};
use std::time::{Duration, Instant};

/// Receives progress notifications from the driver.
///
/// `update` is called exactly once per completed item (successful or failed),
/// `killed` once per worker process that was shut down by force, and `close`
/// exactly once when the run is torn down. The driver never keeps progress
/// state of its own beyond what it passes here.
pub trait ProgressSink: Send {
  /// Called once before the first item is submitted.
  fn begin(&mut self, _total: usize) {}

  fn update(&mut self);

  /// A worker process was killed, dropping `abandoned` in-flight items.
  fn killed(&mut self, _process: usize, _abandoned: usize) {}

  fn close(&mut self);
}

/// Discards all progress notifications.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoProgress;

impl ProgressSink for NoProgress {
  fn update(&mut self) {}

  fn close(&mut self) {}
}

/// Weight of the newest sample in the smoothed rate.
const RATE_SMOOTHING: f64 = 0.1;

/// Minimum time between two redraws of the progress line.
const REDRAW_INTERVAL: Duration = Duration::from_millis(100);

/// A single-line progress reporter on stderr: count, percentage, elapsed time
/// and an exponentially smoothed rate.
#[derive(Debug)]
pub struct ConsoleProgress {
  total: usize,
  done: usize,
  started: Instant,
  last_tick: Instant,
  last_draw: Option<Instant>,
  rate: Option<f64>,
  closed: bool,
}

impl ConsoleProgress {
  pub fn new() -> Self {
    let now = Instant::now();
    Self {
      total: 0,
      done: 0,
      started: now,
      last_tick: now,
      last_draw: None,
      rate: None,
      closed: false,
    }
  }

  pub fn done(&self) -> usize {
    self.done
  }

  /// Items per second, smoothed.
  pub fn rate(&self) -> Option<f64> {
    self.rate
  }

  fn render(&self) -> String {
    let elapsed = self.started.elapsed().as_secs();
    let rate = self.rate.map_or_else(|| "?".to_string(), |r| format!("{:.2}", r));
    if self.total == 0 {
      return format!("{} [{:02}:{:02}, {} it/s]", self.done, elapsed / 60, elapsed % 60, rate);
    }
    let percent = self.done * 100 / self.total;
    format!(
      "{:3}% {}/{} [{:02}:{:02}, {} it/s]",
      percent,
      self.done,
      self.total,
      elapsed / 60,
      elapsed % 60,
      rate
    )
  }

  fn draw(&mut self, now: Instant) {
    self.last_draw = Some(now);
    let mut stderr = io::stderr().lock();
    // Progress output is best-effort; a closed stderr must not fail the run.
    let _ = write!(stderr, "\r{}", self.render());
    let _ = stderr.flush();
  }
}

impl Default for ConsoleProgress {
  fn default() -> Self {
    Self::new()
  }
}

impl ProgressSink for ConsoleProgress {
  fn begin(&mut self, total: usize) {
    let now = Instant::now();
    self.total = total;
    self.started = now;
    self.last_tick = now;
    self.draw(now);
  }

  fn update(&mut self) {
    let now = Instant::now();
    let dt = now.duration_since(self.last_tick).as_secs_f64();
    self.last_tick = now;
    self.done += 1;
    if dt > 0.0 {
      let sample = 1.0 / dt;
      self.rate = Some(match self.rate {
        Some(rate) => RATE_SMOOTHING * sample + (1.0 - RATE_SMOOTHING) * rate,
        None => sample,
      });
    }
    let due = self
      .last_draw
      .map_or(true, |last| now.duration_since(last) >= REDRAW_INTERVAL);
    if due || self.done == self.total {
      self.draw(now);
    }
  }

  fn killed(&mut self, process: usize, abandoned: usize) {
    let mut stderr = io::stderr().lock();
    let _ = writeln!(stderr, "\nProcess {} killed ({} in-flight items dropped)", process, abandoned);
    let _ = stderr.flush();
  }

  fn close(&mut self) {
    if self.closed {
      return;
    }
    self.closed = true;
    self.draw(Instant::now());
    let _ = writeln!(io::stderr());
  }
}
