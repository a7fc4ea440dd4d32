// balmap/src/core/credit.rs

//! In-flight accounting for a single boundary (one worker process, or the whole pool).

use tracing::{event, Level};

/// Counts items admitted into a boundary that have not left it yet.
///
/// Invariant: `0 <= in_flight <= limit`. `acquire` refuses once the limit is
/// reached and `release` refuses when nothing is held, so a caller that
/// checks the return values can never break it.
#[derive(Debug, Clone)]
pub struct Credit {
  limit: usize,
  in_flight: usize,
  high_water: usize,
}

impl Credit {
  pub fn new(limit: usize) -> Self {
    Self {
      limit,
      in_flight: 0,
      high_water: 0,
    }
  }

  pub fn has_room(&self) -> bool {
    self.in_flight < self.limit
  }

  /// Takes one unit of credit. Returns `false` if the boundary is full.
  pub fn acquire(&mut self) -> bool {
    if !self.has_room() {
      return false;
    }
    self.in_flight += 1;
    self.high_water = self.high_water.max(self.in_flight);
    true
  }

  /// Gives one unit of credit back. Returns `false` if nothing was held.
  pub fn release(&mut self) -> bool {
    if self.in_flight == 0 {
      event!(Level::ERROR, limit = self.limit, "Credit released with nothing in flight.");
      return false;
    }
    self.in_flight -= 1;
    true
  }

  pub fn in_flight(&self) -> usize {
    self.in_flight
  }

  pub fn limit(&self) -> usize {
    self.limit
  }

  /// Largest `in_flight` value ever observed.
  pub fn high_water(&self) -> usize {
    self.high_water
  }

  /// Drops every held unit, returning how many there were.
  pub fn forfeit(&mut self) -> usize {
    std::mem::take(&mut self.in_flight)
  }
}
