// balmap/src/core/stage.rs

//! The three pipeline stages and a fixed-size container indexed by them.

use std::fmt;
use std::str::FromStr;

use crate::error::BalmapError;

/// One of the three optional transformation steps of a worker pipeline.
///
/// Items always flow in declaration order: `Pre` → `Intra` → `Post`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Stage {
  Pre,
  Intra,
  Post,
}

impl Stage {
  /// All stages in pipeline order.
  pub const ALL: [Stage; 3] = [Stage::Pre, Stage::Intra, Stage::Post];

  pub fn index(self) -> usize {
    match self {
      Stage::Pre => 0,
      Stage::Intra => 1,
      Stage::Post => 2,
    }
  }

  pub fn name(self) -> &'static str {
    match self {
      Stage::Pre => "pre",
      Stage::Intra => "intra",
      Stage::Post => "post",
    }
  }
}

impl fmt::Display for Stage {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.name())
  }
}

impl FromStr for Stage {
  type Err = BalmapError;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    match s {
      "pre" => Ok(Stage::Pre),
      "intra" => Ok(Stage::Intra),
      "post" => Ok(Stage::Post),
      other => Err(BalmapError::configuration(
        "stage",
        format!("unknown stage name '{}', expected one of pre, intra, post", other),
      )),
    }
  }
}

/// A slot per [`Stage`], each optionally occupied.
///
/// Iteration always visits occupied slots in pipeline order, which is what
/// the controller relies on when chaining pools and sending sentinels.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Stages<V>([Option<V>; 3]);

impl<V> Stages<V> {
  pub fn new() -> Self {
    Stages([None, None, None])
  }

  pub fn get(&self, stage: Stage) -> Option<&V> {
    self.0[stage.index()].as_ref()
  }

  pub fn get_mut(&mut self, stage: Stage) -> Option<&mut V> {
    self.0[stage.index()].as_mut()
  }

  /// Occupies the slot for `stage`, returning the previous occupant.
  pub fn set(&mut self, stage: Stage, value: V) -> Option<V> {
    self.0[stage.index()].replace(value)
  }

  pub fn take(&mut self, stage: Stage) -> Option<V> {
    self.0[stage.index()].take()
  }

  pub fn contains(&self, stage: Stage) -> bool {
    self.0[stage.index()].is_some()
  }

  pub fn len(&self) -> usize {
    self.0.iter().filter(|slot| slot.is_some()).count()
  }

  pub fn is_empty(&self) -> bool {
    self.len() == 0
  }

  /// Occupied slots in pipeline order.
  pub fn iter(&self) -> impl Iterator<Item = (Stage, &V)> + '_ {
    Stage::ALL
      .into_iter()
      .filter_map(move |stage| self.get(stage).map(|v| (stage, v)))
  }

  /// Calls `f` on whichever stages are present, in pipeline order.
  pub fn apply(&self, mut f: impl FnMut(Stage, &V)) {
    for (stage, value) in self.iter() {
      f(stage, value);
    }
  }

  pub fn map<U>(&self, mut f: impl FnMut(Stage, &V) -> U) -> Stages<U> {
    let mut out = Stages::new();
    for (stage, value) in self.iter() {
      out.set(stage, f(stage, value));
    }
    out
  }

  /// Consumes the container, yielding occupied slots in pipeline order.
  pub fn into_entries(self) -> impl Iterator<Item = (Stage, V)> {
    Stage::ALL
      .into_iter()
      .zip(self.0)
      .filter_map(|(stage, slot)| slot.map(|v| (stage, v)))
  }
}

impl<V> Default for Stages<V> {
  fn default() -> Self {
    Self::new()
  }
}
