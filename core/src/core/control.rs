// balmap/src/core/control.rs

//! Defines the messages carried on pipeline channels and the outcomes of a run.

use crate::error::StageError;

/// Out-of-band shutdown signal carried on the same channels as work items.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Control {
  /// Stop accepting items, let the ones already inside finish, then terminate.
  End,
  /// Stop immediately. Items still inside the pipeline are dropped.
  Kill,
}

/// Either a work item or a sentinel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message<T> {
  Item(T),
  End,
  Kill,
}

impl<T> Message<T> {
  pub fn is_sentinel(&self) -> bool {
    !matches!(self, Message::Item(_))
  }

  /// The sentinel carried by this message, if any.
  pub fn control(&self) -> Option<Control> {
    match self {
      Message::Item(_) => None,
      Message::End => Some(Control::End),
      Message::Kill => Some(Control::Kill),
    }
  }
}

impl<T> From<Control> for Message<T> {
  fn from(control: Control) -> Self {
    match control {
      Control::End => Message::End,
      Control::Kill => Message::Kill,
    }
  }
}

/// Result envelope an item travels in once it has entered a pipeline.
/// A failed item keeps flowing as `Err` so stages never silently lose it.
pub type Outcome<T> = Result<T, StageError>;

/// What traverses the channels between stage pools.
pub type Packet<T> = Message<Outcome<T>>;

/// How a worker process left its run loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Shutdown {
  /// Received `End`, let every stage finish and forwarded the remaining items.
  Drained,
  /// Received `Kill`; in-flight items were abandoned.
  Killed,
  /// A channel it depends on was closed underneath it; treated like `Kill`.
  Disconnected,
}

/// Outcome of a full `map` run, from the driver's point of view.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunOutcome {
  /// Every backlog item came back (successfully or as a recorded failure).
  Completed,
  /// The caller tripped the [`AbortHandle`](crate::dispatch::interrupt::AbortHandle).
  Aborted,
  /// SIGINT reached the driver.
  Interrupted,
  /// The driver hit an unexpected failure and tore the pool down.
  Failed(String),
}

impl RunOutcome {
  pub fn is_completed(&self) -> bool {
    matches!(self, RunOutcome::Completed)
  }
}
