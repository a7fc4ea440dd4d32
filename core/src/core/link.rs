// balmap/src/core/link.rs

//! Channel plumbing shared by the controller, the pools, and the dispatcher.

use crossbeam_channel::{unbounded, Receiver, Sender};

use crate::core::control::{Control, Message};

/// Both ends of one unbounded channel, kept together so the same channel
/// can be handed out as one stage's output and the next stage's input.
#[derive(Debug)]
pub struct Link<P> {
  tx: Sender<P>,
  rx: Receiver<P>,
}

impl<P> Link<P> {
  pub fn new() -> Self {
    let (tx, rx) = unbounded();
    Self { tx, rx }
  }

  pub fn sender(&self) -> &Sender<P> {
    &self.tx
  }

  pub fn receiver(&self) -> &Receiver<P> {
    &self.rx
  }

  /// True when both links refer to the very same channel object.
  pub fn same_channel(&self, other: &Link<P>) -> bool {
    self.tx.same_channel(&other.tx)
  }

  pub fn len(&self) -> usize {
    self.rx.len()
  }

  pub fn is_empty(&self) -> bool {
    self.rx.is_empty()
  }
}

impl<P> Clone for Link<P> {
  fn clone(&self) -> Self {
    Self {
      tx: self.tx.clone(),
      rx: self.rx.clone(),
    }
  }
}

impl<P> Default for Link<P> {
  fn default() -> Self {
    Self::new()
  }
}

/// Sends `count` copies of `control` down `tx`.
///
/// Returns how many were actually sent; fewer than `count` means every
/// receiver is already gone.
pub fn broadcast<T>(tx: &Sender<Message<T>>, control: Control, count: usize) -> usize {
  (0..count)
    .take_while(|_| tx.send(Message::from(control)).is_ok())
    .count()
}
