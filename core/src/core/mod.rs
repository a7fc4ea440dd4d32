pub mod control;
pub mod credit;
pub mod link;
pub mod stage;

// Re-export key types for easier access from other balmap modules (and lib.rs)
pub use control::{Control, Message, Outcome, Packet, RunOutcome, Shutdown};
pub use credit::Credit;
pub use link::Link;
pub use stage::{Stage, Stages};
