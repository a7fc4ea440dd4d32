// balmap/src/dispatch/mod.rs

//! The process pool: the dispatcher that owns the worker processes and the
//! driver that feeds them and runs the shutdown protocol.

pub mod dispatcher;
pub mod driver;
pub mod interrupt;

pub use dispatcher::Dispatcher;
pub use driver::{Driver, ErrorPolicy, MapReport};
pub use interrupt::{AbortHandle, InterruptWatch};
