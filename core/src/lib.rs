// balmap/src/lib.rs

//! Balmap: a balanced, two-level parallel map.
//!
//! Items are spread over a pool of worker processes. Inside each process an
//! item flows through up to three stages (`pre` → `intra` → `post`), each with
//! its own thread pool, so IO-heavy and CPU-heavy steps can be sized
//! independently:
//!  - Per-process backpressure (`preload`) and pool-wide backpressure (`pool_preload`).
//!  - Graceful shutdown with `End` sentinels, forced shutdown with `Kill`.
//!  - Worker processes ignore SIGINT; the driver turns it into a forced abort.
//!  - A failing or panicking stage function only fails its own item; the
//!    driver either records it or aborts the run, per [`ErrorPolicy`].
//!  - Pluggable progress reporting.

pub mod core;
pub mod dispatch;
pub mod error;
pub mod map;
pub mod pipeline;
pub mod progress;

// --- Re-exports for the Public API ---

pub use crate::core::control::{Control, Message, Outcome, RunOutcome, Shutdown};
pub use crate::core::stage::{Stage, Stages};

pub use crate::pipeline::config::{PipelineConfig, StageConfig, StageFn, ThreadFactory};
pub use crate::pipeline::controller::ProcessReport;

pub use crate::dispatch::dispatcher::Dispatcher;
pub use crate::dispatch::driver::{Driver, ErrorPolicy, MapReport};
pub use crate::dispatch::interrupt::AbortHandle;

pub use crate::map::{map, BalancedMap, MapOptions};
pub use crate::progress::{ConsoleProgress, NoProgress, ProgressSink};

pub use crate::error::{BalmapError, BalmapResult, StageError};

/*
    Core Workflow:
    1. Pick the stages you need and give each a function `Fn(T) -> anyhow::Result<T>`
       and a thread count (`pre` for IO-bound loading, `intra` for CPU-bound work, ...).
    2. Call `BalancedMap::new(n_procs)`, chain the stages and budgets, and `run(data)`.
    3. The driver submits items under `pool_preload`, each worker process admits
       them under `preload`, and finished items come back in completion order.
    4. Inspect the returned `MapReport`: results (if collected), failures, outcome,
       and per-process counters.
*/
