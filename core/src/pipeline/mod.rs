// balmap/src/pipeline/mod.rs

//! Defines the per-process pipeline: stage configuration, stage workers and
//! pools, and the controller that chains them and enforces the in-flight budget.

pub mod config;
pub mod controller;
pub mod pool;
pub mod worker;

// Re-export the main pipeline types
pub use config::{PipelineConfig, StageConfig, StageFn, ThreadFactory};
pub use controller::{ControllerState, PipelineController, ProcessReport};
pub use pool::StagePool;
pub use worker::{StageWorker, WorkerStats};
