//! Merge engine
//!
//! Two-phase pattern:
//! 1. Plan - choose the next `WorkUnit` from the ready set (pure, testable)
//! 2. Execute - rebase, wait for CI and merge (effectful)

mod execute;
mod pipeline;
mod plan;

pub use execute::{BatchReport, ExecutionReport, MergeExecutor, SingleOutcome, batch_title};
pub use pipeline::{PipelineOutcome, wait_for_pipeline};
pub use plan::{WorkUnit, compose, next_unit, selection_order};
