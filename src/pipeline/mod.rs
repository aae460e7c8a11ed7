// src/pipeline/mod.rs

//! Refresh pipeline stages: the scheduler tick that enqueues due items
//! and the worker cycle that executes claimed entries.

pub mod tick;
pub mod worker;

pub use tick::{run_tick, TickSummary};
pub use worker::{CycleSummary, RefreshWorker};
