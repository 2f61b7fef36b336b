//! # aohcalc parallel
//!
//! Scheduling of independent units of work.
//!
//! Parallelism is only ever applied across units (species, habitat classes,
//! summary workers), never inside one streamed pass, so per-unit results are
//! reproducible regardless of thread count.

pub mod batch;
pub mod strategy;

pub use batch::{run_batch, BatchReport, UnitOutcome};
pub use strategy::{num_cpus, ParallelStrategy, ProcessingMode};
