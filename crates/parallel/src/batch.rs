//! Batch execution with per-unit failure isolation
//!
//! Units are independent: one failing unit is logged and recorded, the rest
//! still run, and nothing a failed unit touched is shared with the others.

use crate::strategy::{ParallelStrategy, ProcessingMode};
use aohcalc_core::{Error, Result};
use tracing::{info, warn};

/// Result of one unit of a batch
#[derive(Debug)]
pub struct UnitOutcome<T> {
    pub label: String,
    pub result: Result<T>,
}

/// Outcomes of every unit, in input order
#[derive(Debug)]
pub struct BatchReport<T> {
    pub outcomes: Vec<UnitOutcome<T>>,
}

impl<T> BatchReport<T> {
    pub fn succeeded(&self) -> usize {
        self.outcomes.iter().filter(|o| o.result.is_ok()).count()
    }

    pub fn failed(&self) -> usize {
        self.outcomes.len() - self.succeeded()
    }

    /// Labels and errors of the failed units
    pub fn failures(&self) -> impl Iterator<Item = (&str, &Error)> {
        self.outcomes
            .iter()
            .filter_map(|o| o.result.as_ref().err().map(|e| (o.label.as_str(), e)))
    }
}

/// Run `work` over every unit under `mode`, isolating failures.
///
/// `label` names a unit in logs and in the report.
pub fn run_batch<U, T, L, F>(mode: ProcessingMode, units: &[U], label: L, work: F) -> Result<BatchReport<T>>
where
    U: Sync,
    T: Send,
    L: Fn(&U) -> String + Sync + Send,
    F: Fn(&U) -> Result<T> + Sync + Send,
{
    info!(units = units.len(), ?mode, "starting batch");
    let outcomes = mode.par_map(0..units.len(), |i| {
        let unit = &units[i];
        let label = label(unit);
        let result = work(unit);
        match &result {
            Ok(_) => info!(unit = %label, "unit finished"),
            Err(e) => warn!(unit = %label, error = %e, "unit failed"),
        }
        UnitOutcome { label, result }
    })?;

    let report = BatchReport { outcomes };
    info!(
        succeeded = report.succeeded(),
        failed = report.failed(),
        "batch finished"
    );
    Ok(report)
}
