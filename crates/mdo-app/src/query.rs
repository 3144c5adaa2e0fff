//! Query helpers for extracting data from loaded runs.

use mdo_results::IterateRecord;

use crate::error::{AppError, AppResult};

/// Summary of a run's history.
#[derive(Debug, Clone, PartialEq)]
pub struct RunSummary {
    pub record_count: usize,
    pub evaluations: u64,
    pub elapsed_s: f64,
    pub variable_count: usize,
    pub design_paths: Vec<String>,
    pub constraint_labels: Vec<String>,
    /// Objective of the last record, if the run was an optimization.
    pub final_objective: Option<f64>,
    pub final_max_violation: f64,
}

pub fn get_run_summary(records: &[IterateRecord]) -> AppResult<RunSummary> {
    let (Some(first), Some(last)) = (records.first(), records.last()) else {
        return Err(AppError::InvalidInput("No records in run".to_string()));
    };

    Ok(RunSummary {
        record_count: records.len(),
        evaluations: last.evaluation,
        elapsed_s: last.elapsed_s,
        variable_count: first.variables.len(),
        design_paths: first.design.iter().map(|d| d.path.clone()).collect(),
        constraint_labels: first.constraints.iter().map(|c| c.label.clone()).collect(),
        final_objective: last.objective,
        final_max_violation: last.max_violation,
    })
}

/// Paths of all variables captured in a run.
pub fn list_variable_paths(records: &[IterateRecord]) -> Vec<String> {
    records
        .first()
        .map(|r| r.variables.iter().map(|v| v.path.clone()).collect())
        .unwrap_or_default()
}

/// Objective per record as `(index, objective)`.
pub fn objective_series(records: &[IterateRecord]) -> AppResult<Vec<(usize, f64)>> {
    let series: Vec<_> = records
        .iter()
        .filter_map(|r| r.objective.map(|f| (r.index, f)))
        .collect();
    if series.is_empty() && !records.is_empty() {
        return Err(AppError::InvalidInput(
            "Run has no objective history".to_string(),
        ));
    }
    Ok(series)
}

/// Entry `index` of variable `path` per record as `(index, value)`.
pub fn variable_series(
    records: &[IterateRecord],
    path: &str,
    index: usize,
) -> AppResult<Vec<(usize, f64)>> {
    let mut series = Vec::with_capacity(records.len());
    for record in records {
        let value = record
            .variable(path)
            .ok_or_else(|| AppError::InvalidInput(format!("Unknown variable: {path}")))?;
        let v = value.get(index).copied().ok_or_else(|| {
            AppError::InvalidInput(format!(
                "Index {index} out of range for '{path}' of size {}",
                value.len()
            ))
        })?;
        series.push((record.index, v));
    }
    Ok(series)
}

/// Value of constraint `label` per record as `(index, value)`.
pub fn constraint_series(records: &[IterateRecord], label: &str) -> AppResult<Vec<(usize, f64)>> {
    records
        .iter()
        .map(|r| {
            r.constraints
                .iter()
                .find(|c| c.label == label)
                .map(|c| (r.index, c.value))
                .ok_or_else(|| AppError::InvalidInput(format!("Unknown constraint: {label}")))
        })
        .collect()
}
