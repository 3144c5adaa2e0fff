//! Result data types.

use serde::{Deserialize, Serialize};

pub type RunId = String;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RunManifest {
    pub run_id: RunId,
    pub problem_name: String,
    pub timestamp: String,
    pub run_type: RunType,
    pub solver_version: String,
    pub status: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub algorithm: Option<String>,
    pub evaluations: u64,
    pub iterations: usize,
    pub elapsed_s: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub best_objective: Option<f64>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub message: String,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type")]
pub enum RunType {
    /// One evaluation of the model at its stored inputs.
    Analysis,
    Optimization,
}

/// One accepted iterate, stored as a line of `history.jsonl`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct IterateRecord {
    pub index: usize,
    pub evaluation: u64,
    pub elapsed_s: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub objective: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub merit: Option<f64>,
    pub max_violation: f64,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub design: Vec<VariableSnapshot>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub constraints: Vec<ResponseSnapshot>,
    /// Every variable of the model.
    #[serde(default)]
    pub variables: Vec<VariableSnapshot>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub unconverged: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub frozen: Vec<String>,
}

impl IterateRecord {
    pub fn variable(&self, path: &str) -> Option<&[f64]> {
        self.variables
            .iter()
            .find(|v| v.path == path)
            .map(|v| v.value.as_slice())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct VariableSnapshot {
    pub path: String,
    pub value: Vec<f64>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ResponseSnapshot {
    pub label: String,
    pub value: f64,
}
