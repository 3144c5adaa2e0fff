//! Stage notifications for long-running project runs.

use mdo_driver::DriverProgressEvent;
use mdo_results::RunType;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunStage {
    LoadingProject,
    CheckingCache,
    LoadingCachedResult,
    CompilingModel,
    Evaluating,
    Optimizing,
    SavingResults,
    Completed,
}

#[derive(Debug, Clone)]
pub struct RunProgressEvent {
    pub run_type: RunType,
    pub stage: RunStage,
    pub elapsed_wall_s: f64,
    pub message: Option<String>,
    /// Set while optimizing, one per driver notification.
    pub driver: Option<DriverProgressEvent>,
}

impl RunProgressEvent {
    pub fn stage(
        run_type: RunType,
        stage: RunStage,
        elapsed_wall_s: f64,
        message: Option<String>,
    ) -> Self {
        Self {
            run_type,
            stage,
            elapsed_wall_s,
            message,
            driver: None,
        }
    }
}
