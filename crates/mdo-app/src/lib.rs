//! Shared application service layer for the MDO workspace.
//!
//! Turns project files into runnable graphs and optimization problems, runs
//! them with progress reporting, and caches results in the run store next to
//! the project file.

pub mod compile;
pub mod error;
pub mod factory;
pub mod progress;
pub mod project_service;
pub mod query;
pub mod run_service;

pub use compile::{CompiledProject, build_component, compile_project};
pub use error::{AppError, AppResult};
pub use factory::{ComponentFactory, ComponentParams};
pub use progress::{RunProgressEvent, RunStage};
pub use project_service::{
    ProjectSummary, load_project, save_project, summarize, validate_project,
};
pub use query::{
    RunSummary, constraint_series, get_run_summary, list_variable_paths, objective_series,
    variable_series,
};
pub use run_service::{
    RunOptions, RunRequest, RunResponse, RunTimingSummary, list_runs, load_run, run_loaded,
    run_project, run_project_with_progress,
};
