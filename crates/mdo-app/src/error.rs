//! Error types for the mdo-app service layer.

use std::path::PathBuf;

/// Errors of the service layer, wrapping those of the backend crates.
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("Project error: {0}")]
    Project(String),

    #[error("Failed to read project file: {path}")]
    ProjectFileRead {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Unsupported project file extension: {path}")]
    UnsupportedFormat { path: PathBuf },

    #[error("Unknown component type '{type_name}' for component '{component}'")]
    UnknownComponentType { component: String, type_name: String },

    #[error("Model compilation failed: {0}")]
    Compile(String),

    #[error("Solver error: {0}")]
    Solver(String),

    #[error("Driver error: {0}")]
    Driver(String),

    #[error("Results error: {0}")]
    Results(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Run not found: {0}")]
    RunNotFound(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for mdo-app operations.
pub type AppResult<T> = Result<T, AppError>;

impl From<mdo_project::ProjectError> for AppError {
    fn from(err: mdo_project::ProjectError) -> Self {
        AppError::Project(err.to_string())
    }
}

impl From<mdo_graph::GraphError> for AppError {
    fn from(err: mdo_graph::GraphError) -> Self {
        AppError::Compile(err.to_string())
    }
}

impl From<mdo_components::ComponentError> for AppError {
    fn from(err: mdo_components::ComponentError) -> Self {
        AppError::Compile(err.to_string())
    }
}

impl From<mdo_core::MdoError> for AppError {
    fn from(err: mdo_core::MdoError) -> Self {
        AppError::Compile(err.to_string())
    }
}

impl From<mdo_solver::SolverError> for AppError {
    fn from(err: mdo_solver::SolverError) -> Self {
        AppError::Solver(err.to_string())
    }
}

impl From<mdo_driver::DriverError> for AppError {
    fn from(err: mdo_driver::DriverError) -> Self {
        AppError::Driver(err.to_string())
    }
}

impl From<mdo_results::ResultsError> for AppError {
    fn from(err: mdo_results::ResultsError) -> Self {
        match err {
            mdo_results::ResultsError::RunNotFound { run_id } => AppError::RunNotFound(run_id),
            other => AppError::Results(other.to_string()),
        }
    }
}
