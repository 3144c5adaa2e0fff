//! Error types for the optimization driver.

use mdo_core::MdoError;
use mdo_derivs::DerivError;
use mdo_solver::SolverError;
use thiserror::Error;

/// Errors that stop an optimization before or outside its loop.
///
/// Failures of individual candidates are not errors: they are rejected and
/// reported through the run status and progress events.
#[derive(Error, Debug, Clone)]
pub enum DriverError {
    #[error("Invalid driver configuration: {what}")]
    Config { what: String },

    #[error("Invalid problem definition: {what}")]
    Problem { what: String },

    #[error(transparent)]
    Solver(#[from] SolverError),

    #[error(transparent)]
    Deriv(#[from] DerivError),
}

pub type DriverResult<T> = Result<T, DriverError>;

impl DriverError {
    pub(crate) fn config(what: impl Into<String>) -> Self {
        DriverError::Config { what: what.into() }
    }

    pub(crate) fn problem(what: impl Into<String>) -> Self {
        DriverError::Problem { what: what.into() }
    }
}

impl From<MdoError> for DriverError {
    fn from(e: MdoError) -> Self {
        DriverError::Problem {
            what: e.to_string(),
        }
    }
}
