//! Error types for total derivatives.

use mdo_core::MdoError;
use mdo_solver::SolverError;
use thiserror::Error;

#[derive(Error, Debug, Clone)]
pub enum DerivError {
    /// Some requested design variables reach a requested response only
    /// through components that cannot provide derivatives. The remaining
    /// design variables can be differentiated on their own.
    #[error("Derivatives unavailable for {wrt:?} (through {components:?})")]
    Unavailable {
        components: Vec<String>,
        wrt: Vec<String>,
    },

    #[error("Singular linear system in region [{members}]")]
    Singular { members: String },

    #[error("Invalid derivative request: {what}")]
    InvalidRequest { what: String },

    #[error(transparent)]
    Solver(#[from] SolverError),
}

pub type DerivResult<T> = Result<T, DerivError>;

impl From<MdoError> for DerivError {
    fn from(e: MdoError) -> Self {
        DerivError::InvalidRequest {
            what: e.to_string(),
        }
    }
}
