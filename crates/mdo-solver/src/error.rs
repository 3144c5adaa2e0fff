//! Error types for evaluation and convergence.

use mdo_components::ComponentError;
use mdo_core::MdoError;
use thiserror::Error;

use crate::cycle::CycleState;

/// Errors that can occur while evaluating a graph.
#[derive(Error, Debug, Clone)]
pub enum SolverError {
    /// A component rejected its inputs. Recoverable at the driver level: the
    /// candidate is discarded.
    #[error("Component '{comp}' failed: {source}")]
    Evaluation {
        comp: String,
        #[source]
        source: ComponentError,
    },

    /// A coupled region ended unconverged (only raised by strict evaluation).
    #[error(
        "Cycle [{members}] not resolved: {state:?} after {iterations} iterations (residual {residual:e})"
    )]
    CycleResolutionFailure {
        members: String,
        state: CycleState,
        iterations: usize,
        residual: f64,
    },

    #[error("Derivatives unavailable for component '{comp}'")]
    DerivativeUnavailable { comp: String },

    #[error("Numeric error: {what}")]
    Numeric { what: String },

    #[error("Problem setup error: {what}")]
    Setup { what: String },
}

pub type SolverResult<T> = Result<T, SolverError>;

impl SolverError {
    pub fn evaluation(comp: &str, source: ComponentError) -> Self {
        SolverError::Evaluation {
            comp: comp.to_string(),
            source,
        }
    }

    /// Whether the error comes from an unconverged cycle rather than a failure.
    pub fn is_unconverged(&self) -> bool {
        matches!(self, SolverError::CycleResolutionFailure { .. })
    }
}

impl From<MdoError> for SolverError {
    fn from(e: MdoError) -> Self {
        SolverError::Setup {
            what: e.to_string(),
        }
    }
}
