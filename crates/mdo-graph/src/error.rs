//! Graph-specific error types.

use mdo_core::MdoError;
use mdo_components::ComponentError;

pub type GraphResult<T> = Result<T, GraphError>;

/// Graph construction errors. All of them are fatal: no graph is produced.
#[derive(Debug, Clone, PartialEq)]
pub enum GraphError {
    /// Two components registered under the same name.
    DuplicateComponent { name: String },

    /// A name that does not refer to a registered component.
    UnknownComponent { name: String },

    /// A component's declarations are inconsistent.
    Declaration { comp: String, reason: String },

    /// Registry construction failed (duplicate variable, bad unit, ...).
    Registry(MdoError),

    /// A connection violates shape, unit, direction or single-source rules.
    InvalidConnection {
        src: String,
        dst: String,
        reason: String,
    },

    /// A convergence configuration was rejected.
    InvalidSolverConfig { region: String, reason: String },
}

impl std::fmt::Display for GraphError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            GraphError::DuplicateComponent { name } => {
                write!(f, "Component '{}' is defined more than once", name)
            }
            GraphError::UnknownComponent { name } => {
                write!(f, "Unknown component '{}'", name)
            }
            GraphError::Declaration { comp, reason } => {
                write!(f, "Invalid declarations in component '{}': {}", comp, reason)
            }
            GraphError::Registry(err) => write!(f, "Variable registry: {}", err),
            GraphError::InvalidConnection { src, dst, reason } => {
                write!(f, "Invalid connection {} -> {}: {}", src, dst, reason)
            }
            GraphError::InvalidSolverConfig { region, reason } => {
                write!(f, "Invalid solver configuration for {}: {}", region, reason)
            }
        }
    }
}

impl std::error::Error for GraphError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            GraphError::Registry(err) => Some(err),
            _ => None,
        }
    }
}

impl From<MdoError> for GraphError {
    fn from(err: MdoError) -> Self {
        GraphError::Registry(err)
    }
}

impl GraphError {
    pub(crate) fn declaration(comp: &str, err: ComponentError) -> Self {
        GraphError::Declaration {
            comp: comp.to_string(),
            reason: err.to_string(),
        }
    }

    pub(crate) fn connection(src: &str, dst: &str, reason: impl Into<String>) -> Self {
        GraphError::InvalidConnection {
            src: src.to_string(),
            dst: dst.to_string(),
            reason: reason.into(),
        }
    }
}
