//! Error types for component evaluation.

use mdo_core::MdoError;
use thiserror::Error;

/// Errors raised while evaluating a component.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ComponentError {
    #[error("Non-physical value: {what}")]
    NonPhysical { what: String },

    #[error("Not supported: {what}")]
    NotSupported { what: &'static str },

    #[error("Domain error: {what}")]
    Domain { what: String },

    #[error("Missing variable '{name}'")]
    MissingVariable { name: String },

    #[error("Partial d({of})/d({wrt}) was not declared")]
    UndeclaredPartial { of: String, wrt: String },

    #[error("Invalid argument: {what}")]
    InvalidArg { what: String },

    #[error("Backend error: {message}")]
    Backend { message: String },
}

pub type ComponentResult<T> = Result<T, ComponentError>;

impl ComponentError {
    pub(crate) fn invalid(what: impl Into<String>) -> Self {
        ComponentError::InvalidArg { what: what.into() }
    }
}

impl From<MdoError> for ComponentError {
    fn from(e: MdoError) -> Self {
        match e {
            MdoError::NonFinite { what, value } => ComponentError::NonPhysical {
                what: format!("{what} = {value}"),
            },
            other => ComponentError::InvalidArg {
                what: other.to_string(),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display() {
        let err = ComponentError::UndeclaredPartial {
            of: "y".into(),
            wrt: "x".into(),
        };
        assert!(err.to_string().contains("d(y)/d(x)"));
    }

    #[test]
    fn error_conversion() {
        let core = MdoError::NonFinite {
            what: "mass",
            value: f64::NAN,
        };
        let err: ComponentError = core.into();
        assert!(matches!(err, ComponentError::NonPhysical { .. }));
    }
}
