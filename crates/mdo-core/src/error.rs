use thiserror::Error;

pub type MdoResult<T> = Result<T, MdoError>;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum MdoError {
    #[error("Non-finite numeric value for {what}: {value}")]
    NonFinite { what: &'static str, value: f64 },

    #[error("Invalid argument: {what}")]
    InvalidArg { what: String },

    #[error("Index out of bounds: {what} (index={index}, len={len})")]
    IndexOob {
        what: &'static str,
        index: usize,
        len: usize,
    },

    #[error("Invalid unit expression '{expr}': {reason}")]
    InvalidUnit { expr: String, reason: String },

    #[error("Duplicate variable '{name}' in component '{comp}'")]
    DuplicateVariable { comp: String, name: String },

    #[error("Unknown variable path '{path}'")]
    UnknownVariable { path: String },

    #[error("Invalid declaration of '{path}': {reason}")]
    InvalidDeclaration { path: String, reason: String },

    #[error("Invariant violated: {what}")]
    Invariant { what: &'static str },
}
