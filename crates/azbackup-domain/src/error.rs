use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum DomainError {
    #[error("policy rule '{0}' not found")]
    RuleNotFound(String),

    #[error("{what}: expected {expected}, found {actual}")]
    UnexpectedVariant {
        what: String,
        expected: &'static str,
        actual: String,
    },

    #[error("retention rule '{0}' has no lifecycles")]
    MissingLifecycle(String),

    #[error("invalid {field}: {value:?}")]
    InvalidValue { field: &'static str, value: String },
}
