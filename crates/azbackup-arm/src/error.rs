use std::time::Duration;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ArmError {
    #[error("token acquisition failed: {0}")]
    Token(String),

    #[error("{method} {url}: {message}")]
    Request {
        method: String,
        url: String,
        message: String,
    },

    #[error("{method} {url}: status {status}, {code}: {message}")]
    Status {
        method: String,
        url: String,
        status: u16,
        code: String,
        message: String,
    },

    #[error("could not decode response from {url}: {message}")]
    Decode { url: String, message: String },

    #[error("{operation} ended {status}: {code}: {message}")]
    OperationFailed {
        operation: String,
        status: String,
        code: String,
        message: String,
    },

    #[error("{operation} did not finish within {after:?}")]
    Timeout { operation: String, after: Duration },

    #[error("{0} was cancelled")]
    Cancelled(String),

    #[error("role definition '{name}' matched {count} definitions, expected exactly one")]
    RoleDefinitionLookup { name: String, count: usize },

    #[error("domain error: {0}")]
    Domain(#[from] azbackup_domain::DomainError),
}

impl ArmError {
    /// HTTP status carried by the error, if it came from a response.
    pub fn status(&self) -> Option<u16> {
        match self {
            ArmError::Status { status, .. } => Some(*status),
            _ => None,
        }
    }

    pub fn is_not_found(&self) -> bool {
        self.status() == Some(404)
    }

    /// The ARM error code from a non-2xx response or a failed operation.
    pub fn code(&self) -> Option<&str> {
        match self {
            ArmError::Status { code, .. } | ArmError::OperationFailed { code, .. } => Some(code),
            _ => None,
        }
    }
}
