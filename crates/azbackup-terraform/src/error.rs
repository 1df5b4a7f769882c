use std::time::Duration;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum TerraformError {
    #[error("spawn {binary}: {source}")]
    Spawn {
        binary: String,
        #[source]
        source: std::io::Error,
    },

    #[error("io error at {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("terraform {command} exited with code {code}")]
    CommandFailed {
        command: String,
        code: i32,
        /// Combined stdout and stderr of the failed command.
        log: String,
    },

    #[error("terraform {command} timed out after {after:?}")]
    Timeout { command: String, after: Duration },

    #[error("terraform {command} cancelled")]
    Cancelled { command: String },

    #[error("output '{0}' is not defined")]
    OutputMissing(String),

    #[error("output '{name}' is not a {expected}")]
    OutputType { name: String, expected: &'static str },

    #[error("{context}: {source}")]
    Json {
        context: String,
        #[source]
        source: serde_json::Error,
    },
}

impl TerraformError {
    pub(crate) fn io(path: &std::path::Path, source: std::io::Error) -> Self {
        TerraformError::Io {
            path: path.display().to_string(),
            source,
        }
    }
}
