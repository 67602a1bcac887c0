use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("invalid workflow: {0}")]
    Validation(String),

    #[error("missing required variables: {}", .0.join(", "))]
    MissingVariables(Vec<String>),

    #[error("command failed: {0}")]
    Command(String),

    #[error("{phase} {index} failed: {reason}")]
    Execution {
        phase: String,
        index: usize,
        reason: String,
    },

    #[error("workflow '{0}' requires elevated privileges: re-run as root or with sudo")]
    Privilege(String),

    #[error("home directory not found: set HOME or SHELLFLOW_HOME")]
    HomeNotFound,

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Yaml(#[from] serde_yaml::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store unavailable: {0}")]
    Unavailable(String),

    #[error("database at {} is busy: another shellflow process holds it", .0.display())]
    Busy(PathBuf),

    #[error("database operation timed out after {0:?}; its outcome is unknown")]
    TimedOut(Duration),

    #[error("{kind} not found: {key}")]
    NotFound { kind: &'static str, key: String },

    #[error("{kind} already exists: {key}")]
    AlreadyExists { kind: &'static str, key: String },

    #[error("database error: {0}")]
    Backend(String),
}

impl StoreError {
    pub(crate) fn backend(e: impl std::fmt::Display) -> Self {
        StoreError::Backend(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, Error>;
