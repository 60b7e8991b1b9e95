//! Application-wide error types.

use std::path::{Path, PathBuf};

use thiserror::Error;

/// Application-wide result type.
pub type Result<T> = std::result::Result<T, Error>;

/// Application-wide error type.
#[derive(Error, Debug)]
pub enum Error {
    #[error("Failed to acquire artifact from {url}: {reason}")]
    Acquisition { url: String, reason: String },

    #[error("{operation} is already running for the {role} generator")]
    AlreadyRunning {
        role: &'static str,
        operation: &'static str,
    },

    #[error("Execution of the {role} generator failed: {reason}")]
    Execution { role: &'static str, reason: String },

    #[error("Rebuild from {source_key} failed after {attempts} attempt(s): {reason}")]
    Rebuild {
        source_key: String,
        attempts: u32,
        reason: String,
    },

    #[error("No playable stream available for {id}: {reason}")]
    Resolution { id: String, reason: String },

    #[error("Invalid schedule interval '{input}': {reason}")]
    InvalidInterval { input: String, reason: String },

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("IO error while {op} at {}: {source}", path.display())]
    IoPath {
        op: &'static str,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("{0}")]
    Other(String),
}

impl Error {
    pub fn acquisition(url: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Acquisition {
            url: url.into(),
            reason: reason.into(),
        }
    }

    pub fn execution(role: &'static str, reason: impl Into<String>) -> Self {
        Self::Execution {
            role,
            reason: reason.into(),
        }
    }

    pub fn resolution(id: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Resolution {
            id: id.into(),
            reason: reason.into(),
        }
    }

    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn config(msg: impl Into<String>) -> Self {
        Self::Configuration(msg.into())
    }

    pub fn io_path(op: &'static str, path: &Path, source: std::io::Error) -> Self {
        Self::IoPath {
            op,
            path: path.to_path_buf(),
            source,
        }
    }

    /// Whether this error means the requested work is already proceeding.
    pub fn is_already_running(&self) -> bool {
        matches!(self, Self::AlreadyRunning { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolution_message_is_user_facing() {
        let err = Error::resolution("chan-1", "resolver exited with code 2");
        assert_eq!(
            err.to_string(),
            "No playable stream available for chan-1: resolver exited with code 2"
        );
    }

    #[test]
    fn test_already_running_classification() {
        let err = Error::AlreadyRunning {
            role: "playlist",
            operation: "execute",
        };
        assert!(err.is_already_running());
        assert!(!Error::config("bad").is_already_running());
    }
}
