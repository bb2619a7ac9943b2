//! Error types for the conformance suite.
//!
//! Verification mismatches are not errors: they go to the [`crate::Reporter`].
//! These variants cover setup and baseline problems only.

use std::path::PathBuf;

use vfs_conformance_traits::{IdmError, VfsError};

/// Errors that stop a case (or the suite) from running at all.
#[derive(Debug, thiserror::Error)]
pub enum SuiteError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Filesystem error: {0}")]
    Vfs(#[from] VfsError),

    #[error("Identity error: {0}")]
    Idm(#[from] IdmError),

    #[error("Setup failed: {message}")]
    Setup { message: String },

    #[error("Configuration error: {message}")]
    Config { message: String },

    #[error("Invalid baseline {}: {message}", .path.display())]
    Baseline { path: PathBuf, message: String },
}

impl SuiteError {
    /// Create a new setup error.
    pub fn setup<S: Into<String>>(message: S) -> Self {
        Self::Setup {
            message: message.into(),
        }
    }

    /// Create a new configuration error.
    pub fn config<S: Into<String>>(message: S) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// Create a new baseline error.
    pub fn baseline<P: Into<PathBuf>, S: Into<String>>(path: P, message: S) -> Self {
        Self::Baseline {
            path: path.into(),
            message: message.into(),
        }
    }
}

/// Result type for suite operations.
pub type Result<T> = std::result::Result<T, SuiteError>;
