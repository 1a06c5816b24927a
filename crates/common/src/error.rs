//! Error types shared across battbench crates.

use std::path::PathBuf;

/// Top-level error type for battbench operations.
#[derive(Debug, thiserror::Error)]
pub enum BattbenchError {
    #[error("Event log error: {message}")]
    EventLog { message: String },

    #[error("Capture error: {message}")]
    Capture { message: String },

    #[error("Replay error: {message}")]
    Replay { message: String },

    #[error("Helper error: {message}")]
    Helper { message: String },

    #[error("Test run error: {message}")]
    TestRun { message: String },

    #[error("Power monitoring error: {message}")]
    Power { message: String },

    #[error("Configuration error: {message}")]
    Config { message: String },

    #[error("File not found: {path}")]
    FileNotFound { path: PathBuf },

    #[error("Permission denied: {message}")]
    PermissionDenied { message: String },

    #[error("Operation cancelled")]
    Cancelled,

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Result type alias using BattbenchError.
pub type BattbenchResult<T> = Result<T, BattbenchError>;

impl BattbenchError {
    pub fn event_log(msg: impl Into<String>) -> Self {
        Self::EventLog {
            message: msg.into(),
        }
    }

    pub fn capture(msg: impl Into<String>) -> Self {
        Self::Capture {
            message: msg.into(),
        }
    }

    pub fn replay(msg: impl Into<String>) -> Self {
        Self::Replay {
            message: msg.into(),
        }
    }

    pub fn helper(msg: impl Into<String>) -> Self {
        Self::Helper {
            message: msg.into(),
        }
    }

    pub fn test_run(msg: impl Into<String>) -> Self {
        Self::TestRun {
            message: msg.into(),
        }
    }

    pub fn power(msg: impl Into<String>) -> Self {
        Self::Power {
            message: msg.into(),
        }
    }

    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config {
            message: msg.into(),
        }
    }

    pub fn permission_denied(msg: impl Into<String>) -> Self {
        Self::PermissionDenied {
            message: msg.into(),
        }
    }
}
