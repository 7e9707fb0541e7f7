// crates/backend-lib/src/error.rs

//! Central error type.
use thiserror::Error;

use crate::validation::ValidationError;

/// Application error types with error codes and context
#[derive(Error, Debug)]
pub enum AppError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Settings error: {0}")]
    Settings(#[from] figment::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),
}

impl AppError {
    /// Stable code attached to log lines
    pub fn error_code(&self) -> &'static str {
        match self {
            AppError::Config(_) => "CFG_001",
            AppError::Settings(_) => "CFG_002",
            AppError::Json(_) => "JSON_001",
            AppError::Protocol(_) => "PROTO_001",
            AppError::Validation(_) => "VAL_001",
        }
    }
}
