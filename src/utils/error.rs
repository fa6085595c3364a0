use crate::domain::model::ComicId;
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum BatchError {
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("Configuration error: {message}")]
    ConfigError { message: String },

    #[error("Configuration error in '{field}': {message}")]
    ConfigValidationError { field: String, message: String },

    #[error("Invalid value '{value}' for '{field}': {reason}")]
    InvalidConfigValueError {
        field: String,
        value: String,
        reason: String,
    },

    #[error("Missing required configuration: {field}")]
    MissingConfigError { field: String },

    #[error("Timed out after {waited:?} waiting to check out comic {id}")]
    CheckOutTimeout { id: ComicId, waited: Duration },

    #[error("Comic {id} not found")]
    ComicNotFound { id: ComicId },

    #[error("Storage error: {message}")]
    StorageError { message: String },

    #[error("Step '{step}' failed on comic {id}: {message}")]
    ProcessingError {
        step: String,
        id: ComicId,
        message: String,
    },

    #[error("Metadata source error: {message}")]
    MetadataError { message: String },

    #[error("Worker task failed: {0}")]
    TaskError(#[from] tokio::task::JoinError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    Configuration,
    Io,
    Concurrency,
    Storage,
    Processing,
    Metadata,
    Internal,
}

/// 錯誤嚴重程度，決定 CLI 的退出碼
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ErrorSeverity {
    Low,
    Medium,
    High,
    Critical,
}

impl BatchError {
    pub fn category(&self) -> ErrorCategory {
        match self {
            BatchError::IoError(_) => ErrorCategory::Io,
            BatchError::SerializationError(_) | BatchError::StorageError { .. } => {
                ErrorCategory::Storage
            }
            BatchError::ConfigError { .. }
            | BatchError::ConfigValidationError { .. }
            | BatchError::InvalidConfigValueError { .. }
            | BatchError::MissingConfigError { .. } => ErrorCategory::Configuration,
            BatchError::CheckOutTimeout { .. } => ErrorCategory::Concurrency,
            BatchError::ComicNotFound { .. } | BatchError::ProcessingError { .. } => {
                ErrorCategory::Processing
            }
            BatchError::MetadataError { .. } => ErrorCategory::Metadata,
            BatchError::TaskError(_) => ErrorCategory::Internal,
        }
    }

    pub fn severity(&self) -> ErrorSeverity {
        match self.category() {
            ErrorCategory::Processing => ErrorSeverity::Low,
            ErrorCategory::Concurrency | ErrorCategory::Metadata => ErrorSeverity::Medium,
            ErrorCategory::Configuration | ErrorCategory::Io | ErrorCategory::Storage => {
                ErrorSeverity::High
            }
            ErrorCategory::Internal => ErrorSeverity::Critical,
        }
    }

    pub fn recovery_suggestion(&self) -> &'static str {
        match self.category() {
            ErrorCategory::Configuration => "Check the configuration file and command line flags",
            ErrorCategory::Io => "Check that the library directories exist and are writable",
            ErrorCategory::Concurrency => {
                "Another step is holding the comic; raise checkout.timeout_seconds or rerun later"
            }
            ErrorCategory::Storage => "Check that the library file is valid JSON and writable",
            ErrorCategory::Processing => "Inspect the comic record and rerun the batch",
            ErrorCategory::Metadata => "Check the metadata source file",
            ErrorCategory::Internal => "Rerun with --verbose and report the log",
        }
    }

    pub fn user_friendly_message(&self) -> String {
        match self {
            BatchError::CheckOutTimeout { id, .. } => {
                format!("Comic {} is busy in another batch step", id)
            }
            BatchError::ComicNotFound { id } => format!("Comic {} no longer exists", id),
            BatchError::MissingConfigError { field } => {
                format!("The setting '{}' is required", field)
            }
            other => other.to_string(),
        }
    }
}

pub type Result<T> = std::result::Result<T, BatchError>;
