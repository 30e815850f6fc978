// src/error.rs

//! Unified error handling for the detector.
//!
//! Per-record problems (bad payloads, rejected documents) are not errors here:
//! they travel as [`DecodeError`] values and [`IndexOutcome`] variants so a
//! single message can never end the stream. `AppError` is reserved for faults
//! that stop a command.
//!
//! [`IndexOutcome`]: crate::storage::IndexOutcome

use std::fmt;

use thiserror::Error;

/// Result type alias for detector operations.
pub type Result<T> = std::result::Result<T, AppError>;

/// Unified application error type.
#[derive(Error, Debug)]
pub enum AppError {
    /// I/O operation failed
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// HTTP client could not be built or used
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Kafka client error
    #[error("Kafka error: {0}")]
    Kafka(#[from] rdkafka::error::KafkaError),

    /// JSON serialization/deserialization failed
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// TOML parsing failed
    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),

    /// TOML serialization failed
    #[error("TOML serialize error: {0}")]
    TomlSerialize(#[from] toml::ser::Error),

    /// URL parsing failed
    #[error("URL parse error: {0}")]
    Url(#[from] url::ParseError),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Data validation error
    #[error("Validation error: {0}")]
    Validation(String),

    /// A blocking wait was interrupted by shutdown
    #[error("Cancelled while {0}")]
    Cancelled(String),
}

impl AppError {
    /// Create a configuration error.
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }

    /// Create a validation error.
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    /// Create a cancellation error naming what was interrupted.
    pub fn cancelled(during: impl fmt::Display) -> Self {
        Self::Cancelled(during.to_string())
    }
}

/// Why a raw payload could not be turned into a [`LogRecord`].
///
/// [`LogRecord`]: crate::models::LogRecord
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DecodeError {
    #[error("empty payload")]
    Empty,

    #[error("payload is not valid UTF-8: {0}")]
    Utf8(String),

    #[error("payload is not valid JSON: {0}")]
    Json(String),

    #[error("payload is JSON but not an object (got {0})")]
    NotAnObject(&'static str),
}
