//! Error model for the archive pipeline and the facade it exposes.
//!
//! `HistoryError` is the internal error carried through the store, capture,
//! and restore code. `AppError` is what callers of `HistoryService` see: one
//! variant per taxonomy kind with a stable code and a human-readable message.
//! Raw OS or parser text never crosses into an `AppError`; it stays in logs.

use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter};
use std::path::PathBuf;

#[derive(Debug, thiserror::Error)]
pub enum HistoryError {
    #[error("not found: {0}")]
    NotFound(String),
    #[error("invalid input: {0}")]
    InvalidInput(String),
    #[error("{op} {}: {source}", .path.display())]
    Io { op: &'static str, path: PathBuf, #[source] source: std::io::Error },
    #[error("{context}: {message}")]
    Parse { context: String, message: String },
    #[error("version written but cannot be read back from {}: {source}", .path.display())]
    Verification { path: PathBuf, #[source] source: std::io::Error },
}

impl HistoryError {
    pub fn not_found(what: impl Into<String>) -> Self { HistoryError::NotFound(what.into()) }
    pub fn invalid(what: impl Into<String>) -> Self { HistoryError::InvalidInput(what.into()) }

    pub fn io(op: &'static str, path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        HistoryError::Io { op, path: path.into(), source }
    }

    pub fn parse(context: impl Into<String>, message: impl Display) -> Self {
        HistoryError::Parse { context: context.into(), message: message.to_string() }
    }
}

pub type HistoryResult<T> = Result<T, HistoryError>;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AppError {
    NotFound { code: String, message: String },
    InvalidInput { code: String, message: String },
    Io { code: String, message: String },
    Parse { code: String, message: String },
    Verification { code: String, message: String },
}

impl AppError {
    pub fn code_str(&self) -> &str {
        match self {
            AppError::NotFound { code, .. }
            | AppError::InvalidInput { code, .. }
            | AppError::Io { code, .. }
            | AppError::Parse { code, .. }
            | AppError::Verification { code, .. } => code.as_str(),
        }
    }

    pub fn message(&self) -> &str {
        match self {
            AppError::NotFound { message, .. }
            | AppError::InvalidInput { message, .. }
            | AppError::Io { message, .. }
            | AppError::Parse { message, .. }
            | AppError::Verification { message, .. } => message.as_str(),
        }
    }

    pub fn not_found<S: Into<String>>(code: S, msg: S) -> Self { AppError::NotFound { code: code.into(), message: msg.into() } }
    pub fn invalid<S: Into<String>>(code: S, msg: S) -> Self { AppError::InvalidInput { code: code.into(), message: msg.into() } }
    pub fn io<S: Into<String>>(code: S, msg: S) -> Self { AppError::Io { code: code.into(), message: msg.into() } }
    pub fn parse<S: Into<String>>(code: S, msg: S) -> Self { AppError::Parse { code: code.into(), message: msg.into() } }
    pub fn verification<S: Into<String>>(code: S, msg: S) -> Self { AppError::Verification { code: code.into(), message: msg.into() } }

    /// Map to HTTP status code.
    pub fn http_status(&self) -> u16 {
        match self {
            AppError::NotFound { .. } => 404,
            AppError::InvalidInput { .. } => 400,
            AppError::Parse { .. } => 422,
            AppError::Io { .. } => 500,
            AppError::Verification { .. } => 500,
        }
    }
}

impl Display for AppError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.code_str(), self.message())
    }
}

impl std::error::Error for AppError {}

pub type AppResult<T> = Result<T, AppError>;

impl From<HistoryError> for AppError {
    fn from(err: HistoryError) -> Self {
        match err {
            HistoryError::NotFound(what) => AppError::not_found("not_found".to_string(), format!("{what} not found")),
            HistoryError::InvalidInput(what) => AppError::invalid("invalid_input".to_string(), format!("invalid {what}")),
            // Only the operation name is surfaced; the path and OS error stay in the logs.
            HistoryError::Io { op, .. } => AppError::io("io_error".to_string(), op.to_string()),
            HistoryError::Parse { context, .. } => AppError::parse("parse_error".to_string(), context),
            HistoryError::Verification { .. } => AppError::verification(
                "verification_failed".to_string(),
                "version was written but could not be read back".to_string(),
            ),
        }
    }
}

#[cfg(test)]
#[path = "error_tests.rs"]
mod error_tests;
