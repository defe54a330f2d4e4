// src/error.rs

use thiserror::Error;

use crate::apt::classify::AptError;

/// Core error types for apm
#[derive(Error, Debug)]
pub enum Error {
    /// Database-related errors
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Database initialization error
    #[error("Failed to initialize database: {0}")]
    InitError(String),

    /// Database not found
    #[error("Database not found at path: {0}")]
    DatabaseNotFound(String),

    /// A filter or sort field outside the allow-list. Always a caller bug.
    #[error("Invalid field: {field}. Available fields: {allowed}")]
    InvalidField { field: String, allowed: String },

    /// Requested package absent from the metadata cache
    #[error("Failed to get information about package {0}")]
    PackageNotFound(String),

    /// A recognized (or preserved-verbatim) package manager complaint
    #[error(transparent)]
    Apt(#[from] AptError),

    /// Simulation implies no change and no configuration drift was found
    #[error("The operation would make no changes: {0}")]
    NothingToDo(String),

    /// The real operation failed after a clean simulation
    #[error("Package operation failed: {0}")]
    ExecutionFailed(String),

    /// Malformed metadata from a scan or config file
    #[error("Parse error: {0}")]
    ParseError(String),

    /// Desired-state configuration errors
    #[error("Configuration error: {0}")]
    Config(String),
}

/// Result type alias using apm's Error type
pub type Result<T> = std::result::Result<T, Error>;
