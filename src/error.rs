// src/error.rs

//! Error types for pkgtxn

use thiserror::Error;

/// Result type used throughout the library
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in the transaction subsystem
#[derive(Error, Debug)]
pub enum Error {
    /// Database initialization or bookkeeping failure
    #[error("Initialization error: {0}")]
    InitError(String),

    /// SQLite error
    #[error("Database error: {0}")]
    DatabaseError(#[from] rusqlite::Error),

    /// I/O error with context
    #[error("I/O error: {0}")]
    IoError(String),

    /// Raw I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Configuration file could not be parsed
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// Unknown string representation of an enum value
    #[error("Invalid value: {0}")]
    InvalidValue(String),

    /// Malformed transaction id specification
    #[error("Invalid transaction ID range \"{spec}\", \"ID\" or \"ID..ID\" expected")]
    InvalidIdRange { spec: String },

    /// Specs that must name exactly one transaction named none
    #[error("No matching transaction ID found, exactly one required.")]
    NoMatchingTransaction,

    /// Specs that must name exactly one transaction named several
    #[error("Matched more than one transaction ID, exactly one required.")]
    AmbiguousTransaction,

    /// Package identity could not be parsed
    #[error("Parse error: {0}")]
    ParseError(String),

    /// Requested entity does not exist
    #[error("Not found: {0}")]
    NotFound(String),

    /// Backend refused an explicitly requested element
    #[error("Transaction error: {0}")]
    TransactionError(String),

    /// Backend contract violation; the operation must not continue
    #[error("Integrity violation: {0}")]
    Integrity(String),

    /// Stored transaction is malformed or incompatible
    #[error("Transaction replay error: {0}")]
    ReplayError(String),

    /// Transactions could not be merged
    #[error("Transaction merge error: {0}")]
    MergeError(String),

    /// Operation was declined or cancelled
    #[error("Operation cancelled: {0}")]
    Cancelled(String),
}

impl From<toml::de::Error> for Error {
    fn from(err: toml::de::Error) -> Self {
        Error::ConfigError(err.to_string())
    }
}

impl From<tempfile::PersistError> for Error {
    fn from(err: tempfile::PersistError) -> Self {
        Error::IoError(err.to_string())
    }
}
