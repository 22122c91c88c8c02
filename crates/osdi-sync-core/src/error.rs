//! Core error types for osdi-sync-core.
//!
//! Errors are layered: collaborator failures (`StoreError`), persistence
//! failures (`DatabaseError`) and configuration failures (`ConfigError`) all
//! convert into the top-level `CoreError`. Per-record sync failures never
//! surface as `CoreError`; they are converted into typed results by the
//! sync engine.

use std::path::PathBuf;
use thiserror::Error;

/// Core error type for osdi-sync-core.
#[derive(Error, Debug)]
pub enum CoreError {
    /// Database-related errors
    #[error("Database error: {0}")]
    Database(#[from] DatabaseError),

    /// Configuration-related errors
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Local or remote store errors
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    /// The requested entity type is not registered
    #[error("Entity type '{0}' is not enabled")]
    EntityNotEnabled(String),

    /// IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization/deserialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Database-specific errors.
#[derive(Error, Debug)]
pub enum DatabaseError {
    /// Failed to open database connection
    #[error("Failed to open database at {path}: {source}")]
    OpenFailed {
        path: PathBuf,
        #[source]
        source: rusqlite::Error,
    },

    /// Query execution failed
    #[error("Query failed: {0}")]
    QueryFailed(String),

    /// Migration failed
    #[error("Database migration failed: {0}")]
    MigrationFailed(String),

    /// A unique constraint rejected the write
    #[error("Conflicting row: {0}")]
    Conflict(String),

    /// Database is locked
    #[error("Database is locked")]
    Locked,

    /// A stored value could not be decoded
    #[error("Corrupt value for '{key}': {value}")]
    CorruptValue { key: String, value: String },
}

/// Configuration-specific errors.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Failed to load configuration
    #[error("Failed to load configuration from {path}: {message}")]
    LoadFailed { path: PathBuf, message: String },

    /// Failed to save configuration
    #[error("Failed to save configuration to {path}: {message}")]
    SaveFailed { path: PathBuf, message: String },

    /// Invalid configuration value
    #[error("Invalid configuration value for '{key}': {message}")]
    InvalidValue { key: String, message: String },

    /// Unknown configuration key
    #[error("Unknown configuration key: {0}")]
    UnknownKey(String),

    /// Missing required configuration value
    #[error("Missing required configuration value: {0}")]
    Missing(String),

    /// The data directory could not be resolved or created
    #[error("Data directory unavailable: {0}")]
    DataDir(String),
}

/// Failures reported by a local or remote object store.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum StoreError {
    /// The addressed object does not exist
    #[error("{resource} '{id}' not found")]
    NotFound { resource: String, id: String },

    /// The remote API rejected the request
    #[error("API error (HTTP {status}): {body}")]
    Api { status: u16, body: String },

    /// Network or protocol failure talking to the remote system
    #[error("Transport error: {0}")]
    Transport(String),

    /// Local storage failure
    #[error("Local storage error: {0}")]
    Database(String),

    /// The request or the returned document was malformed
    #[error("Invalid data: {0}")]
    Invalid(String),
}

impl StoreError {
    pub fn not_found(resource: impl Into<String>, id: impl Into<String>) -> Self {
        StoreError::NotFound {
            resource: resource.into(),
            id: id.into(),
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, StoreError::NotFound { .. })
    }
}

/// Reasons a matcher could not settle on a counterpart.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum MatchError {
    /// More than one candidate and no way to pick one
    #[error("{0}")]
    Indeterminate(String),

    /// The origin lacks the data needed to look anything up
    #[error("{0}")]
    MissingData(String),

    /// An id the origin refers to is malformed or unknown
    #[error("{0}")]
    InvalidId(String),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("{0}")]
    Misc(String),
}

/// Reasons a mapper could not stage the target.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum MapError {
    #[error(transparent)]
    Store(#[from] StoreError),

    /// An origin value cannot be represented on the target
    #[error("{field}: {message}")]
    Validation { field: String, message: String },

    #[error("{0}")]
    Misc(String),
}

impl From<DatabaseError> for MatchError {
    fn from(err: DatabaseError) -> Self {
        MatchError::Store(err.into())
    }
}

impl From<DatabaseError> for MapError {
    fn from(err: DatabaseError) -> Self {
        MapError::Store(err.into())
    }
}

impl From<rusqlite::Error> for DatabaseError {
    fn from(err: rusqlite::Error) -> Self {
        match &err {
            rusqlite::Error::SqliteFailure(code, msg) => match code.code {
                rusqlite::ErrorCode::DatabaseLocked | rusqlite::ErrorCode::DatabaseBusy => {
                    DatabaseError::Locked
                }
                rusqlite::ErrorCode::ConstraintViolation => {
                    DatabaseError::Conflict(msg.clone().unwrap_or_else(|| code.to_string()))
                }
                _ => DatabaseError::QueryFailed(err.to_string()),
            },
            _ => DatabaseError::QueryFailed(err.to_string()),
        }
    }
}

impl From<rusqlite::Error> for StoreError {
    fn from(err: rusqlite::Error) -> Self {
        StoreError::Database(DatabaseError::from(err).to_string())
    }
}

impl From<DatabaseError> for StoreError {
    fn from(err: DatabaseError) -> Self {
        StoreError::Database(err.to_string())
    }
}

impl From<reqwest::Error> for StoreError {
    fn from(err: reqwest::Error) -> Self {
        StoreError::Transport(err.to_string())
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(err: serde_json::Error) -> Self {
        StoreError::Invalid(err.to_string())
    }
}

/// Result type alias for CoreError
pub type Result<T, E = CoreError> = std::result::Result<T, E>;
