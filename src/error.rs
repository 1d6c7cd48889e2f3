use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use thiserror::Error;
use tracing::error;

/// Raised while building a [`crate::schema::SchemaDescriptor`]. Fatal at startup.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SchemaLoadError {
    #[error("duplicate table '{0}'")]
    DuplicateTable(String),
    #[error("duplicate column '{column}' in table '{table}'")]
    DuplicateColumn { table: String, column: String },
    #[error("table '{0}' declares no columns")]
    EmptyTable(String),
    #[error("foreign key {from} references undeclared table '{table}'")]
    UnknownForeignTable { from: String, table: String },
    #[error("foreign key {from} references undeclared column '{table}.{column}'")]
    UnknownForeignColumn { from: String, table: String, column: String },
    #[error("unreadable schema definition: {0}")]
    Definition(String),
}

/// The synthesizer could not produce any candidate for a rule.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SynthesisError {
    #[error("synthesis unavailable: {0}")]
    Unavailable(String),
}

/// Failure reported by a [`crate::store::ClaimsStore`].
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    #[error("claims store unavailable: {0}")]
    Unavailable(String),
    #[error("query exceeded the execution timeout of {0:?}")]
    Timeout(Duration),
    #[error("query was cancelled")]
    Cancelled,
    #[error("query failed: {0}")]
    Query(String),
}

impl From<rusqlite::Error> for StoreError {
    fn from(e: rusqlite::Error) -> Self {
        match e {
            rusqlite::Error::SqliteFailure(ref code, _)
                if code.code == rusqlite::ErrorCode::CannotOpen =>
            {
                Self::Unavailable(e.to_string())
            }
            _ => Self::Query(e.to_string()),
        }
    }
}

/// Failure of [`crate::execute::Executor::execute`].
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ExecuteError {
    /// The executor was handed a query that was never validated, or failed validation.
    #[error("precondition failed: {0}")]
    Precondition(String),
    #[error("write operation rejected: {verb} statement")]
    WriteOperationRejected { verb: String },
    #[error("execution error: {0}")]
    Execution(#[source] StoreError),
}

/// Crate level error used by the hosting shell (settings, startup, I/O).
#[derive(Error, Debug)]
pub enum Error {
    #[error("Config error: {0}")]
    Config(String),
    #[error("Schema error: {0}")]
    Schema(#[from] SchemaLoadError),
    #[error("Store error: {0}")]
    Store(#[from] StoreError),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, Error>;

impl From<config::ConfigError> for Error {
    fn from(e: config::ConfigError) -> Self {
        Self::Config(e.to_string())
    }
}

impl From<rusqlite::Error> for Error {
    fn from(e: rusqlite::Error) -> Self {
        Self::Store(e.into())
    }
}

pub(crate) fn acquire_lock<'a, T>(mutex: &'a Mutex<T>, what: &str) -> std::result::Result<MutexGuard<'a, T>, StoreError> {
    mutex.lock().map_err(|_| {
        error!(lock = what, "lock poisoned");
        StoreError::Unavailable(format!("{what} lock poisoned"))
    })
}
