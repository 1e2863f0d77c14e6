//! Catalog error types.

use std::io;
use std::path::PathBuf;

use rusqlite::ErrorCode;
use thiserror::Error;

/// Catalog error type.
#[derive(Debug, Error)]
pub enum CatalogError {
    /// The directory meant to hold the store does not exist.
    #[error("catalog store location not found: {0}")]
    NotFound(PathBuf),

    /// The store carries a schema this build cannot serve.
    #[error("incompatible catalog schema (found {found:?}, supported {supported})")]
    IncompatibleSchema { found: Option<i64>, supported: i64 },

    /// The store file is not a readable database.
    #[error("catalog store is corrupt: {0}")]
    StoreCorrupt(String),

    /// The store was locked by another writer.
    #[error("catalog store is busy: {0}")]
    Busy(String),

    /// The backing medium went away under an open store.
    #[error("catalog store is unavailable: {0}")]
    Unavailable(String),

    /// The catalog was closed by its owner.
    #[error("catalog handle is stale")]
    StaleHandle,

    /// Query inputs were rejected before reaching the store.
    #[error("invalid query: {0}")]
    InvalidQuery(String),

    /// A meta record named a table or column outside the schema.
    #[error("unknown meta column {column} in {table}")]
    UnknownMetaTable { table: String, column: String },

    /// Insert collided with an existing row or store file.
    #[error("already exists: {0}")]
    AlreadyExists(String),

    /// No item row with this id.
    #[error("item not found: {0}")]
    ItemNotFound(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Any other SQLite failure.
    #[error("sqlite error: {0}")]
    Sqlite(rusqlite::Error),
}

impl CatalogError {
    /// Create an InvalidQuery error.
    pub fn invalid_query(msg: impl Into<String>) -> Self {
        Self::InvalidQuery(msg.into())
    }

    /// Create an ItemNotFound error.
    pub fn item_not_found(id: impl Into<String>) -> Self {
        Self::ItemNotFound(id.into())
    }

    /// Transient failures may succeed on retry.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Busy(_))
    }

    /// Structural failures mean the catalog can no longer be served and its
    /// volume should be treated as gone.
    pub fn is_structural(&self) -> bool {
        matches!(
            self,
            Self::IncompatibleSchema { .. }
                | Self::StoreCorrupt(_)
                | Self::Unavailable(_)
                | Self::StaleHandle
                | Self::Io(_)
                | Self::Sqlite(_)
        )
    }
}

impl From<rusqlite::Error> for CatalogError {
    fn from(e: rusqlite::Error) -> Self {
        match e.sqlite_error_code() {
            Some(ErrorCode::DatabaseBusy | ErrorCode::DatabaseLocked) => Self::Busy(e.to_string()),
            Some(ErrorCode::NotADatabase | ErrorCode::DatabaseCorrupt) => {
                Self::StoreCorrupt(e.to_string())
            }
            Some(ErrorCode::CannotOpen | ErrorCode::SystemIoFailure) => {
                Self::Unavailable(e.to_string())
            }
            _ => Self::Sqlite(e),
        }
    }
}

/// Catalog result type.
pub type CatalogResult<T> = Result<T, CatalogError>;
