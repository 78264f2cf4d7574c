use thiserror::Error;

/// Errors produced by the store layer.
#[derive(Error, Debug)]
pub enum StoreError {
    /// SQLite error.
    #[error("Database error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// Generic I/O error (e.g. creating the database directory).
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// A value could not be encoded as JSON.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// A stored document no longer matches its type.
    #[error("Corrupt document {table}/{key}: {source}")]
    Corrupt {
        table: String,
        key: String,
        source: serde_json::Error,
    },

    /// The key belongs to a record that only exists at read time.
    #[error("Key {0:?} is reserved")]
    ReservedKey(String),

    /// An update targeted a key with no stored record.
    #[error("Record not found: {0}")]
    NotFound(String),
}

/// Convenience alias used throughout the store.
pub type Result<T> = std::result::Result<T, StoreError>;
