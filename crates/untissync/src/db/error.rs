//! Error types for the class/course store.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("Failed to (de)serialize stored value: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("{entity} {id} not found")]
    NotFound { entity: &'static str, id: i64 },

    #[error("Database lock poisoned")]
    Poisoned,

    /// Raised by stores that are not backed by a database
    #[error("Store unavailable: {message}")]
    Unavailable { message: String },
}
