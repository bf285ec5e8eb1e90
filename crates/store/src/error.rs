/// Errors raised by the store and the queues/history/cursor built on it.
#[derive(thiserror::Error, Debug)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("row not found")]
    NotFound,
}

pub type Result<T> = std::result::Result<T, StoreError>;
