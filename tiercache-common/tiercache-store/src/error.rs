use thiserror::Error;

/// Result type alias for level store operations
pub type Result<T> = std::result::Result<T, StoreError>;

/// Errors raised by a level store adapter
#[derive(Error, Debug)]
pub enum StoreError {
    /// The adapter does not implement an optional capability
    #[error("Unsupported operation: {0}")]
    Unsupported(&'static str),

    /// Increment/decrement on a value that is not an integer
    #[error("Stored value for '{0}' is not numeric")]
    NotNumeric(String),

    /// Serialization errors
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Database errors
    #[error("Database error: {0}")]
    Database(String),

    /// I/O errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Generic backend failure
    #[error("Backend error: {0}")]
    Backend(String),
}

impl StoreError {
    /// Create a new backend error
    pub fn backend(msg: impl Into<String>) -> Self {
        Self::Backend(msg.into())
    }

    /// Whether the error only signals a missing optional capability
    pub fn is_unsupported(&self) -> bool {
        matches!(self, Self::Unsupported(_))
    }
}

#[cfg(feature = "sqlite")]
impl From<rusqlite::Error> for StoreError {
    fn from(err: rusqlite::Error) -> Self {
        StoreError::Database(err.to_string())
    }
}
