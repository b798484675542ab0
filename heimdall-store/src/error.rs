use thiserror::Error;

#[derive(Error, Debug)]
pub enum StoreError {
    /// Unknown id, or a token read after its expiry
    #[error("Not found")]
    NotFound,

    #[error("Invalid credentials")]
    InvalidCredentials,

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Backend error: {0}")]
    Backend(String),
}

impl StoreError {
    /// True for errors callers should treat as "record absent"
    pub fn is_not_found(&self) -> bool {
        matches!(self, StoreError::NotFound)
    }
}

pub type StoreResult<T> = Result<T, StoreError>;
