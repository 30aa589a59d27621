use thiserror::Error;

/// Errors surfaced by repositories and the blob store.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Not found: {0}")]
    NotFound(String),

    /// A conditional write lost (unique binding taken, row changed underneath).
    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Storage backend error: {0}")]
    Backend(String),

    #[error("Malformed record: {0}")]
    Decode(String),

    /// More writes than one transaction can commit.
    #[error("Transaction too large: {0}")]
    TooLarge(String),
}

pub type StoreResult<T> = Result<T, StoreError>;

impl StoreError {
    pub fn backend(context: &str, err: impl std::fmt::Display) -> Self {
        StoreError::Backend(format!("{}: {}", context, err))
    }
}
