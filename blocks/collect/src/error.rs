use collect_atoms::StoreError;
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    BadRequest,
    Forbidden,
    Conflict,
    NotFound,
    Internal,
}

#[derive(Error, Debug)]
pub enum CollectError {
    #[error("{0}")]
    BadRequest(String),

    /// Submit attempted while required items still have no file.
    #[error("Missing required items: {}", titles.join(", "))]
    MissingRequired {
        item_ids: Vec<String>,
        titles: Vec<String>,
    },

    #[error("{0}")]
    Forbidden(String),

    #[error("{0}")]
    Conflict(String),

    #[error("{0}")]
    NotFound(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

pub type CollectResult<T> = Result<T, CollectError>;

impl CollectError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            CollectError::BadRequest(_) | CollectError::MissingRequired { .. } => ErrorKind::BadRequest,
            CollectError::Forbidden(_) => ErrorKind::Forbidden,
            CollectError::Conflict(_) => ErrorKind::Conflict,
            CollectError::NotFound(_) => ErrorKind::NotFound,
            CollectError::Internal(_) => ErrorKind::Internal,
        }
    }

    /// Stable machine code, also stored on failed audit records.
    pub fn code(&self) -> &'static str {
        match self {
            CollectError::BadRequest(_) => "BAD_REQUEST",
            CollectError::MissingRequired { .. } => "MISSING_REQUIRED",
            CollectError::Forbidden(_) => "FORBIDDEN",
            CollectError::Conflict(_) => "CONFLICT",
            CollectError::NotFound(_) => "NOT_FOUND",
            CollectError::Internal(_) => "INTERNAL",
        }
    }

    pub fn status_code(&self) -> u16 {
        match self.kind() {
            ErrorKind::BadRequest => 400,
            ErrorKind::Forbidden => 403,
            ErrorKind::NotFound => 404,
            ErrorKind::Conflict => 409,
            ErrorKind::Internal => 500,
        }
    }

    /// Storage gateway failures during uploads surface to the caller as bad requests.
    pub fn upload_failed(err: StoreError) -> Self {
        match err {
            StoreError::Conflict(msg) => CollectError::Conflict(msg),
            other => CollectError::BadRequest(format!("Upload failed: {}", other)),
        }
    }

    pub fn task_not_found() -> Self {
        CollectError::NotFound("Collection task not found".to_string())
    }
}

impl From<StoreError> for CollectError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound(msg) => CollectError::NotFound(msg),
            StoreError::Conflict(msg) => CollectError::Conflict(msg),
            StoreError::TooLarge(msg) => CollectError::BadRequest(msg),
            StoreError::Backend(msg) | StoreError::Decode(msg) => {
                tracing::error!("Storage failure: {}", msg);
                CollectError::Internal(msg)
            }
        }
    }
}
