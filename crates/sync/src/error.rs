use thiserror::Error;

/// Failure classes a caller can react to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// The store could not be reached.
    Transport,
    /// The store's access rules rejected the write.
    Permission,
    /// The entity underneath the operation is gone or stale.
    LogicalNoOp,
    /// The request was malformed before anything was sent.
    Invalid,
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum SyncError {
    #[error("transport error: {0}")]
    Transport(String),

    #[error("permission denied: {0}")]
    PermissionDenied(String),

    #[error("{path} not found")]
    NotFound { path: String },

    #[error("validation error: {0}")]
    Validation(String),

    #[error("failed to decode {path}: {message}")]
    Decode { path: String, message: String },

    #[error("listener closed")]
    Closed,
}

impl SyncError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            SyncError::Transport(_) | SyncError::Closed => ErrorKind::Transport,
            SyncError::PermissionDenied(_) => ErrorKind::Permission,
            SyncError::NotFound { .. } => ErrorKind::LogicalNoOp,
            SyncError::Validation(_) | SyncError::Decode { .. } => ErrorKind::Invalid,
        }
    }

    pub fn not_found(path: impl ToString) -> Self {
        SyncError::NotFound {
            path: path.to_string(),
        }
    }
}

impl From<String> for SyncError {
    fn from(message: String) -> Self {
        SyncError::Validation(message)
    }
}

pub type Result<T> = std::result::Result<T, SyncError>;
