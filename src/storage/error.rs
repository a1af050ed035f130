use thiserror::Error;

/// Errors from the object-storage backend.
#[derive(Error, Debug)]
pub enum StorageError {
    #[error("Failed to connect to storage: {0}")]
    Connection(String),

    #[error("Object {0} not found")]
    ObjectNotFound(String),

    #[error("Bucket {0} not found")]
    BucketNotFound(String),

    #[error("Access denied for {0}: {1}")]
    AccessDenied(String, String),

    #[error("Failed to read object {0}: {1}")]
    Read(String, String),

    #[error("Failed to list bucket {0}: {1}")]
    List(String, String),
}

impl StorageError {
    /// Whether this error maps to a not-found condition at the API layer.
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            StorageError::ObjectNotFound(_) | StorageError::BucketNotFound(_)
        )
    }
}
