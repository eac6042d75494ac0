use thiserror::Error;

pub type StorageResult<T> = Result<T, StorageError>;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("not connected to the object storage server, call connect() before any operation")]
    NotConnected,

    #[error("object [{object}] not found in bucket [{bucket}]")]
    NotFound { bucket: String, object: String },

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl StorageError {
    pub fn not_found(bucket: &str, object: &str) -> Self {
        StorageError::NotFound {
            bucket: bucket.to_string(),
            object: object.to_string(),
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, StorageError::NotFound { .. })
    }
}
