//! Object storage for uploaded experiment files.
//!
//! Objects are addressed by slash-separated relative paths and are exposed to
//! clients through URLs built by [`ObjectStore::public_url`].

mod fs;

pub use fs::FsObjectStore;

use async_trait::async_trait;
use thiserror::Error;
use tokio::io::AsyncRead;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("object not found")]
    NotFound,
    #[error("object already exists: {0}")]
    AlreadyExists(String),
    #[error("invalid object path: {0}")]
    InvalidPath(String),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// An open object ready to be streamed.
pub struct ObjectHandle {
    pub reader: Box<dyn AsyncRead + Send + Unpin>,
    pub size: u64,
    pub content_type: String,
}

#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Stores `data` at `path`. Never overwrites an existing object.
    async fn put(&self, path: &str, data: &[u8], content_type: &str) -> Result<(), StorageError>;

    async fn open(&self, path: &str) -> Result<ObjectHandle, StorageError>;

    /// Removes the object. Returns false if it was already gone.
    async fn remove(&self, path: &str) -> Result<bool, StorageError>;

    /// Returns the URL clients use to retrieve the object.
    fn public_url(&self, path: &str) -> Result<String, StorageError>;
}

/// Validates a relative object path: non-empty segments of `[A-Za-z0-9._-]`,
/// with no `.` or `..` segments.
pub fn validate_path(path: &str) -> Result<(), StorageError> {
    if path.is_empty() || path.starts_with('/') {
        return Err(StorageError::InvalidPath(path.to_string()));
    }

    for segment in path.split('/') {
        let valid = !segment.is_empty()
            && segment != "."
            && segment != ".."
            && segment
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_'));
        if !valid {
            return Err(StorageError::InvalidPath(path.to_string()));
        }
    }

    Ok(())
}

#[must_use]
pub fn is_valid_path(path: &str) -> bool {
    validate_path(path).is_ok()
}
