use blobtree_core::BlobError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StreamError {
    #[error(transparent)]
    Store(#[from] BlobError),

    #[error("compression failed: {0}")]
    CompressionFailed(String),

    #[error("decompression failed: {0}")]
    DecompressionFailed(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl StreamError {
    /// Returns `true` if the error means the key has no leaf.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::Store(BlobError::KeyNotFound(_)))
    }
}

pub type StreamResult<T> = Result<T, StreamError>;
