use std::io;
use std::path::PathBuf;

/// Errors produced by the blob tree engine.
#[derive(Debug, thiserror::Error)]
pub enum BlobError {
    /// `create` was called for a key that already owns a leaf.
    #[error("duplicate key: {0}")]
    DuplicateKey(String),

    /// An attribute operation named a key with no leaf.
    #[error("key not found: {0}")]
    KeyNotFound(String),

    /// On-disk state contradicts the tree invariants (missing key-map next to
    /// a leaf, unparsable settings, ...). Needs manual inspection.
    #[error("corrupt database at {path}: {reason}")]
    CorruptDatabase { path: PathBuf, reason: String },

    /// The split lock could not be taken within the attempt ceiling.
    #[error("file in use: {0} (gave up after {1} attempts)")]
    FileInUse(PathBuf, u32),

    /// An existing database was opened with a different starting prime.
    #[error("illegal modification: database uses starting prime {persisted}, {requested} was requested")]
    IllegalModification { persisted: u32, requested: u32 },

    /// The requested starting prime is not in the bucket-size table.
    #[error("invalid starting prime: {0}")]
    InvalidStartingPrime(u32),

    /// Resolution descended past the last prime in the table.
    #[error("bucket table exhausted at depth {depth}")]
    BucketTableExhausted { depth: usize },

    /// The database root exists but is not a directory.
    #[error("not a directory: {0}")]
    NotADirectory(PathBuf),

    /// Creating the split staging directory failed.
    #[error("failed to create directory {path}: {source}")]
    MakeDirectory {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// Moving a leaf during a split failed.
    #[error("failed to relocate {from} to {to}: {source}")]
    RelocateLeaf {
        from: PathBuf,
        to: PathBuf,
        #[source]
        source: io::Error,
    },

    /// Renaming the staging directory onto the bucket slot failed.
    #[error("failed to rename {from} to {to}: {source}")]
    Rename {
        from: PathBuf,
        to: PathBuf,
        #[source]
        source: io::Error,
    },

    /// A leaf exists that no key-map entry names.
    #[error("orphaned leaf: {0}")]
    OrphanedLeaf(PathBuf),

    /// Key-map or settings (de)serialization failure.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// Any other I/O failure.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

impl BlobError {
    pub(crate) fn corrupt(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        Self::CorruptDatabase {
            path: path.into(),
            reason: reason.into(),
        }
    }
}

/// Result alias for blob tree operations.
pub type BlobResult<T> = Result<T, BlobError>;
