use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum CheckError {
    #[error("database root not found: {0}")]
    MissingRoot(PathBuf),

    #[error("not a directory: {0}")]
    NotADirectory(PathBuf),

    #[error("walk failed: {0}")]
    Walk(#[from] walkdir::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type CheckResult<T> = Result<T, CheckError>;
