use std::fmt;
use std::path::PathBuf;

use serde::Serialize;

/// One inconsistency found in a database.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Problem {
    /// The root has no `.dbInfo`.
    MissingSettings { path: PathBuf },
    /// `.dbInfo` exists but cannot be used.
    InvalidSettings { path: PathBuf, reason: String },
    /// A `.key.map` that does not parse.
    UnreadableKeyMap { path: PathBuf, reason: String },
    /// A directory holding leaves without a key map.
    MissingKeyMap { dir: PathBuf },
    /// A key-map entry naming a leaf that does not exist.
    DanglingEntry { dir: PathBuf, key: String, leaf: String },
    /// A leaf no key-map entry names.
    OrphanedLeaf { path: PathBuf },
    /// Several keys claiming the same leaf.
    SharedLeaf { path: PathBuf, keys: Vec<String> },
    /// A key whose hash no longer leads to the leaf it is recorded for.
    MisplacedKey { path: PathBuf, key: String, resolves_to: PathBuf },
    /// Staging directory left behind by an interrupted split.
    StaleSplitDir { path: PathBuf },
    /// Leaf sentinel nobody holds.
    StaleLock { path: PathBuf },
}

impl fmt::Display for Problem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MissingSettings { path } => write!(f, "missing settings file {}", path.display()),
            Self::InvalidSettings { path, reason } => {
                write!(f, "invalid settings {}: {reason}", path.display())
            }
            Self::UnreadableKeyMap { path, reason } => {
                write!(f, "unreadable key map {}: {reason}", path.display())
            }
            Self::MissingKeyMap { dir } => write!(f, "leaves without key map in {}", dir.display()),
            Self::DanglingEntry { dir, key, leaf } => {
                write!(f, "key {key:?} names missing leaf {leaf} in {}", dir.display())
            }
            Self::OrphanedLeaf { path } => write!(f, "orphaned leaf {}", path.display()),
            Self::SharedLeaf { path, keys } => {
                write!(f, "leaf {} claimed by {}", path.display(), keys.join(", "))
            }
            Self::MisplacedKey {
                path,
                key,
                resolves_to,
            } => write!(
                f,
                "key {key:?} stored at {} but resolves to {}",
                path.display(),
                resolves_to.display()
            ),
            Self::StaleSplitDir { path } => write!(f, "stale split directory {}", path.display()),
            Self::StaleLock { path } => write!(f, "stale lock {}", path.display()),
        }
    }
}

/// Outcome of checking one database.
#[derive(Clone, Debug, Default, Serialize)]
pub struct CheckReport {
    pub root: PathBuf,
    pub starting_prime: Option<u32>,
    pub directories: usize,
    pub leaves: usize,
    pub keys: usize,
    pub problems: Vec<Problem>,
}

impl CheckReport {
    pub fn is_clean(&self) -> bool {
        self.problems.is_empty()
    }
}
