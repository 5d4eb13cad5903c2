use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Configuration for opening a blob tree.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Database root directory.
    pub root: PathBuf,

    /// Starting prime to require. `None` adopts whatever the database was
    /// created with, or [`crate::buckets::DEFAULT_STARTING_PRIME`] for a new one.
    pub starting_prime: Option<u32>,

    /// How many times `create` retries a busy split before giving up (default: 10).
    pub max_create_attempts: u32,

    /// Base delay between split retries; attempt `n` waits `n` times this (default: 500ms).
    pub lock_backoff: Duration,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            root: PathBuf::from("./blobtree"),
            starting_prime: None,
            max_create_attempts: 10,
            lock_backoff: Duration::from_millis(500),
        }
    }
}

impl StoreConfig {
    /// Create a new config rooted at `root`.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            ..Default::default()
        }
    }

    /// Require a specific starting prime.
    pub fn starting_prime(mut self, prime: u32) -> Self {
        self.starting_prime = Some(prime);
        self
    }

    /// Set the split retry ceiling.
    pub fn max_create_attempts(mut self, attempts: u32) -> Self {
        self.max_create_attempts = attempts;
        self
    }

    /// Set the base backoff between split retries.
    pub fn lock_backoff(mut self, backoff: Duration) -> Self {
        self.lock_backoff = backoff;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = StoreConfig::default();
        assert_eq!(config.root, PathBuf::from("./blobtree"));
        assert_eq!(config.starting_prime, None);
        assert_eq!(config.max_create_attempts, 10);
        assert_eq!(config.lock_backoff, Duration::from_millis(500));
    }

    #[test]
    fn test_config_builder() {
        let config = StoreConfig::new("/tmp/blobs")
            .starting_prime(7)
            .max_create_attempts(3)
            .lock_backoff(Duration::from_millis(5));

        assert_eq!(config.root, PathBuf::from("/tmp/blobs"));
        assert_eq!(config.starting_prime, Some(7));
        assert_eq!(config.max_create_attempts, 3);
        assert_eq!(config.lock_backoff, Duration::from_millis(5));
    }
}
