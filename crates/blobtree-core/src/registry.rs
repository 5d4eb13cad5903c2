use std::collections::HashMap;
use std::fs;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, Weak};

use tracing::debug;

use crate::config::StoreConfig;
use crate::error::{BlobError, BlobResult};
use crate::tree::BlobTree;

/// Hands out one shared [`BlobTree`] per database root.
///
/// Two handles on the same directory in one process must share the
/// in-process lock, so opens go through a registry keyed by the canonical
/// root. Entries are weak: a tree closes when its last handle drops.
#[derive(Debug, Default)]
pub struct TreeRegistry {
    trees: Mutex<HashMap<PathBuf, Weak<BlobTree>>>,
}

impl TreeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Open `config.root`, or return the live tree already open there.
    ///
    /// Requesting a starting prime other than the open tree's fails with
    /// [`BlobError::IllegalModification`].
    pub fn open(&self, config: StoreConfig) -> BlobResult<Arc<BlobTree>> {
        if !config.root.exists() {
            fs::create_dir_all(&config.root)?;
        }
        let canonical = fs::canonicalize(&config.root)?;

        let mut trees = self.trees.lock().expect("lock poisoned");
        trees.retain(|_, tree| tree.strong_count() > 0);

        if let Some(tree) = trees.get(&canonical).and_then(Weak::upgrade) {
            if let Some(requested) = config.starting_prime {
                if requested != tree.starting_prime() {
                    return Err(BlobError::IllegalModification {
                        persisted: tree.starting_prime(),
                        requested,
                    });
                }
            }
            debug!(root = %canonical.display(), "reusing open blob tree");
            return Ok(tree);
        }

        let tree = Arc::new(BlobTree::open(StoreConfig {
            root: canonical.clone(),
            ..config
        })?);
        trees.insert(canonical, Arc::downgrade(&tree));
        Ok(tree)
    }

    /// Number of trees with live handles.
    pub fn len(&self) -> usize {
        let trees = self.trees.lock().expect("lock poisoned");
        trees.values().filter(|t| t.strong_count() > 0).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn same_root_shares_one_tree() {
        let dir = tempfile::tempdir().unwrap();
        let registry = TreeRegistry::new();

        let a = registry.open(StoreConfig::new(dir.path())).unwrap();
        let b = registry
            .open(StoreConfig::new(dir.path().join(".").join("")))
            .unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(registry.len(), 1);

        a.create("k").unwrap();
        assert!(b.exists("k").unwrap());
    }

    #[test]
    fn conflicting_prime_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let registry = TreeRegistry::new();
        let _tree = registry
            .open(StoreConfig::new(dir.path()).starting_prime(7))
            .unwrap();
        let err = registry
            .open(StoreConfig::new(dir.path()).starting_prime(11))
            .unwrap_err();
        assert!(matches!(
            err,
            BlobError::IllegalModification { persisted: 7, requested: 11 }
        ));
        assert!(registry.open(StoreConfig::new(dir.path())).is_ok());
    }

    #[test]
    fn dropped_trees_are_forgotten() {
        let dir = tempfile::tempdir().unwrap();
        let registry = TreeRegistry::new();
        let tree = registry.open(StoreConfig::new(dir.path())).unwrap();
        assert!(!registry.is_empty());
        drop(tree);
        assert!(registry.is_empty());
    }
}
