//! Turning a colliding leaf into a directory.
//!
//! The occupied slot `<dir>/<name>` is guarded by the sentinel
//! `<dir>/<name>.lock`. Holding it, the leaf is moved into a hidden staging
//! directory which is then renamed onto the slot, so the slot is a file or a
//! directory at every instant. The owning key then resolves one level
//! deeper: its entry is written to the new directory's key map before the
//! leaf gets its final name there, and only afterwards dropped from the
//! parent map. A crash in between leaves a visible `<name>.tmp` or a
//! dangling parent entry, never a leaf without an owner.

use std::fs;
use std::io;

use tracing::debug;

use crate::buckets;
use crate::error::{BlobError, BlobResult};
use crate::keymap;
use crate::lock::{self, AdvisoryLock};
use crate::resolver::{NodeState, Resolution, PARKED_SUFFIX};
use crate::tree::{BlobTree, CreateStep};

impl BlobTree {
    /// Push the leaf at `res` one level down.
    ///
    /// A slot bucketed by the last prime in the table cannot be split; that
    /// is reported before anything on disk changes.
    pub(crate) fn split(&self, res: &Resolution) -> BlobResult<CreateStep> {
        let below = res.depth + 1;
        if buckets::prime_at(below).is_none() {
            return Err(BlobError::BucketTableExhausted { depth: below });
        }
        let sentinel = lock::sentinel_path(&res.dir, &res.name);
        let Some(held) = AdvisoryLock::try_acquire(&sentinel)? else {
            return Ok(CreateStep::Busy(sentinel));
        };
        let outcome = self.split_locked(res);
        match (outcome, held.release_and_remove()) {
            (Ok(step), Ok(())) => Ok(step),
            (Err(e), _) => Err(e),
            (Ok(_), Err(e)) => Err(e.into()),
        }
    }

    fn split_locked(&self, res: &Resolution) -> BlobResult<CreateStep> {
        let slot = res.path();
        match fs::metadata(&slot) {
            Ok(meta) if meta.is_file() => {}
            // Split or deleted by someone else since we resolved.
            Ok(_) => return Ok(CreateStep::Retry),
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(CreateStep::Retry),
            Err(e) => return Err(e.into()),
        }

        let parent_map = keymap::load_locked(&res.dir)?.ok_or_else(|| {
            BlobError::corrupt(&res.dir, format!("leaf {} has no key map", res.name))
        })?;
        let (owner, entry) = parent_map
            .owner_of(&res.name)
            .map(|(key, entry)| (key.to_string(), entry.clone()))
            .ok_or_else(|| BlobError::OrphanedLeaf(slot.clone()))?;

        let staging = tempfile::Builder::new()
            .prefix(".split.")
            .suffix(".tmp")
            .tempdir_in(&res.dir)
            .map_err(|source| BlobError::MakeDirectory {
                path: res.dir.clone(),
                source,
            })?
            .keep();
        let parked = format!("{}{PARKED_SUFFIX}", res.name);
        let staged_leaf = staging.join(&parked);
        fs::rename(&slot, &staged_leaf).map_err(|source| BlobError::RelocateLeaf {
            from: slot.clone(),
            to: staged_leaf.clone(),
            source,
        })?;
        fs::rename(&staging, &slot).map_err(|source| BlobError::Rename {
            from: staging.clone(),
            to: slot.clone(),
            source,
        })?;

        let moved = slot.join(&parked);
        let target = self.resolver().resolve(&owner)?;
        if target.dir != slot || target.state != NodeState::Vacant {
            return Err(BlobError::corrupt(
                &slot,
                format!("key {owner} did not resolve into its new directory"),
            ));
        }

        keymap::update(&target.dir, |map| {
            map.insert(owner.as_str(), entry);
            Ok(())
        })?;
        let relocated = target.path();
        fs::rename(&moved, &relocated).map_err(|source| BlobError::RelocateLeaf {
            from: moved.clone(),
            to: relocated.clone(),
            source,
        })?;
        keymap::update(&res.dir, |map| {
            map.remove(&owner);
            Ok(())
        })?;

        debug!(
            slot = %slot.display(),
            owner = %owner,
            depth = target.depth,
            leaf = %target.name,
            "leaf split"
        );
        Ok(CreateStep::Split)
    }
}

#[cfg(test)]
mod tests {
    use crate::config::StoreConfig;
    use crate::hash::KeyHasher;
    use crate::keymap;
    use crate::resolver::Resolver;
    use crate::lock;
    use crate::tree::BlobTree;
    use std::fs;
    use std::io::{Read, Write};

    /// Two keys sharing a top-level bucket under prime 2 and parting ways
    /// under 3.
    fn colliding_pair(root: &std::path::Path) -> (String, String) {
        let resolver = Resolver::new(root, 2).unwrap();
        let below = resolver.base_depth() + 1;
        let first = "seed".to_string();
        let top = resolver.resolve(&first).unwrap().name;
        let next = resolver.resolve_from(&first, below).unwrap().name;
        let second = (0..)
            .map(|i| format!("other-{i}"))
            .find(|k| {
                resolver.resolve(k).unwrap().name == top
                    && resolver.resolve_from(k, below).unwrap().name != next
            })
            .unwrap();
        (first, second)
    }

    #[test]
    fn split_moves_owner_into_new_directory() {
        let dir = tempfile::tempdir().unwrap();
        let tree = BlobTree::open(StoreConfig::new(dir.path()).starting_prime(2)).unwrap();
        let (first, second) = colliding_pair(dir.path());

        let leaf = tree.create(&first).unwrap();
        leaf.open_write().unwrap().write_all(b"kept").unwrap();
        let slot = leaf.path().to_path_buf();

        tree.create(&second).unwrap();
        assert!(slot.is_dir());

        let moved = tree.get(&first).unwrap().unwrap();
        assert_eq!(moved.path().parent(), Some(slot.as_path()));
        let mut buf = String::new();
        moved.open_read().unwrap().read_to_string(&mut buf).unwrap();
        assert_eq!(buf, "kept");

        // The owner's entry left the parent map and landed in the child's.
        let parent = keymap::load(dir.path()).unwrap().unwrap();
        assert!(!parent.contains_key(&first));
        let child = keymap::load(&slot).unwrap().unwrap();
        assert!(child.contains_key(&first));

        // Neither the staging directory nor the sentinel survived.
        let names: Vec<String> = fs::read_dir(dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        assert!(names.iter().all(|n| !n.starts_with(".split.")));
        assert!(names.iter().all(|n| !n.ends_with(".lock") || n.starts_with('.')));
    }

    #[test]
    fn leaf_without_owner_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let tree = BlobTree::open(StoreConfig::new(dir.path()).starting_prime(2)).unwrap();
        let (first, second) = colliding_pair(dir.path());

        tree.create(&first).unwrap();
        keymap::update(dir.path(), |map| {
            map.remove(&first);
            Ok(())
        })
        .unwrap();

        let err = tree.create(&second).unwrap_err();
        assert!(matches!(err, crate::BlobError::OrphanedLeaf(_)));
    }

    #[test]
    fn last_prime_slot_is_left_untouched() {
        let dir = tempfile::tempdir().unwrap();
        let tree = BlobTree::open(StoreConfig::new(dir.path()).starting_prime(65521)).unwrap();

        let leaf = tree.create("first").unwrap();
        leaf.open_write().unwrap().write_all(b"precious").unwrap();
        let bucket = KeyHasher::PLACEMENT.hash("first").bucket(65521);
        let rival = (0..)
            .map(|i| format!("rival-{i}"))
            .find(|k| KeyHasher::PLACEMENT.hash(k).bucket(65521) == bucket)
            .unwrap();

        let err = tree.create(&rival).unwrap_err();
        assert!(matches!(err, crate::BlobError::BucketTableExhausted { .. }));

        // The colliding leaf was not moved and no sentinel was left behind.
        assert!(leaf.path().is_file());
        let name = leaf.path().file_name().unwrap().to_string_lossy().into_owned();
        assert!(!lock::sentinel_path(dir.path(), &name).exists());
        let found = tree.get("first").unwrap().expect("still stored");
        let mut buf = String::new();
        found.open_read().unwrap().read_to_string(&mut buf).unwrap();
        assert_eq!(buf, "precious");
        assert!(matches!(
            tree.create("first").unwrap_err(),
            crate::BlobError::DuplicateKey(_)
        ));
    }
}
