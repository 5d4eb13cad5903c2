use std::fmt;
use std::fs::{self, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::RwLock;
use std::thread;
use std::time::SystemTime;

use tracing::{debug, info, warn};

use crate::buckets;
use crate::config::StoreConfig;
use crate::error::{BlobError, BlobResult};
use crate::iter::LeafIter;
use crate::keymap::{self, Attributes, LeafEntry};
use crate::leaf::Leaf;
use crate::lock::{self, AdvisoryLock, LockMode};
use crate::resolver::{NodeState, Resolution, Resolver};
use crate::settings::{Settings, SETTINGS_FILE};

/// Outcome of one pass of the create loop.
#[derive(Debug)]
pub(crate) enum CreateStep {
    /// A fresh leaf was claimed for the key.
    Created(Leaf),
    /// A colliding leaf was pushed one level down; resolve again.
    Split,
    /// The tree changed under us; resolve again without backing off.
    Retry,
    /// Another party holds the split sentinel at this path.
    Busy(PathBuf),
}

/// Summary of a [`BlobTree::purge_older_than`] run.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct PurgeReport {
    /// Leaves looked at.
    pub examined: usize,
    /// Leaves removed together with their key-map entries.
    pub removed: usize,
}

/// A blob store laid out as a hashed directory tree.
///
/// Keys hash to a bucket under the root; a bucket is either a leaf file or,
/// once two keys collide there, a directory bucketed by the next prime. The
/// on-disk tree is the only state: every operation resolves its key afresh.
///
/// Operations from one process are serialized by a reader-writer lock:
/// lookups share it, mutations take it exclusively. Other processes are
/// excluded only where advisory lock files are taken (splits, deletes and
/// key-map access).
#[derive(Debug)]
pub struct BlobTree {
    resolver: Resolver,
    starting_prime: u32,
    compressed: AtomicBool,
    config: StoreConfig,
    rw: RwLock<()>,
}

impl BlobTree {
    /// Open the database at `config.root`, creating it if needed.
    ///
    /// A new database records its starting prime in `.dbInfo`. An existing
    /// one keeps the prime it was created with; requesting a different one
    /// fails with [`BlobError::IllegalModification`].
    pub fn open(config: StoreConfig) -> BlobResult<Self> {
        let root = config.root.clone();
        match fs::metadata(&root) {
            Ok(meta) if !meta.is_dir() => return Err(BlobError::NotADirectory(root)),
            Ok(_) => {}
            Err(e) if e.kind() == io::ErrorKind::NotFound => fs::create_dir_all(&root)?,
            Err(e) => return Err(e.into()),
        }

        let settings = bootstrap_settings(&root, config.starting_prime)?;
        let resolver = Resolver::new(&root, settings.starting_prime)?;

        info!(
            root = %root.display(),
            starting_prime = settings.starting_prime,
            compressed = settings.compressed,
            "blob tree opened"
        );

        Ok(Self {
            resolver,
            starting_prime: settings.starting_prime,
            compressed: AtomicBool::new(settings.compressed),
            config,
            rw: RwLock::new(()),
        })
    }

    /// Database root directory.
    pub fn root(&self) -> &Path {
        self.resolver.root()
    }

    /// Prime used for the top level.
    pub fn starting_prime(&self) -> u32 {
        self.starting_prime
    }

    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    pub(crate) fn resolver(&self) -> &Resolver {
        &self.resolver
    }

    /// Create an empty leaf for `key`.
    ///
    /// Fails with [`BlobError::DuplicateKey`] if the key already has one and
    /// with [`BlobError::FileInUse`] if a colliding leaf stays locked by
    /// another party for longer than the configured attempts allow.
    pub fn create(&self, key: impl fmt::Display) -> BlobResult<Leaf> {
        let key = key.to_string();
        let _guard = self.rw.write().expect("lock poisoned");

        let mut busy = 0u32;
        let mut splits = 0usize;
        loop {
            match self.try_create(&key)? {
                CreateStep::Created(leaf) => {
                    debug!(key = %key, path = %leaf.path().display(), splits, "leaf created");
                    return Ok(leaf);
                }
                CreateStep::Split => splits += 1,
                CreateStep::Retry => {}
                CreateStep::Busy(sentinel) => {
                    busy += 1;
                    if busy >= self.config.max_create_attempts {
                        return Err(BlobError::FileInUse(sentinel, busy));
                    }
                    let delay = self.config.lock_backoff * busy;
                    debug!(
                        key = %key,
                        sentinel = %sentinel.display(),
                        attempt = busy,
                        delay_ms = delay.as_millis() as u64,
                        "split sentinel busy; backing off"
                    );
                    thread::sleep(delay);
                }
            }
        }
    }

    fn try_create(&self, key: &str) -> BlobResult<CreateStep> {
        let res = self.resolver.resolve(key)?;
        match res.state {
            NodeState::Vacant => self.claim_vacant(key, &res),
            NodeState::Leaf => {
                let map = keymap::load_locked(&res.dir)?.ok_or_else(|| {
                    BlobError::corrupt(&res.dir, format!("leaf {} has no key map", res.name))
                })?;
                if map.maps(key, &res.name) {
                    return Err(BlobError::DuplicateKey(key.to_string()));
                }
                self.split(&res)
            }
        }
    }

    /// Create the leaf file and its key-map entry while holding the
    /// directory's key-map lock.
    fn claim_vacant(&self, key: &str, res: &Resolution) -> BlobResult<CreateStep> {
        let path = res.path();
        let mut created = false;
        let outcome = keymap::update(&res.dir, |map| {
            match OpenOptions::new().write(true).create_new(true).open(&path) {
                Ok(_) => created = true,
                // Another process claimed the slot since we resolved it.
                Err(e) if e.kind() == io::ErrorKind::AlreadyExists => return Ok(false),
                Err(e) => return Err(e.into()),
            }
            // Entries still naming this slot point at a leaf that is gone.
            let stale: Vec<String> = map
                .iter()
                .filter(|(other, entry)| *other != key && entry.leaf == res.name)
                .map(|(other, _)| other.to_string())
                .collect();
            for other in stale {
                warn!(
                    dir = %res.dir.display(),
                    key = %other,
                    leaf = %res.name,
                    "dropping dangling key-map entry for reclaimed slot"
                );
                map.remove(&other);
            }
            map.insert(key, LeafEntry::new(&res.name));
            Ok(true)
        });
        match outcome {
            Ok(true) => Ok(CreateStep::Created(Leaf::new(key.to_string(), path))),
            Ok(false) => Ok(CreateStep::Retry),
            Err(e) => {
                if created {
                    let _ = fs::remove_file(&path);
                }
                Err(e)
            }
        }
    }

    /// Look up the leaf for `key`. A missing key is `Ok(None)`.
    pub fn get(&self, key: impl fmt::Display) -> BlobResult<Option<Leaf>> {
        let key = key.to_string();
        let _guard = self.rw.read().expect("lock poisoned");
        Ok(self
            .locate(&key)?
            .map(|(res, _)| Leaf::new(key, res.path())))
    }

    /// Returns `true` if `key` currently has a leaf.
    pub fn exists(&self, key: impl fmt::Display) -> BlobResult<bool> {
        Ok(self.get(key)?.is_some())
    }

    /// Size of the leaf for `key`, or `None` if the key is absent.
    pub fn size(&self, key: impl fmt::Display) -> BlobResult<Option<u64>> {
        match self.get(key)? {
            Some(leaf) => Ok(Some(leaf.len()?)),
            None => Ok(None),
        }
    }

    /// Remove the leaf and key-map entry for `key`.
    ///
    /// Deleting an absent key succeeds; the return value is always `true`.
    pub fn delete(&self, key: impl fmt::Display) -> BlobResult<bool> {
        let key = key.to_string();
        let _guard = self.rw.write().expect("lock poisoned");

        loop {
            let Some((res, _)) = self.locate(&key)? else {
                debug!(key = %key, "delete of absent key");
                return Ok(true);
            };
            let sentinel = lock::sentinel_path(&res.dir, &res.name);
            let held = AdvisoryLock::acquire(&sentinel, LockMode::Exclusive)?;
            if !is_file(&res.path())? {
                // Split by another process while we waited for the sentinel.
                held.release_and_remove()?;
                continue;
            }
            let outcome = remove_leaf(&res, &key);
            held.release_and_remove()?;
            outcome?;
            debug!(key = %key, path = %res.path().display(), "leaf deleted");
            return Ok(true);
        }
    }

    /// Attributes recorded for `key`.
    pub fn attributes(&self, key: impl fmt::Display) -> BlobResult<Attributes> {
        let key = key.to_string();
        let _guard = self.rw.read().expect("lock poisoned");
        match self.locate(&key)? {
            Some((_, entry)) => Ok(entry.attributes),
            None => Err(BlobError::KeyNotFound(key)),
        }
    }

    /// Replace the attributes of `key` wholesale.
    pub fn set_attributes(&self, key: impl fmt::Display, attributes: Attributes) -> BlobResult<()> {
        let key = key.to_string();
        let _guard = self.rw.write().expect("lock poisoned");
        let Some((res, _)) = self.locate(&key)? else {
            return Err(BlobError::KeyNotFound(key));
        };
        keymap::update(&res.dir, |map| match map.get_mut(&key) {
            Some(entry) if entry.leaf == res.name => {
                entry.attributes = attributes;
                Ok(())
            }
            _ => Err(BlobError::KeyNotFound(key.clone())),
        })
    }

    /// Iterate over the paths of all leaves, breadth first.
    ///
    /// The walk reads the tree lazily and tolerates concurrent changes: a
    /// directory that vanishes is skipped and new leaves may or may not show.
    pub fn iter(&self) -> LeafIter {
        LeafIter::new(self.root())
    }

    /// Remove every leaf last modified before `cutoff`, with its key-map entry.
    pub fn purge_older_than(&self, cutoff: SystemTime) -> BlobResult<PurgeReport> {
        let _guard = self.rw.write().expect("lock poisoned");
        let mut report = PurgeReport::default();

        for path in self.iter() {
            report.examined += 1;
            let modified = match fs::metadata(&path).and_then(|m| m.modified()) {
                Ok(t) => t,
                Err(e) if e.kind() == io::ErrorKind::NotFound => continue,
                Err(e) => return Err(e.into()),
            };
            if modified >= cutoff {
                continue;
            }
            let (Some(dir), Some(name)) = (path.parent(), path.file_name()) else {
                continue;
            };
            let name = name.to_string_lossy().into_owned();
            let held = AdvisoryLock::acquire(lock::sentinel_path(dir, &name), LockMode::Exclusive)?;
            let outcome = purge_leaf(dir, &name, &path);
            held.release_and_remove()?;
            if outcome? {
                report.removed += 1;
            }
        }

        info!(
            root = %self.root().display(),
            examined = report.examined,
            removed = report.removed,
            "purge finished"
        );
        Ok(report)
    }

    /// Store new values compressed from now on. Cannot be undone.
    pub fn enable_compression(&self) -> BlobResult<()> {
        let _guard = self.rw.write().expect("lock poisoned");
        if self.compressed.load(Ordering::Acquire) {
            return Ok(());
        }
        let root = self.root();
        let held = AdvisoryLock::acquire(settings_lock_path(root), LockMode::Exclusive)?;
        let outcome = Settings::load(root).and_then(|current| {
            let mut settings = current.unwrap_or_else(|| Settings::new(self.starting_prime));
            settings.compressed = true;
            settings.store(root)
        });
        held.release()?;
        outcome?;
        self.compressed.store(true, Ordering::Release);
        info!(root = %root.display(), "compression enabled");
        Ok(())
    }

    /// Returns `true` if new values are written compressed.
    pub fn is_compression_enabled(&self) -> bool {
        self.compressed.load(Ordering::Acquire)
    }

    /// Resolve `key` and confirm the leaf there belongs to it.
    fn locate(&self, key: &str) -> BlobResult<Option<(Resolution, LeafEntry)>> {
        let res = self.resolver.resolve(key)?;
        if res.state != NodeState::Leaf {
            return Ok(None);
        }
        let map = match keymap::load(&res.dir)? {
            Some(map) => map,
            // The map may be mid-creation in another process; wait on its lock.
            None => keymap::load_locked(&res.dir)?.ok_or_else(|| {
                BlobError::corrupt(&res.dir, format!("leaf {} has no key map", res.name))
            })?,
        };
        match map.get(key) {
            Some(entry) if entry.leaf == res.name => {
                let entry = entry.clone();
                Ok(Some((res, entry)))
            }
            _ => Ok(None),
        }
    }
}

/// Load or initialize `.dbInfo` under its lock.
fn bootstrap_settings(root: &Path, requested: Option<u32>) -> BlobResult<Settings> {
    let held = AdvisoryLock::acquire(settings_lock_path(root), LockMode::Exclusive)?;
    let outcome = match Settings::load(root) {
        Ok(Some(persisted)) => match requested {
            Some(prime) if prime != persisted.starting_prime => {
                Err(BlobError::IllegalModification {
                    persisted: persisted.starting_prime,
                    requested: prime,
                })
            }
            _ => Ok(persisted),
        },
        Ok(None) => {
            let prime = requested.unwrap_or(buckets::DEFAULT_STARTING_PRIME);
            if !buckets::contains(prime) {
                Err(BlobError::InvalidStartingPrime(prime))
            } else {
                let settings = Settings::new(prime);
                settings.store(root).map(|()| settings)
            }
        }
        Err(e) => Err(e),
    };
    held.release()?;
    outcome
}

fn settings_lock_path(root: &Path) -> PathBuf {
    root.join(format!("{SETTINGS_FILE}{}", lock::LOCK_SUFFIX))
}

fn is_file(path: &Path) -> BlobResult<bool> {
    match fs::metadata(path) {
        Ok(meta) => Ok(meta.is_file()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(e.into()),
    }
}

fn remove_leaf(res: &Resolution, key: &str) -> BlobResult<()> {
    keymap::update(&res.dir, |map| {
        map.remove(key);
        Ok(())
    })?;
    match fs::remove_file(res.path()) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}

/// Returns `true` if the leaf was still there to remove.
fn purge_leaf(dir: &Path, name: &str, path: &Path) -> BlobResult<bool> {
    if !is_file(path)? {
        return Ok(false);
    }
    keymap::update(dir, |map| {
        let owner = map.owner_of(name).map(|(key, _)| key.to_string());
        if let Some(owner) = owner {
            map.remove(&owner);
        }
        Ok(())
    })?;
    fs::remove_file(path)?;
    debug!(path = %path.display(), "stale leaf purged");
    Ok(true)
}
