//! Per-directory key maps.
//!
//! Every directory that holds leaves carries a `.key.map` file recording
//! which key owns which leaf. The map is read and written as a single JSON
//! document. Writes go to a temporary sibling and are renamed into place, so
//! a reader sees either the old or the new map, never a torn one. Writers
//! and locked readers additionally serialize on `.key.map.lock`.

use std::collections::BTreeMap;
use std::fs::File;
use std::io::{self, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{BlobError, BlobResult};
use crate::lock::{AdvisoryLock, LockMode};

/// File name of a directory's key map.
pub const KEY_MAP_FILE: &str = ".key.map";

/// File name of the lock guarding a directory's key map.
pub const KEY_MAP_LOCK_FILE: &str = ".key.map.lock";

/// Arbitrary attributes attached to a stored key.
pub type Attributes = BTreeMap<String, serde_json::Value>;

/// What a key map records for one key.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct LeafEntry {
    /// File name of the leaf inside the key map's directory.
    pub leaf: String,
    /// Attribute bag. Maps written before attributes existed omit it.
    #[serde(default)]
    pub attributes: Attributes,
}

impl LeafEntry {
    pub fn new(leaf: impl Into<String>) -> Self {
        Self {
            leaf: leaf.into(),
            attributes: Attributes::new(),
        }
    }
}

/// Key → leaf mapping for one directory.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct KeyMap {
    entries: BTreeMap<String, LeafEntry>,
}

impl KeyMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &str) -> Option<&LeafEntry> {
        self.entries.get(key)
    }

    pub fn get_mut(&mut self, key: &str) -> Option<&mut LeafEntry> {
        self.entries.get_mut(key)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    /// Returns `true` if `key` is recorded as owning the leaf `leaf`.
    pub fn maps(&self, key: &str, leaf: &str) -> bool {
        self.entries.get(key).is_some_and(|e| e.leaf == leaf)
    }

    pub fn insert(&mut self, key: impl Into<String>, entry: LeafEntry) -> Option<LeafEntry> {
        self.entries.insert(key.into(), entry)
    }

    pub fn remove(&mut self, key: &str) -> Option<LeafEntry> {
        self.entries.remove(key)
    }

    /// The key owning `leaf`, if any.
    pub fn owner_of(&self, leaf: &str) -> Option<(&str, &LeafEntry)> {
        self.entries
            .iter()
            .find(|(_, e)| e.leaf == leaf)
            .map(|(k, e)| (k.as_str(), e))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &LeafEntry)> {
        self.entries.iter().map(|(k, e)| (k.as_str(), e))
    }
}

/// Path of the key map file inside `dir`.
pub fn path(dir: &Path) -> PathBuf {
    dir.join(KEY_MAP_FILE)
}

/// Returns `true` if `dir` has a key map on disk.
pub fn exists(dir: &Path) -> bool {
    path(dir).is_file()
}

/// Read the key map of `dir` without taking the cross-process lock.
///
/// Returns `Ok(None)` when the directory has no key map.
pub fn load(dir: &Path) -> BlobResult<Option<KeyMap>> {
    read(&path(dir))
}

/// Read the key map of `dir` while holding its lock in shared mode.
pub fn load_locked(dir: &Path) -> BlobResult<Option<KeyMap>> {
    let lock = AdvisoryLock::acquire(dir.join(KEY_MAP_LOCK_FILE), LockMode::Shared)?;
    let map = read(&path(dir));
    lock.release()?;
    map
}

/// Persist `map` as the key map of `dir`.
pub fn store(dir: &Path, map: &KeyMap) -> BlobResult<()> {
    let lock = AdvisoryLock::acquire(dir.join(KEY_MAP_LOCK_FILE), LockMode::Exclusive)?;
    let result = write(dir, map);
    lock.release()?;
    result?;
    debug!(dir = %dir.display(), entries = map.len(), "key map stored");
    Ok(())
}

/// Read-modify-write the key map of `dir` under its exclusive lock.
///
/// A missing map starts out empty. The map is written back only if `f`
/// succeeded and changed it.
pub fn update<T>(dir: &Path, f: impl FnOnce(&mut KeyMap) -> BlobResult<T>) -> BlobResult<T> {
    let lock = AdvisoryLock::acquire(dir.join(KEY_MAP_LOCK_FILE), LockMode::Exclusive)?;
    let result = read(&path(dir)).and_then(|current| {
        let original = current.unwrap_or_default();
        let mut map = original.clone();
        let value = f(&mut map)?;
        if map != original {
            write(dir, &map)?;
            debug!(dir = %dir.display(), entries = map.len(), "key map updated");
        }
        Ok(value)
    });
    lock.release()?;
    result
}

fn read(file: &Path) -> BlobResult<Option<KeyMap>> {
    let handle = match File::open(file) {
        Ok(f) => f,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e.into()),
    };
    let map = serde_json::from_reader(BufReader::new(handle))
        .map_err(|e| BlobError::corrupt(file, format!("unreadable key map: {e}")))?;
    Ok(Some(map))
}

fn write(dir: &Path, map: &KeyMap) -> BlobResult<()> {
    let tmp = tempfile::Builder::new()
        .prefix(".key.map.")
        .suffix(".tmp")
        .tempfile_in(dir)?;
    {
        let mut writer = BufWriter::new(tmp.as_file());
        serde_json::to_writer(&mut writer, map)
            .map_err(|e| BlobError::Serialization(e.to_string()))?;
        writer.flush()?;
    }
    tmp.as_file().sync_all()?;
    tmp.persist(path(dir)).map_err(|e| e.error)?;
    Ok(())
}
