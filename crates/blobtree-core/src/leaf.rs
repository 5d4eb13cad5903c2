use std::fs::{self, File, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};

/// Handle to the file holding one key's bytes.
///
/// The handle is a path, not an open file: a later split may move the leaf,
/// after which the handle goes stale and the key must be looked up again.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Leaf {
    key: String,
    path: PathBuf,
}

impl Leaf {
    pub(crate) fn new(key: String, path: PathBuf) -> Self {
        Self { key, path }
    }

    /// Textual form of the key that owns this leaf.
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Location of the leaf file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Current size in bytes.
    pub fn len(&self) -> io::Result<u64> {
        Ok(fs::metadata(&self.path)?.len())
    }

    pub fn is_empty(&self) -> io::Result<bool> {
        Ok(self.len()? == 0)
    }

    /// Open the leaf for reading.
    pub fn open_read(&self) -> io::Result<File> {
        File::open(&self.path)
    }

    /// Open the leaf for writing, truncating existing content.
    ///
    /// The file must already exist; a leaf is only ever created by the tree.
    pub fn open_write(&self) -> io::Result<File> {
        OpenOptions::new().write(true).truncate(true).open(&self.path)
    }
}
