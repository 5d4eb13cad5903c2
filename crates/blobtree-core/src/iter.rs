use std::collections::VecDeque;
use std::fs;
use std::path::{Path, PathBuf};

use tracing::debug;

use crate::lock::LOCK_SUFFIX;
use crate::resolver::PARKED_SUFFIX;

/// Returns `true` for directory entries that are bookkeeping rather than
/// tree nodes: dot-files (key maps, settings, staging), lock sentinels and
/// leaves parked by an unfinished split.
pub fn is_bookkeeping(name: &str) -> bool {
    name.starts_with('.') || name.ends_with(LOCK_SUFFIX) || name.ends_with(PARKED_SUFFIX)
}

/// Breadth-first walk over the leaf files of a tree.
///
/// Directories are read only when the walk reaches them. A directory that
/// disappears before then is skipped.
#[derive(Debug)]
pub struct LeafIter {
    frontier: VecDeque<PathBuf>,
}

impl LeafIter {
    pub fn new(root: &Path) -> Self {
        let mut iter = Self {
            frontier: VecDeque::new(),
        };
        iter.expand(root);
        iter
    }

    fn expand(&mut self, dir: &Path) {
        let entries = match fs::read_dir(dir) {
            Ok(entries) => entries,
            Err(e) => {
                debug!(dir = %dir.display(), error = %e, "skipping unreadable directory");
                return;
            }
        };
        for entry in entries.flatten() {
            let name = entry.file_name();
            if is_bookkeeping(&name.to_string_lossy()) {
                continue;
            }
            self.frontier.push_back(entry.path());
        }
    }
}

impl Iterator for LeafIter {
    type Item = PathBuf;

    fn next(&mut self) -> Option<PathBuf> {
        while let Some(path) = self.frontier.pop_front() {
            match fs::metadata(&path) {
                Ok(meta) if meta.is_dir() => self.expand(&path),
                Ok(meta) if meta.is_file() => return Some(path),
                _ => {}
            }
        }
        None
    }
}
