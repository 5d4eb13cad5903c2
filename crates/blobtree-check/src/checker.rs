use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::{Path, PathBuf};

use blobtree_core::keymap::{self, KeyMap};
use blobtree_core::lock::{AdvisoryLock, LOCK_SUFFIX};
use blobtree_core::resolver::{NodeState, Resolver};
use blobtree_core::{BlobError, Settings};
use tracing::{debug, info};
use walkdir::WalkDir;

use crate::error::{CheckError, CheckResult};
use crate::report::{CheckReport, Problem};

const SPLIT_STAGING_PREFIX: &str = ".split.";

/// Read-only consistency check of a blob tree database.
///
/// The checker never repairs anything and never creates or writes files; lock
/// sentinels are only tested with a momentary shared lock. Run it against a
/// quiescent database: a split in progress shows up as a stale split
/// directory or lock.
#[derive(Debug, Clone)]
pub struct Checker {
    root: PathBuf,
}

/// What one directory holds, split by role.
#[derive(Default)]
struct Listing {
    leaves: BTreeSet<String>,
    sentinels: Vec<PathBuf>,
    staging: Vec<PathBuf>,
}

impl Checker {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Walk the whole database and collect every problem found.
    pub fn run(&self) -> CheckResult<CheckReport> {
        match fs::metadata(&self.root) {
            Ok(meta) if !meta.is_dir() => return Err(CheckError::NotADirectory(self.root.clone())),
            Ok(_) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(CheckError::MissingRoot(self.root.clone()))
            }
            Err(e) => return Err(e.into()),
        }

        let mut report = CheckReport {
            root: self.root.clone(),
            ..Default::default()
        };
        let resolver = self.check_settings(&mut report);

        let walker = WalkDir::new(&self.root)
            .into_iter()
            .filter_entry(|e| e.depth() == 0 || !e.file_name().to_string_lossy().starts_with('.'));
        for entry in walker {
            let entry = entry?;
            if !entry.file_type().is_dir() {
                continue;
            }
            report.directories += 1;
            self.check_dir(entry.path(), resolver.as_ref(), &mut report)?;
        }

        info!(
            root = %self.root.display(),
            directories = report.directories,
            leaves = report.leaves,
            problems = report.problems.len(),
            "check finished"
        );
        Ok(report)
    }

    fn check_settings(&self, report: &mut CheckReport) -> Option<Resolver> {
        let path = Settings::path(&self.root);
        match Settings::load(&self.root) {
            Ok(Some(settings)) => {
                report.starting_prime = Some(settings.starting_prime);
                Resolver::new(&self.root, settings.starting_prime).ok()
            }
            Ok(None) => {
                report.problems.push(Problem::MissingSettings { path });
                None
            }
            Err(BlobError::CorruptDatabase { reason, .. }) => {
                report.problems.push(Problem::InvalidSettings { path, reason });
                None
            }
            Err(e) => {
                report.problems.push(Problem::InvalidSettings {
                    path,
                    reason: e.to_string(),
                });
                None
            }
        }
    }

    fn check_dir(
        &self,
        dir: &Path,
        resolver: Option<&Resolver>,
        report: &mut CheckReport,
    ) -> CheckResult<()> {
        let listing = list(dir)?;
        report.leaves += listing.leaves.len();

        for path in listing.staging {
            report.problems.push(Problem::StaleSplitDir { path });
        }
        for path in listing.sentinels {
            match AdvisoryLock::is_held(&path)? {
                Some(false) => report.problems.push(Problem::StaleLock { path }),
                Some(true) => debug!(path = %path.display(), "sentinel is held; skipping"),
                None => debug!(path = %path.display(), "sentinel vanished; skipping"),
            }
        }

        let map = match keymap::load(dir) {
            Ok(Some(map)) => map,
            Ok(None) => {
                if !listing.leaves.is_empty() {
                    report.problems.push(Problem::MissingKeyMap {
                        dir: dir.to_path_buf(),
                    });
                }
                return Ok(());
            }
            Err(e) => {
                let reason = match e {
                    BlobError::CorruptDatabase { reason, .. } => reason,
                    other => other.to_string(),
                };
                report.problems.push(Problem::UnreadableKeyMap {
                    path: keymap::path(dir),
                    reason,
                });
                return Ok(());
            }
        };
        report.keys += map.len();

        check_entries(dir, &map, &listing.leaves, resolver, report);
        Ok(())
    }
}

fn list(dir: &Path) -> CheckResult<Listing> {
    let mut listing = Listing::default();
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let name = entry.file_name().to_string_lossy().into_owned();
        let file_type = entry.file_type()?;
        if name.starts_with(SPLIT_STAGING_PREFIX) && file_type.is_dir() {
            listing.staging.push(entry.path());
        } else if name.starts_with('.') {
            continue;
        } else if name.ends_with(LOCK_SUFFIX) {
            listing.sentinels.push(entry.path());
        } else if file_type.is_file() {
            listing.leaves.insert(name);
        }
    }
    Ok(listing)
}

fn check_entries(
    dir: &Path,
    map: &KeyMap,
    leaves: &BTreeSet<String>,
    resolver: Option<&Resolver>,
    report: &mut CheckReport,
) {
    let mut owners: BTreeMap<&str, Vec<String>> = BTreeMap::new();
    for (key, entry) in map.iter() {
        if !leaves.contains(&entry.leaf) {
            report.problems.push(Problem::DanglingEntry {
                dir: dir.to_path_buf(),
                key: key.to_string(),
                leaf: entry.leaf.clone(),
            });
            continue;
        }
        owners.entry(entry.leaf.as_str()).or_default().push(key.to_string());

        let Some(resolver) = resolver else { continue };
        let path = dir.join(&entry.leaf);
        match resolver.resolve(key) {
            Ok(res) if res.state == NodeState::Leaf && res.path() == path => {}
            Ok(res) => report.problems.push(Problem::MisplacedKey {
                path,
                key: key.to_string(),
                resolves_to: res.path(),
            }),
            Err(e) => debug!(key = %key, error = %e, "key does not resolve"),
        }
    }

    for leaf in leaves {
        match owners.get(leaf.as_str()) {
            None => report.problems.push(Problem::OrphanedLeaf {
                path: dir.join(leaf),
            }),
            Some(keys) if keys.len() > 1 => report.problems.push(Problem::SharedLeaf {
                path: dir.join(leaf),
                keys: keys.clone(),
            }),
            Some(_) => {}
        }
    }
}
