use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use crate::buckets;
use crate::error::{BlobError, BlobResult};
use crate::hash::KeyHasher;

/// Width of a node name.
pub const NODE_NAME_WIDTH: usize = 8;

/// Suffix of a leaf parked inside a slot that is being split.
pub const PARKED_SUFFIX: &str = ".tmp";

/// Format a bucket index as a node name.
pub fn node_name(bucket: u32) -> String {
    format!("{bucket:0width$}", width = NODE_NAME_WIDTH)
}

/// What currently occupies a resolved path.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum NodeState {
    /// Nothing; a leaf may be created here.
    Vacant,
    /// A regular file, owned by this key or by a colliding one.
    Leaf,
}

/// Where a key resolves to in the current tree shape.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Resolution {
    /// Directory containing the node.
    pub dir: PathBuf,
    /// Node name inside `dir`.
    pub name: String,
    /// Table index of the prime that produced `name`.
    pub depth: usize,
    pub state: NodeState,
}

impl Resolution {
    /// Full path of the node.
    pub fn path(&self) -> PathBuf {
        self.dir.join(&self.name)
    }
}

/// Maps keys to candidate paths by descending through bucket directories.
#[derive(Debug, Clone)]
pub struct Resolver {
    root: PathBuf,
    base: usize,
}

impl Resolver {
    /// Resolver for the tree at `root` whose top level uses `starting_prime`.
    pub fn new(root: impl Into<PathBuf>, starting_prime: u32) -> BlobResult<Self> {
        let base =
            buckets::index_of(starting_prime).ok_or(BlobError::InvalidStartingPrime(starting_prime))?;
        Ok(Self {
            root: root.into(),
            base,
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Table index of the root's prime.
    pub fn base_depth(&self) -> usize {
        self.base
    }

    /// Resolve `key` starting at the root.
    pub fn resolve(&self, key: &str) -> BlobResult<Resolution> {
        self.resolve_from(key, self.base)
    }

    /// Resolve `key`, using the prime at table index `start_depth` for the
    /// root level and the following primes below it.
    pub fn resolve_from(&self, key: &str, start_depth: usize) -> BlobResult<Resolution> {
        let digest = KeyHasher::PLACEMENT.hash(key);
        let mut dir = self.root.clone();
        let mut depth = start_depth;
        loop {
            let prime =
                buckets::prime_at(depth).ok_or(BlobError::BucketTableExhausted { depth })?;
            let name = node_name(digest.bucket(prime));
            let node = dir.join(&name);
            let state = match fs::metadata(&node) {
                Ok(meta) if meta.is_dir() => {
                    dir = node;
                    depth += 1;
                    continue;
                }
                Ok(_) => NodeState::Leaf,
                Err(e) if e.kind() == io::ErrorKind::NotFound => NodeState::Vacant,
                Err(e) => return Err(e.into()),
            };
            return Ok(Resolution {
                dir,
                name,
                depth,
                state,
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn node_names_are_fixed_width() {
        assert_eq!(node_name(0), "00000000");
        assert_eq!(node_name(8008), "00008008");
    }

    #[test]
    fn rejects_unknown_prime() {
        let err = Resolver::new("/tmp", 10).unwrap_err();
        assert!(matches!(err, BlobError::InvalidStartingPrime(10)));
    }

    #[test]
    fn empty_tree_resolves_to_vacant_top_level() {
        let dir = tempfile::tempdir().unwrap();
        let resolver = Resolver::new(dir.path(), 5).unwrap();
        let res = resolver.resolve("hello").unwrap();
        assert_eq!(res.state, NodeState::Vacant);
        assert_eq!(res.dir, dir.path());
        assert_eq!(res.depth, resolver.base_depth());
        let bucket: u32 = res.name.parse().unwrap();
        assert!(bucket < 5);
    }

    #[test]
    fn descends_into_directories() {
        let dir = tempfile::tempdir().unwrap();
        let resolver = Resolver::new(dir.path(), 3).unwrap();
        let top = resolver.resolve("key").unwrap();
        fs::create_dir(top.path()).unwrap();

        let below = resolver.resolve("key").unwrap();
        assert_eq!(below.dir, top.path());
        assert_eq!(below.depth, top.depth + 1);
        // depth + 1 uses the next prime, 5
        assert!(below.name.parse::<u32>().unwrap() < 5);

        fs::write(below.path(), b"").unwrap();
        assert_eq!(resolver.resolve("key").unwrap().state, NodeState::Leaf);
    }

    #[test]
    fn exhausting_the_table_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let resolver = Resolver::new(dir.path(), 65521).unwrap();
        let top = resolver.resolve("deep").unwrap();
        fs::create_dir(top.path()).unwrap();
        let err = resolver.resolve("deep").unwrap_err();
        assert!(matches!(err, BlobError::BucketTableExhausted { .. }));
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(64))]

        #[test]
        fn resolution_is_deterministic(key in "[a-z0-9:/]{0,24}") {
            let dir = tempfile::tempdir().unwrap();
            let resolver = Resolver::new(dir.path(), 2).unwrap();
            let a = resolver.resolve(&key).unwrap();
            let b = resolver.resolve(&key).unwrap();
            prop_assert_eq!(a, b);
        }
    }
}
