//! # blobtree-core
//!
//! A key → blob store that keeps each value in its own file inside a
//! hashed directory tree.
//!
//! A key hashes to a bucket modulo a prime; the bucket names a file under
//! the database root. When a second key lands on an occupied bucket, the
//! bucket becomes a directory and both keys are bucketed again by the next
//! larger prime. Each directory records which key owns which leaf in a
//! `.key.map` file, and the root keeps its settings in `.dbInfo`.
//!
//! The engine holds no cache of the tree: every operation resolves its key
//! against the file system, so several processes may share a database.
//! Within a process, open databases through a [`TreeRegistry`] so that all
//! handles on one root share its lock.

pub mod buckets;
pub mod config;
pub mod error;
pub mod hash;
pub mod iter;
pub mod keymap;
pub mod leaf;
pub mod lock;
pub mod registry;
pub mod resolver;
pub mod settings;
mod split;
pub mod tree;

pub use config::StoreConfig;
pub use error::{BlobError, BlobResult};
pub use hash::{KeyDigest, KeyHasher};
pub use iter::LeafIter;
pub use keymap::{Attributes, KeyMap, LeafEntry};
pub use leaf::Leaf;
pub use registry::TreeRegistry;
pub use settings::Settings;
pub use tree::{BlobTree, PurgeReport};
