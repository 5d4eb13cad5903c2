//! Streams over blob tree leaves.
//!
//! [`BlobWriter`] buffers writes to a key's leaf and compresses them with
//! zstd once the database has compression enabled. [`BlobReader`] sniffs
//! what a leaf holds and decompresses it transparently, so a database keeps
//! serving values written before compression was switched on.

pub mod error;
pub mod reader;
pub mod sniff;
pub mod writer;

pub use error::{StreamError, StreamResult};
pub use reader::BlobReader;
pub use sniff::Compression;
pub use writer::BlobWriter;
