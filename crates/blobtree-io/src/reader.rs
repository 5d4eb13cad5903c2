use std::fmt;
use std::fs::File;
use std::io::{self, BufReader, Read};

use blobtree_core::{BlobError, BlobTree, Leaf};
use tracing::warn;

use crate::error::{StreamError, StreamResult};
use crate::sniff::Compression;

enum Source {
    Plain(BufReader<File>),
    Zstd(zstd::Decoder<'static, BufReader<File>>),
}

/// Buffered reader over the leaf of one key.
///
/// The leaf is sniffed on open; zstd content is decompressed whatever the
/// database's current compression flag says, so values written before and
/// after enabling compression read alike.
pub struct BlobReader {
    leaf: Leaf,
    compression: Compression,
    source: Source,
}

impl BlobReader {
    /// Open the value stored under `key`.
    ///
    /// A missing key is [`BlobError::KeyNotFound`].
    pub fn open(tree: &BlobTree, key: impl fmt::Display) -> StreamResult<Self> {
        let key = key.to_string();
        let leaf = tree
            .get(&key)?
            .ok_or_else(|| StreamError::from(BlobError::KeyNotFound(key)))?;
        Self::from_leaf(leaf)
    }

    /// Open an already resolved leaf.
    pub fn from_leaf(leaf: Leaf) -> StreamResult<Self> {
        let compression = Compression::detect(leaf.path())?;
        let file = leaf.open_read()?;
        let source = match compression {
            Compression::Zstd => Source::Zstd(
                zstd::Decoder::new(file)
                    .map_err(|e| StreamError::DecompressionFailed(e.to_string()))?,
            ),
            Compression::Unknown => Source::Plain(BufReader::new(file)),
            other => {
                warn!(
                    key = %leaf.key(),
                    format = other.name(),
                    "no decoder for stored format; reading raw bytes"
                );
                Source::Plain(BufReader::new(file))
            }
        };
        Ok(Self {
            leaf,
            compression,
            source,
        })
    }

    pub fn leaf(&self) -> &Leaf {
        &self.leaf
    }

    /// Format detected when the reader was opened.
    pub fn compression(&self) -> Compression {
        self.compression
    }

    /// Read the whole value.
    pub fn read_all(mut self) -> StreamResult<Vec<u8>> {
        let mut buf = Vec::new();
        self.read_to_end(&mut buf)?;
        Ok(buf)
    }
}

impl Read for BlobReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match &mut self.source {
            Source::Plain(r) => r.read(buf),
            Source::Zstd(r) => r.read(buf),
        }
    }
}

impl fmt::Debug for BlobReader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BlobReader")
            .field("leaf", &self.leaf)
            .field("compression", &self.compression)
            .finish()
    }
}
