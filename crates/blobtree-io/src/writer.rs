use std::fmt;
use std::fs::File;
use std::io::{self, BufWriter, Write};

use blobtree_core::{BlobError, BlobTree, Leaf};
use tracing::debug;

use crate::error::{StreamError, StreamResult};

/// zstd level used for new values.
pub const COMPRESSION_LEVEL: i32 = 3;

enum Sink {
    Plain(BufWriter<File>),
    Zstd(zstd::Encoder<'static, BufWriter<File>>),
}

/// Buffered writer over the leaf of one key.
///
/// Values are zstd-compressed when the database has compression enabled.
/// Call [`BlobWriter::finish`] when done: dropping the writer flushes plain
/// output but leaves a compressed frame unterminated.
pub struct BlobWriter {
    leaf: Leaf,
    sink: Sink,
    written: u64,
}

impl BlobWriter {
    /// Open a writer for `key`, creating the leaf or truncating the
    /// existing one.
    pub fn create(tree: &BlobTree, key: impl fmt::Display) -> StreamResult<Self> {
        let key = key.to_string();
        let leaf = match tree.create(&key) {
            Ok(leaf) => leaf,
            Err(BlobError::DuplicateKey(_)) => tree
                .get(&key)?
                .ok_or_else(|| BlobError::KeyNotFound(key.clone()))?,
            Err(e) => return Err(e.into()),
        };
        let file = BufWriter::new(leaf.open_write()?);
        let sink = if tree.is_compression_enabled() {
            let encoder = zstd::Encoder::new(file, COMPRESSION_LEVEL)
                .map_err(|e| StreamError::CompressionFailed(e.to_string()))?;
            Sink::Zstd(encoder)
        } else {
            Sink::Plain(file)
        };
        Ok(Self {
            leaf,
            sink,
            written: 0,
        })
    }

    pub fn leaf(&self) -> &Leaf {
        &self.leaf
    }

    /// Returns `true` if output is being compressed.
    pub fn is_compressed(&self) -> bool {
        matches!(self.sink, Sink::Zstd(_))
    }

    /// Uncompressed bytes accepted so far.
    pub fn bytes_written(&self) -> u64 {
        self.written
    }

    /// Terminate the stream, flush it and sync the leaf to disk.
    pub fn finish(self) -> StreamResult<Leaf> {
        let buffered = match self.sink {
            Sink::Plain(w) => w,
            Sink::Zstd(encoder) => encoder
                .finish()
                .map_err(|e| StreamError::CompressionFailed(e.to_string()))?,
        };
        let file = buffered.into_inner().map_err(|e| e.into_error())?;
        file.sync_all()?;
        debug!(
            key = %self.leaf.key(),
            bytes = self.written,
            "blob written"
        );
        Ok(self.leaf)
    }
}

impl Write for BlobWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let n = match &mut self.sink {
            Sink::Plain(w) => w.write(buf)?,
            Sink::Zstd(w) => w.write(buf)?,
        };
        self.written += n as u64;
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        match &mut self.sink {
            Sink::Plain(w) => w.flush(),
            Sink::Zstd(w) => w.flush(),
        }
    }
}

impl fmt::Debug for BlobWriter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BlobWriter")
            .field("leaf", &self.leaf)
            .field("compressed", &self.is_compressed())
            .field("written", &self.written)
            .finish()
    }
}
