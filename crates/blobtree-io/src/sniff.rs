use std::fs::File;
use std::io::{self, Read};
use std::path::Path;

/// Stream format guessed from a leaf's leading bytes.
///
/// Detection only looks at magic numbers, so raw data that happens to start
/// with one is misreported.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Compression {
    Gzip,
    Zlib,
    /// Unix `compress` (`.Z`).
    Compress,
    Lzh,
    Zstd,
    Unknown,
}

const ZSTD_MAGIC: [u8; 4] = [0x28, 0xB5, 0x2F, 0xFD];

impl Compression {
    /// Classify a stream by its first bytes.
    pub fn from_magic(head: &[u8]) -> Self {
        if head.starts_with(&ZSTD_MAGIC) {
            return Self::Zstd;
        }
        match head {
            [0x1F, 0x8B, ..] => Self::Gzip,
            [0x1F, 0x9D, ..] => Self::Compress,
            [0x1F, 0xA0, ..] => Self::Lzh,
            [0x78, 0x01 | 0x9C | 0xDA, ..] => Self::Zlib,
            _ => Self::Unknown,
        }
    }

    /// Sniff the file at `path`.
    pub fn detect(path: &Path) -> io::Result<Self> {
        let mut head = [0u8; 4];
        let mut filled = 0;
        let mut file = File::open(path)?;
        while filled < head.len() {
            match file.read(&mut head[filled..]) {
                Ok(0) => break,
                Ok(n) => filled += n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
                Err(e) => return Err(e),
            }
        }
        Ok(Self::from_magic(&head[..filled]))
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Gzip => "gzip",
            Self::Zlib => "zlib",
            Self::Compress => "compress",
            Self::Lzh => "lzh",
            Self::Zstd => "zstd",
            Self::Unknown => "unknown",
        }
    }

    /// Returns `true` for formats this crate can decode.
    pub fn is_decodable(&self) -> bool {
        matches!(self, Self::Zstd)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recognizes_magic_numbers() {
        assert_eq!(Compression::from_magic(&[0x1F, 0x8B, 0x08]), Compression::Gzip);
        assert_eq!(Compression::from_magic(&[0x1F, 0x9D]), Compression::Compress);
        assert_eq!(Compression::from_magic(&[0x1F, 0xA0]), Compression::Lzh);
        assert_eq!(Compression::from_magic(&[0x78, 0x9C, 0x00]), Compression::Zlib);
        assert_eq!(Compression::from_magic(&[0x78, 0xDA]), Compression::Zlib);
        assert_eq!(Compression::from_magic(&ZSTD_MAGIC), Compression::Zstd);
    }

    #[test]
    fn short_or_plain_input_is_unknown() {
        assert_eq!(Compression::from_magic(&[]), Compression::Unknown);
        assert_eq!(Compression::from_magic(&[0x1F]), Compression::Unknown);
        assert_eq!(Compression::from_magic(&[0x28, 0xB5, 0x2F]), Compression::Unknown);
        assert_eq!(Compression::from_magic(b"hello"), Compression::Unknown);
        assert_eq!(Compression::from_magic(&[0x78, 0x02]), Compression::Unknown);
    }

    #[test]
    fn detect_reads_file_head() {
        let dir = tempfile::tempdir().unwrap();
        let plain = dir.path().join("plain");
        std::fs::write(&plain, b"just text").unwrap();
        assert_eq!(Compression::detect(&plain).unwrap(), Compression::Unknown);

        let packed = dir.path().join("packed");
        std::fs::write(&packed, zstd::encode_all(&b"just text"[..], 3).unwrap()).unwrap();
        let detected = Compression::detect(&packed).unwrap();
        assert_eq!(detected, Compression::Zstd);
        assert!(detected.is_decodable());
        assert_eq!(detected.name(), "zstd");

        let empty = dir.path().join("empty");
        std::fs::write(&empty, b"").unwrap();
        assert_eq!(Compression::detect(&empty).unwrap(), Compression::Unknown);
    }
}
