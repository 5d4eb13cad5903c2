use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::buckets;
use crate::error::{BlobError, BlobResult};

/// File name of the settings record at the database root.
pub const SETTINGS_FILE: &str = ".dbInfo";

const HEADER: &str = "# database settings - do not modify unless you know what you are doing\n";

/// Settings persisted once per database.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Settings {
    /// Modulus used at the root; later depths use the following primes.
    #[serde(rename = "startingPrime")]
    pub starting_prime: u32,
    /// New values are written compressed. Never reset once set.
    #[serde(default)]
    pub compressed: bool,
}

impl Settings {
    pub fn new(starting_prime: u32) -> Self {
        Self {
            starting_prime,
            compressed: false,
        }
    }

    /// Path of the settings file under `root`.
    pub fn path(root: &Path) -> PathBuf {
        root.join(SETTINGS_FILE)
    }

    /// Parse settings text and check its invariants.
    pub fn parse(text: &str) -> Result<Self, String> {
        let settings: Settings = toml::from_str(text).map_err(|e| e.to_string())?;
        if !buckets::contains(settings.starting_prime) {
            return Err(format!(
                "startingPrime {} is not in the bucket table",
                settings.starting_prime
            ));
        }
        Ok(settings)
    }

    /// Read the settings of the database at `root`, if it has any.
    pub fn load(root: &Path) -> BlobResult<Option<Self>> {
        let path = Self::path(root);
        let text = match fs::read_to_string(&path) {
            Ok(t) => t,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        Self::parse(&text)
            .map(Some)
            .map_err(|reason| BlobError::corrupt(path, reason))
    }

    /// Atomically replace the settings file under `root`.
    pub fn store(&self, root: &Path) -> BlobResult<()> {
        let body = toml::to_string(self).map_err(|e| BlobError::Serialization(e.to_string()))?;
        let mut tmp = tempfile::Builder::new()
            .prefix(".dbInfo.")
            .suffix(".tmp")
            .tempfile_in(root)?;
        tmp.write_all(HEADER.as_bytes())?;
        tmp.write_all(body.as_bytes())?;
        tmp.as_file().sync_all()?;
        tmp.persist(Self::path(root)).map_err(|e| e.error)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn store_and_load() {
        let dir = tempfile::tempdir().unwrap();
        assert!(Settings::load(dir.path()).unwrap().is_none());

        let mut settings = Settings::new(8009);
        settings.store(dir.path()).unwrap();
        assert_eq!(Settings::load(dir.path()).unwrap(), Some(settings.clone()));

        settings.compressed = true;
        settings.store(dir.path()).unwrap();
        assert!(Settings::load(dir.path()).unwrap().unwrap().compressed);
    }

    #[test]
    fn file_uses_camel_case_field() {
        let dir = tempfile::tempdir().unwrap();
        Settings::new(13).store(dir.path()).unwrap();
        let text = fs::read_to_string(Settings::path(dir.path())).unwrap();
        assert!(text.contains("startingPrime = 13"));
        assert!(text.starts_with('#'));
    }

    #[test]
    fn compressed_defaults_to_false() {
        let s = Settings::parse("startingPrime = 2\n").unwrap();
        assert_eq!(s, Settings::new(2));
    }

    #[test]
    fn rejects_non_prime() {
        assert!(Settings::parse("startingPrime = 8008\n").is_err());
    }

    #[test]
    fn unparsable_file_is_corruption() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(Settings::path(dir.path()), "startingPrime = \"lots\"").unwrap();
        let err = Settings::load(dir.path()).unwrap_err();
        assert!(matches!(err, BlobError::CorruptDatabase { .. }));
    }
}
