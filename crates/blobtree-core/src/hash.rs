use std::fmt;

/// Fixed-width digest of a key's textual form.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct KeyDigest([u8; 32]);

impl KeyDigest {
    /// The raw 32-byte hash.
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Hex-encoded string representation.
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// The digest read as a big-endian unsigned integer, reduced modulo `prime`.
    ///
    /// Reduction is done byte by byte so no wide integer type is needed.
    pub fn bucket(&self, prime: u32) -> u32 {
        debug_assert!(prime > 0);
        let modulus = u64::from(prime);
        let rem = self
            .0
            .iter()
            .fold(0u64, |acc, &b| ((acc << 8) | u64::from(b)) % modulus);
        rem as u32
    }
}

impl fmt::Debug for KeyDigest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "KeyDigest({})", hex::encode(&self.0[..4]))
    }
}

impl fmt::Display for KeyDigest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

/// Domain-separated BLAKE3 hasher for keys.
///
/// The domain tag is part of the on-disk layout: changing it moves every key
/// to a different bucket.
pub struct KeyHasher {
    domain: &'static str,
}

impl KeyHasher {
    /// Hasher used for tree placement.
    pub const PLACEMENT: Self = Self {
        domain: "blobtree-key-v1",
    };

    /// Create a hasher with a custom domain tag.
    pub const fn new(domain: &'static str) -> Self {
        Self { domain }
    }

    /// Hash a key's textual representation.
    pub fn hash(&self, key: &str) -> KeyDigest {
        let mut hasher = blake3::Hasher::new();
        hasher.update(self.domain.as_bytes());
        hasher.update(b":");
        hasher.update(key.as_bytes());
        KeyDigest(*hasher.finalize().as_bytes())
    }

    /// The domain tag used by this hasher.
    pub fn domain(&self) -> &str {
        self.domain
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn hash_is_deterministic() {
        let a = KeyHasher::PLACEMENT.hash("user:42");
        let b = KeyHasher::PLACEMENT.hash("user:42");
        assert_eq!(a, b);
        assert_ne!(a, KeyHasher::PLACEMENT.hash("user:43"));
    }

    #[test]
    fn domains_separate() {
        let custom = KeyHasher::new("other-v1");
        assert_ne!(custom.hash("k"), KeyHasher::PLACEMENT.hash("k"));
        assert_eq!(custom.domain(), "other-v1");
    }

    #[test]
    fn bucket_matches_small_integer() {
        // A digest whose value is exactly 1000 (big-endian).
        let mut raw = [0u8; 32];
        raw[30] = 0x03;
        raw[31] = 0xE8;
        let digest = KeyDigest(raw);
        assert_eq!(digest.bucket(7), 1000 % 7);
        assert_eq!(digest.bucket(2), 0);
        assert_eq!(digest.bucket(1009), 1000);
    }

    #[test]
    fn hex_is_64_chars() {
        let digest = KeyHasher::PLACEMENT.hash("x");
        assert_eq!(digest.to_hex().len(), 64);
        assert_eq!(digest.to_string(), digest.to_hex());
    }

    proptest! {
        #[test]
        fn bucket_is_below_prime(key in ".*", prime in prop::sample::select(vec![2u32, 3, 5, 7919, 8009, 65521])) {
            let digest = KeyHasher::PLACEMENT.hash(&key);
            prop_assert!(digest.bucket(prime) < prime);
        }
    }
}
