//! The bucket-size table: primes used as the modulus at each tree depth.
//!
//! Depth `d` below the root uses `primes()[start + d]`, where `start` is the
//! index of the database's starting prime. Every prime below 2^16 is in the
//! table, which bounds how deep a tree can grow.

use std::sync::OnceLock;

/// Upper bound (exclusive) of the primes in the table.
pub const TABLE_LIMIT: u32 = 1 << 16;

/// Starting prime used for new databases when none is configured.
pub const DEFAULT_STARTING_PRIME: u32 = 8009;

static PRIMES: OnceLock<Vec<u32>> = OnceLock::new();

/// All primes below [`TABLE_LIMIT`], ascending.
pub fn primes() -> &'static [u32] {
    PRIMES.get_or_init(|| sieve(TABLE_LIMIT))
}

/// Returns `true` if `value` is one of the table's primes.
pub fn contains(value: u32) -> bool {
    index_of(value).is_some()
}

/// Table index of `value`, if it is in the table.
pub fn index_of(value: u32) -> Option<usize> {
    primes().binary_search(&value).ok()
}

/// Prime used at table index `index`, if the table is that long.
pub fn prime_at(index: usize) -> Option<u32> {
    primes().get(index).copied()
}

fn sieve(limit: u32) -> Vec<u32> {
    let limit = limit as usize;
    let mut composite = vec![false; limit];
    let mut out = Vec::new();
    for n in 2..limit {
        if composite[n] {
            continue;
        }
        out.push(n as u32);
        let mut multiple = n * n;
        while multiple < limit {
            composite[multiple] = true;
            multiple += n;
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn table_starts_with_small_primes() {
        assert_eq!(&primes()[..6], &[2, 3, 5, 7, 11, 13]);
    }

    #[test]
    fn table_size() {
        // pi(65536) = 6542
        assert_eq!(primes().len(), 6542);
        assert_eq!(*primes().last().unwrap(), 65521);
    }

    #[test]
    fn membership_and_index() {
        assert!(contains(2));
        assert!(contains(DEFAULT_STARTING_PRIME));
        assert!(!contains(1));
        assert!(!contains(8008));
        assert_eq!(index_of(2), Some(0));
        assert_eq!(index_of(11), Some(4));
        assert_eq!(index_of(9), None);
        assert_eq!(prime_at(index_of(8009).unwrap() + 1), Some(8011));
    }

    #[test]
    fn prime_at_past_end() {
        assert_eq!(prime_at(primes().len()), None);
    }
}
