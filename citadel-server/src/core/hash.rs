//! State Hashing
//!
//! SHA-256 digest over the replicated part of a match. The authority and
//! every mirror hash the same fields in the same order, so equal hashes mean
//! an observer holds the same snapshot as the authority.

use sha2::{Sha256, Digest};

/// Hash output type (256 bits / 32 bytes)
pub type StateHash = [u8; 32];

/// Deterministic hasher for replicated state.
///
/// Order of updates is significant.
pub struct StateHasher {
    hasher: Sha256,
}

impl StateHasher {
    /// Create a new hasher with domain separator.
    pub fn new(domain: &[u8]) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(domain);
        Self { hasher }
    }

    /// Create hasher for a replicated match snapshot.
    pub fn for_snapshot() -> Self {
        Self::new(b"CITADEL_SNAPSHOT_V1")
    }

    /// Update with a u8 value.
    #[inline]
    pub fn update_u8(&mut self, value: u8) {
        self.hasher.update([value]);
    }

    /// Update with a u32 value (little-endian).
    #[inline]
    pub fn update_u32(&mut self, value: u32) {
        self.hasher.update(value.to_le_bytes());
    }

    /// Update with an i32 value (little-endian).
    #[inline]
    pub fn update_i32(&mut self, value: i32) {
        self.hasher.update(value.to_le_bytes());
    }

    /// Update with a boolean.
    #[inline]
    pub fn update_bool(&mut self, value: bool) {
        self.update_u8(value as u8);
    }

    /// Update with an optional id; `None` hashes differently from every id.
    #[inline]
    pub fn update_opt_u32(&mut self, value: Option<u32>) {
        match value {
            Some(v) => {
                self.update_u8(1);
                self.update_u32(v);
            }
            None => self.update_u8(0),
        }
    }

    /// Finalize and return the hash.
    pub fn finalize(self) -> StateHash {
        self.hasher.finalize().into()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hasher_determinism() {
        let mut h1 = StateHasher::for_snapshot();
        h1.update_u32(42);
        h1.update_bool(true);

        let mut h2 = StateHasher::for_snapshot();
        h2.update_u32(42);
        h2.update_bool(true);

        assert_eq!(h1.finalize(), h2.finalize());
    }

    #[test]
    fn test_hasher_order_matters() {
        let mut h1 = StateHasher::for_snapshot();
        h1.update_u32(1);
        h1.update_u32(2);

        let mut h2 = StateHasher::for_snapshot();
        h2.update_u32(2);
        h2.update_u32(1);

        assert_ne!(h1.finalize(), h2.finalize());
    }

    #[test]
    fn test_optional_none_differs_from_zero() {
        let mut h1 = StateHasher::for_snapshot();
        h1.update_opt_u32(None);

        let mut h2 = StateHasher::for_snapshot();
        h2.update_opt_u32(Some(0));

        assert_ne!(h1.finalize(), h2.finalize());
    }
}
