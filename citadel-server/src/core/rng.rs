//! Deterministic Random Number Generator
//!
//! Xorshift128+ seeded through SplitMix64. The only randomness in a match
//! is the side assignment at launch, and it all flows through this type so a
//! launch can be replayed from its seed.

use serde::{Serialize, Deserialize};
use sha2::{Sha256, Digest};

/// Deterministic PRNG using the Xorshift128+ algorithm.
///
/// # Example
///
/// ```
/// use citadel::core::rng::DeterministicRng;
///
/// let mut a = DeterministicRng::new(12345);
/// let mut b = DeterministicRng::new(12345);
/// assert_eq!(a.next_u64(), b.next_u64());
/// ```
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DeterministicRng {
    state: [u64; 2],
}

impl Default for DeterministicRng {
    fn default() -> Self {
        Self::new(0)
    }
}

impl DeterministicRng {
    /// Create a new RNG from a 64-bit seed.
    pub fn new(seed: u64) -> Self {
        let mut s = seed;
        let state0 = splitmix64(&mut s);
        let state1 = splitmix64(&mut s);

        // Xorshift never leaves the all-zero state
        let state = if state0 == 0 && state1 == 0 {
            [1, 1]
        } else {
            [state0, state1]
        };

        Self { state }
    }

    /// Generate the next 64-bit random value.
    #[inline]
    pub fn next_u64(&mut self) -> u64 {
        let s0 = self.state[0];
        let mut s1 = self.state[1];
        let result = s0.wrapping_add(s1);

        s1 ^= s0;
        self.state[0] = s0.rotate_left(24) ^ s1 ^ (s1 << 16);
        self.state[1] = s1.rotate_left(37);

        result
    }

    /// Generate a random integer in range [0, max).
    #[inline]
    pub fn next_int(&mut self, max: u32) -> u32 {
        if max == 0 {
            return 0;
        }
        (self.next_u64() % max as u64) as u32
    }

    /// Shuffle a slice in place (Fisher-Yates).
    ///
    /// For a two-element slice this is a fair coin flip deciding whether
    /// the elements swap.
    pub fn shuffle<T>(&mut self, slice: &mut [T]) {
        let len = slice.len();
        for i in (1..len).rev() {
            let j = self.next_int((i + 1) as u32) as usize;
            slice.swap(i, j);
        }
    }
}

/// SplitMix64 step used for seed initialization.
#[inline]
fn splitmix64(state: &mut u64) -> u64 {
    *state = state.wrapping_add(0x9E3779B97F4A7C15);
    let mut z = *state;
    z = (z ^ (z >> 30)).wrapping_mul(0xBF58476D1CE4E5B9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94D049BB133111EB);
    z ^ (z >> 31)
}

/// Derive the launch seed for a session.
///
/// - `entropy`: fresh random bytes drawn by the authority
/// - `session_id`: unique session identifier
/// - `connection_ids`: the paired connections, sorted by the caller
pub fn derive_match_seed(
    entropy: &[u8; 32],
    session_id: &[u8; 16],
    connection_ids: &[u64],
) -> u64 {
    let mut hasher = Sha256::new();

    hasher.update(b"CITADEL_SEED_V1");
    hasher.update(entropy);
    hasher.update(session_id);
    for id in connection_ids {
        hasher.update(id.to_le_bytes());
    }

    let hash = hasher.finalize();
    let mut seed = [0u8; 8];
    seed.copy_from_slice(&hash[0..8]);
    u64::from_le_bytes(seed)
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rng_determinism() {
        let mut rng1 = DeterministicRng::new(12345);
        let mut rng2 = DeterministicRng::new(12345);

        for _ in 0..1000 {
            assert_eq!(rng1.next_u64(), rng2.next_u64());
        }
    }

    #[test]
    fn test_rng_different_seeds() {
        let mut rng1 = DeterministicRng::new(12345);
        let mut rng2 = DeterministicRng::new(54321);

        assert_ne!(rng1.next_u64(), rng2.next_u64());
    }

    #[test]
    fn test_next_int_bounds() {
        let mut rng = DeterministicRng::new(1234);

        for _ in 0..1000 {
            assert!(rng.next_int(2) < 2);
        }

        assert_eq!(rng.next_int(0), 0);
        assert_eq!(rng.next_int(1), 0);
    }

    #[test]
    fn test_two_element_shuffle_hits_both_orders() {
        let mut rng = DeterministicRng::new(2024);
        let mut kept = 0;
        let mut swapped = 0;

        for _ in 0..1000 {
            let mut pair = [0, 1];
            rng.shuffle(&mut pair);
            if pair == [0, 1] {
                kept += 1;
            } else {
                assert_eq!(pair, [1, 0]);
                swapped += 1;
            }
        }

        // Roughly a fair coin
        assert!(kept > 400 && swapped > 400, "kept={} swapped={}", kept, swapped);
    }

    #[test]
    fn test_shuffle_is_permutation() {
        let mut rng = DeterministicRng::new(1111);
        let mut arr = [5, 3, 9, 1];
        rng.shuffle(&mut arr);
        let mut sorted = arr;
        sorted.sort();
        assert_eq!(sorted, [1, 3, 5, 9]);
    }

    #[test]
    fn test_derive_match_seed() {
        let entropy = [0u8; 32];
        let session = [1u8; 16];
        let connections = [2u64, 3u64];

        let seed1 = derive_match_seed(&entropy, &session, &connections);
        let seed2 = derive_match_seed(&entropy, &session, &connections);
        assert_eq!(seed1, seed2);

        let seed3 = derive_match_seed(&entropy, &[99u8; 16], &connections);
        assert_ne!(seed1, seed3);
    }
}
