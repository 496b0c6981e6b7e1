//! Core deterministic primitives.
//!
//! Seeded randomness for the launch shuffle and hashing for snapshot
//! verification.

pub mod rng;
pub mod hash;

// Re-export core types
pub use rng::{DeterministicRng, derive_match_seed};
pub use hash::{StateHash, StateHasher};
