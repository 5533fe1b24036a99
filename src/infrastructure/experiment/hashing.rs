//! Deterministic hashing for hash-based variant assignment
//!
//! The same request context always maps to the same point in `[0, 1)`, so it
//! always lands on the same variant for a given set of weights.

use std::fmt::Debug;

use sha2::{Digest, Sha256};

use crate::domain::AssignmentContext;

/// Maps a canonical key to a 64-bit hash
pub trait AssignmentHasher: Send + Sync + Debug {
    fn hash(&self, key: &str) -> u64;
}

/// SHA-256 based hasher taking the first 8 digest bytes big-endian
#[derive(Debug, Clone, Copy, Default)]
pub struct Sha256AssignmentHasher;

impl AssignmentHasher for Sha256AssignmentHasher {
    fn hash(&self, key: &str) -> u64 {
        let digest = Sha256::digest(key.as_bytes());
        let mut bytes = [0u8; 8];
        bytes.copy_from_slice(&digest[..8]);
        u64::from_be_bytes(bytes)
    }
}

/// Canonical `k1=v1&k2=v2&` form of a context with keys in sorted order
pub fn canonical_context(context: &AssignmentContext) -> String {
    context
        .iter()
        .map(|(key, value)| format!("{}={}&", key, value))
        .collect()
}

/// Normalize the top 32 bits of a hash into `[0, 1)`
pub fn unit_interval(hash: u64) -> f64 {
    (hash >> 32) as f64 / 4_294_967_296.0
}

/// Hash a context straight to a point in `[0, 1)`
pub fn context_point(hasher: &dyn AssignmentHasher, context: &AssignmentContext) -> f64 {
    unit_interval(hasher.hash(&canonical_context(context)))
}
