//! Fingerprint (C3, spec §4.3).
//!
//! A collision-resistant digest over the resolved source's canonical path
//! and the normalized encoding of its transform params. Two requests with
//! the same resolved source and equal `TransformParams` always produce the
//! same fingerprint, which is exactly the cache key.

use sha2::{Digest, Sha256};
use std::path::Path;

use crate::params::TransformParams;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Fingerprint(String);

impl Fingerprint {
    pub fn compute(canonical_path: &Path, params: &TransformParams) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(canonical_path.to_string_lossy().as_bytes());
        hasher.update([0x00]);
        hasher.update(params.normalized_encoding().as_bytes());
        Fingerprint(hex::encode(hasher.finalize()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// `<shard1>/<shard2>/<rest>` --- the two-level hex-prefix layout that
    /// bounds per-directory entry counts (spec §4.3/§6).
    pub fn shard_components(&self) -> (&str, &str, &str) {
        let hex = &self.0;
        (&hex[0..2], &hex[2..4], &hex[4..])
    }
}

impl std::fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}
