//! Content fingerprints for dependency manifests
//!
//! Same manifest bytes (and lockfile bytes) = same fingerprint = same cache
//! entry. Application source never feeds into the fingerprint.

use crate::manifest::Manifest;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;

/// Domain tag mixed into every digest so the format can change safely
const FINGERPRINT_DOMAIN: &[u8] = b"kiln-manifest-v1\0";

/// Length of the short form used in names and logs
const SHORT_LEN: usize = 12;

/// SHA-256 identity of a manifest's content (64 lowercase hex chars)
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Fingerprint(String);

impl Fingerprint {
    /// Fingerprint raw manifest and lockfile bytes
    pub fn from_contents(manifest: &[u8], lockfile: Option<&[u8]>) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(FINGERPRINT_DOMAIN);

        // Length prefixes keep (manifest, lockfile) boundaries unambiguous
        hasher.update((manifest.len() as u64).to_le_bytes());
        hasher.update(manifest);
        match lockfile {
            Some(lock) => {
                hasher.update([1u8]);
                hasher.update((lock.len() as u64).to_le_bytes());
                hasher.update(lock);
            }
            None => hasher.update([0u8]),
        }

        Self(hex::encode(hasher.finalize()))
    }

    /// Parse a full-length hex fingerprint (e.g. a cache directory name)
    pub fn parse(s: &str) -> Option<Self> {
        let valid =
            s.len() == 64 && s.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase());
        valid.then(|| Self(s.to_string()))
    }

    /// Full hex digest
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// First 12 hex characters
    pub fn short(&self) -> &str {
        &self.0[..SHORT_LEN]
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Fingerprint a loaded manifest
pub fn fingerprint(manifest: &Manifest) -> Fingerprint {
    Fingerprint::from_contents(manifest.contents(), manifest.lockfile())
}
