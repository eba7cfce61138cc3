//! Deterministic request fingerprint used for duplicate detection.

use sha2::{Digest, Sha256};

use super::JobSpec;

/// SHA-256 (lowercase hex) over the canonical request parameters.
///
/// File order and duplicates do not matter; a missing revision is the same as
/// naming the default one.
pub fn fingerprint(spec: &JobSpec) -> String {
    let mut files: Vec<&str> = spec.files.iter().map(|f| f.trim()).collect();
    files.sort_unstable();
    files.dedup();

    let destination = spec.destination.to_string_lossy();
    let mut hasher = Sha256::new();
    for (key, value) in [
        ("repo", spec.repository_id.trim()),
        ("kind", spec.repository_kind.as_str()),
        ("rev", spec.effective_revision()),
        ("mode", spec.selection.as_str()),
        ("dest", destination.as_ref()),
    ] {
        hasher.update(key.as_bytes());
        hasher.update([b'=']);
        hasher.update(value.as_bytes());
        hasher.update([0u8]);
    }
    for f in files {
        hasher.update(b"file=");
        hasher.update(f.as_bytes());
        hasher.update([0u8]);
    }
    hex::encode(hasher.finalize())
}
