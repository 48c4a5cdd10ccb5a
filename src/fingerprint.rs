//! Content-address fingerprinting.
//!
//! Two units with identical `(title, content)` collapse to the same
//! fingerprint and therefore the same store row. We use SHA-256 rather
//! than the upstream system's MD5 — same deterministic-hash contract,
//! stronger collision resistance, and it reuses a dependency already in
//! the tree instead of adding one solely for this.

use sha2::{Digest, Sha256};

/// Deterministic hash of normalized `(title, content)`. Normalization is
/// lowercasing only (titles/content are mixed-case from the source and
/// case shouldn't affect identity); stable across runs and process
/// restarts (the only contract `spec.md` requires).
pub fn fingerprint(title: &str, content: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(title.to_lowercase().as_bytes());
    hasher.update(content.to_lowercase().as_bytes());
    hex::encode(hasher.finalize())
}

/// `iu_` plus the first 16 hex chars of the fingerprint — the opaque
/// stable handle assigned to every unit.
pub fn unit_id(fingerprint: &str) -> String {
    format!("iu_{}", &fingerprint[..16.min(fingerprint.len())])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fingerprint_deterministic() {
        let a = fingerprint("title", "content");
        let b = fingerprint("title", "content");
        assert_eq!(a, b);
    }

    #[test]
    fn test_fingerprint_case_insensitive() {
        let a = fingerprint("Title", "Content");
        let b = fingerprint("title", "content");
        assert_eq!(a, b);
    }

    #[test]
    fn test_fingerprint_sensitive_to_content() {
        let a = fingerprint("title", "content one");
        let b = fingerprint("title", "content two");
        assert_ne!(a, b);
    }

    #[test]
    fn test_unit_id_prefix_and_length() {
        let fp = fingerprint("a", "b");
        let id = unit_id(&fp);
        assert!(id.starts_with("iu_"));
        assert_eq!(id.len(), 3 + 16);
    }
}
