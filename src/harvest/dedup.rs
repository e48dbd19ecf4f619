//! At-most-once admission per unique record fingerprint.

use std::collections::HashSet;

/// Tracks the set of body fingerprints seen this session.
///
/// The fingerprint is the trimmed raw body text. No normalization beyond
/// trimming: case and punctuation are preserved, because the duplication
/// mode that matters is the feed re-mounting byte-identical items as it
/// scrolls, not near-duplicates.
#[derive(Debug, Default)]
pub struct DedupStore {
    seen: HashSet<String>,
}

impl DedupStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record `body`'s fingerprint if unseen.
    ///
    /// Returns true when the caller should keep the record, false for a
    /// repeat. Blank bodies carry no identity and are always refused.
    pub fn admit(&mut self, body: &str) -> bool {
        let fingerprint = body.trim();
        if fingerprint.is_empty() {
            return false;
        }
        self.seen.insert(fingerprint.to_string())
    }

    pub fn len(&self) -> usize {
        self.seen.len()
    }

    pub fn is_empty(&self) -> bool {
        self.seen.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_admit_once() {
        let mut store = DedupStore::new();
        assert!(store.admit("hello world"));
        assert!(!store.admit("hello world"));
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_blank_bodies_refused() {
        let mut store = DedupStore::new();
        assert!(!store.admit(""));
        assert!(!store.admit("   \n\t "));
        assert!(store.is_empty());
    }

    #[test]
    fn test_trimming_equivalence() {
        let mut store = DedupStore::new();
        assert!(store.admit("  spaced out  "));
        assert!(!store.admit("spaced out"));
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_case_and_punctuation_preserved() {
        let mut store = DedupStore::new();
        assert!(store.admit("Hello"));
        assert!(store.admit("hello"));
        assert!(store.admit("hello!"));
        assert_eq!(store.len(), 3);
    }
}
