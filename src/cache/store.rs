//! Last-seen fingerprint per source.
//!
//! Loaded once at session start and saved once at session end; between the
//! two it is plain in-memory state. Nothing is written mid-session, so a crash
//! leaves the previous snapshot in place and the next run compares against
//! older fingerprints, which can only cause extra rebuilds.

use super::{Fingerprint, SourceRef};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FingerprintStore {
    entries: BTreeMap<SourceRef, Fingerprint>,
}

impl FingerprintStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, source: &SourceRef) -> Option<&Fingerprint> {
        self.entries.get(source)
    }

    pub fn set(&mut self, source: SourceRef, fingerprint: Fingerprint) {
        self.entries.insert(source, fingerprint);
    }

    /// Drop entries for sources outside `live`. Returns how many were dropped.
    pub fn retain_sources(&mut self, live: &BTreeSet<SourceRef>) -> usize {
        let before = self.entries.len();
        self.entries.retain(|source, _| live.contains(source));
        before - self.entries.len()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&SourceRef, &Fingerprint)> {
        self.entries.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::snapshot;
    use tempfile::TempDir;

    #[test]
    fn get_unknown_source_is_none() {
        let store = FingerprintStore::new();
        assert!(store.get(&"lesson1.src".into()).is_none());
    }

    #[test]
    fn set_overwrites() {
        let mut store = FingerprintStore::new();
        store.set("a.md".into(), Fingerprint::of_bytes(b"1"));
        store.set("a.md".into(), Fingerprint::of_bytes(b"2"));
        assert_eq!(store.len(), 1);
        assert_eq!(store.get(&"a.md".into()), Some(&Fingerprint::of_bytes(b"2")));
    }

    #[test]
    fn retain_drops_unreferenced_sources() {
        let mut store = FingerprintStore::new();
        store.set("keep.md".into(), Fingerprint::of_bytes(b"k"));
        store.set("gone.md".into(), Fingerprint::of_bytes(b"g"));
        let live: BTreeSet<SourceRef> = [SourceRef::from("keep.md")].into();
        assert_eq!(store.retain_sources(&live), 1);
        assert!(store.get(&"gone.md".into()).is_none());
        assert!(store.get(&"keep.md".into()).is_some());
    }

    #[test]
    fn snapshot_roundtrip_is_exact() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("fingerprints.json");
        let mut store = FingerprintStore::new();
        store.set("a.md".into(), Fingerprint::of_bytes(b"a"));
        store.set("img/b.png".into(), Fingerprint::absent());

        snapshot::save(&path, &store).unwrap();
        let loaded: FingerprintStore = snapshot::load(&path).unwrap().unwrap();
        assert_eq!(loaded, store);
    }
}
