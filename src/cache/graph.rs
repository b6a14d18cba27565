//! Artifact records and the reverse dependency index.
//!
//! One [`ArtifactRecord`] per output that was successfully produced and has
//! not since been garbage-collected. A rebuild replaces the whole record; it
//! is never patched in place.
//!
//! The reverse indexes (`source → artifacts`, `artifact → dependents`) are
//! derived from the records. They are never serialized and never mutated on
//! their own: they are rebuilt on load and maintained on every record change.
//!
//! The graph also carries a small *pending* set: artifacts that were planned
//! for a rebuild but did not get one (render failure, timeout, cancellation).
//! Their previous record stays untouched and the next run retries them.

use super::{ArtifactId, SourceRef, dedup_ordered};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap, VecDeque};

/// Provenance of one produced output.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtifactRecord {
    /// Direct sources, ordered, without duplicates.
    pub sources: Vec<SourceRef>,
    /// Other artifacts this output was derived from.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub deps: Vec<ArtifactId>,
    /// When the output was last written successfully.
    pub built_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DependencyGraph {
    records: BTreeMap<ArtifactId, ArtifactRecord>,
    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    pending: BTreeSet<ArtifactId>,
    /// source → artifacts listing it directly. Never serialized.
    #[serde(skip)]
    source_index: HashMap<SourceRef, BTreeSet<ArtifactId>>,
    /// artifact → artifacts listing it in `deps`. Never serialized.
    #[serde(skip)]
    dependent_index: HashMap<ArtifactId, BTreeSet<ArtifactId>>,
}

impl PartialEq for DependencyGraph {
    fn eq(&self, other: &Self) -> bool {
        self.records == other.records && self.pending == other.pending
    }
}

impl Eq for DependencyGraph {}

impl DependencyGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuild the derived indexes from the records. Call after deserializing.
    pub fn reindex(&mut self) {
        self.source_index.clear();
        self.dependent_index.clear();
        let records = std::mem::take(&mut self.records);
        for (id, record) in &records {
            self.index(id, record);
        }
        self.records = records;
    }

    /// Record a successful build of `output`, replacing any previous record
    /// and clearing it from the pending set.
    pub fn record_artifact(
        &mut self,
        output: ArtifactId,
        sources: &[SourceRef],
        deps: &[ArtifactId],
        built_at: DateTime<Utc>,
    ) {
        if let Some(old) = self.records.remove(&output) {
            self.unindex(&output, &old);
        }
        let record = ArtifactRecord {
            sources: dedup_ordered(sources),
            deps: dedup_ordered(deps),
            built_at,
        };
        self.index(&output, &record);
        self.pending.remove(&output);
        self.records.insert(output, record);
    }

    /// Drop the record for `output`, if any.
    pub fn remove(&mut self, output: &ArtifactId) -> Option<ArtifactRecord> {
        self.pending.remove(output);
        let record = self.records.remove(output)?;
        self.unindex(output, &record);
        Some(record)
    }

    /// Remove records and pending entries for ids outside `declared`.
    /// Returns the ids whose records were removed.
    pub fn retain_declared(&mut self, declared: &BTreeSet<ArtifactId>) -> Vec<ArtifactId> {
        self.pending.retain(|id| declared.contains(id));
        let superseded: Vec<ArtifactId> = self
            .records
            .keys()
            .filter(|id| !declared.contains(*id))
            .cloned()
            .collect();
        for id in &superseded {
            self.remove(id);
        }
        superseded
    }

    pub fn get(&self, output: &ArtifactId) -> Option<&ArtifactRecord> {
        self.records.get(output)
    }

    pub fn contains(&self, output: &ArtifactId) -> bool {
        self.records.contains_key(output)
    }

    pub fn mark_pending(&mut self, output: ArtifactId) {
        self.pending.insert(output);
    }

    pub fn is_pending(&self, output: &ArtifactId) -> bool {
        self.pending.contains(output)
    }

    pub fn pending(&self) -> impl Iterator<Item = &ArtifactId> {
        self.pending.iter()
    }

    pub fn all_outputs(&self) -> BTreeSet<ArtifactId> {
        self.records.keys().cloned().collect()
    }

    pub fn records(&self) -> impl Iterator<Item = (&ArtifactId, &ArtifactRecord)> {
        self.records.iter()
    }

    /// Every source referenced by some record.
    pub fn referenced_sources(&self) -> BTreeSet<SourceRef> {
        self.records
            .values()
            .flat_map(|r| r.sources.iter().cloned())
            .collect()
    }

    /// Artifacts that depend on `source`, directly or through a chain of
    /// derived dependencies.
    pub fn dependents(&self, source: &SourceRef) -> BTreeSet<ArtifactId> {
        let direct = self.source_index.get(source).into_iter().flatten().cloned();
        self.close_over_dependents(direct.collect())
    }

    /// Artifacts derived, directly or transitively, from `output`.
    pub fn dependents_of_artifact(&self, output: &ArtifactId) -> BTreeSet<ArtifactId> {
        let direct = self
            .dependent_index
            .get(output)
            .into_iter()
            .flatten()
            .cloned();
        self.close_over_dependents(direct.collect())
    }

    fn close_over_dependents(&self, mut queue: VecDeque<ArtifactId>) -> BTreeSet<ArtifactId> {
        let mut found = BTreeSet::new();
        while let Some(id) = queue.pop_front() {
            if !found.insert(id.clone()) {
                continue;
            }
            if let Some(next) = self.dependent_index.get(&id) {
                queue.extend(next.iter().filter(|n| !found.contains(*n)).cloned());
            }
        }
        found
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    fn index(&mut self, id: &ArtifactId, record: &ArtifactRecord) {
        for source in &record.sources {
            self.source_index
                .entry(source.clone())
                .or_default()
                .insert(id.clone());
        }
        for dep in &record.deps {
            self.dependent_index
                .entry(dep.clone())
                .or_default()
                .insert(id.clone());
        }
    }

    fn unindex(&mut self, id: &ArtifactId, record: &ArtifactRecord) {
        for source in &record.sources {
            if let Some(set) = self.source_index.get_mut(source) {
                set.remove(id);
                if set.is_empty() {
                    self.source_index.remove(source);
                }
            }
        }
        for dep in &record.deps {
            if let Some(set) = self.dependent_index.get_mut(dep) {
                set.remove(id);
                if set.is_empty() {
                    self.dependent_index.remove(dep);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::snapshot;
    use tempfile::TempDir;

    fn ids(items: &[&str]) -> BTreeSet<ArtifactId> {
        items.iter().map(|s| ArtifactId::from(*s)).collect()
    }

    fn srcs(items: &[&str]) -> Vec<SourceRef> {
        items.iter().map(|s| SourceRef::from(*s)).collect()
    }

    fn arts(items: &[&str]) -> Vec<ArtifactId> {
        items.iter().map(|s| ArtifactId::from(*s)).collect()
    }

    /// lesson pages built from markdown + shared site file, sitemap derived
    /// from the pages.
    fn sample_graph() -> DependencyGraph {
        let mut g = DependencyGraph::new();
        let now = Utc::now();
        g.record_artifact("l1.html".into(), &srcs(&["l1.md", "site.yaml"]), &[], now);
        g.record_artifact("l2.html".into(), &srcs(&["l2.md", "site.yaml"]), &[], now);
        g.record_artifact(
            "sitemap.xml".into(),
            &srcs(&["site.yaml"]),
            &arts(&["l1.html", "l2.html"]),
            now,
        );
        g
    }

    // =========================================================================
    // Records
    // =========================================================================

    #[test]
    fn record_replaces_whole_record() {
        let mut g = DependencyGraph::new();
        let t0 = Utc::now();
        g.record_artifact("a.html".into(), &srcs(&["a.md", "b.md"]), &[], t0);
        g.record_artifact("a.html".into(), &srcs(&["c.md"]), &[], t0);

        let record = g.get(&"a.html".into()).unwrap();
        assert_eq!(record.sources, srcs(&["c.md"]));
        assert!(g.dependents(&"a.md".into()).is_empty());
        assert_eq!(g.dependents(&"c.md".into()), ids(&["a.html"]));
    }

    #[test]
    fn record_dedups_sources() {
        let mut g = DependencyGraph::new();
        g.record_artifact("a.html".into(), &srcs(&["x", "y", "x"]), &[], Utc::now());
        assert_eq!(g.get(&"a.html".into()).unwrap().sources, srcs(&["x", "y"]));
    }

    #[test]
    fn record_clears_pending() {
        let mut g = DependencyGraph::new();
        g.mark_pending("a.html".into());
        assert!(g.is_pending(&"a.html".into()));
        g.record_artifact("a.html".into(), &srcs(&["a.md"]), &[], Utc::now());
        assert!(!g.is_pending(&"a.html".into()));
    }

    #[test]
    fn remove_unindexes() {
        let mut g = sample_graph();
        assert!(g.remove(&"l1.html".into()).is_some());
        assert_eq!(g.dependents(&"l1.md".into()), BTreeSet::new());
        assert!(!g.all_outputs().contains(&ArtifactId::from("l1.html")));
    }

    #[test]
    fn retain_declared_drops_superseded_records() {
        let mut g = sample_graph();
        g.mark_pending("old.html".into());
        let removed = g.retain_declared(&ids(&["l1.html", "sitemap.xml"]));
        assert_eq!(removed, arts(&["l2.html"]));
        assert_eq!(g.all_outputs(), ids(&["l1.html", "sitemap.xml"]));
        assert!(!g.is_pending(&"old.html".into()));
    }

    // =========================================================================
    // Reverse lookups
    // =========================================================================

    #[test]
    fn dependents_direct() {
        let g = sample_graph();
        assert_eq!(g.dependents(&"l1.md".into()), ids(&["l1.html", "sitemap.xml"]));
    }

    #[test]
    fn dependents_shared_source_reaches_everything() {
        let g = sample_graph();
        assert_eq!(
            g.dependents(&"site.yaml".into()),
            ids(&["l1.html", "l2.html", "sitemap.xml"])
        );
    }

    #[test]
    fn dependents_unknown_source_is_empty() {
        assert!(sample_graph().dependents(&"nope.md".into()).is_empty());
    }

    #[test]
    fn dependents_of_artifact_transitive() {
        let mut g = sample_graph();
        g.record_artifact(
            "feed.xml".into(),
            &[],
            &arts(&["sitemap.xml"]),
            Utc::now(),
        );
        assert_eq!(
            g.dependents_of_artifact(&"l2.html".into()),
            ids(&["feed.xml", "sitemap.xml"])
        );
    }

    #[test]
    fn dependents_terminate_on_cycles() {
        let mut g = DependencyGraph::new();
        let now = Utc::now();
        g.record_artifact("a".into(), &srcs(&["s"]), &arts(&["b"]), now);
        g.record_artifact("b".into(), &[], &arts(&["a"]), now);
        assert_eq!(g.dependents(&"s".into()), ids(&["a", "b"]));
    }

    /// `A ∈ dependents(S)` iff S is a direct source of A or of something A
    /// derives from.
    #[test]
    fn index_matches_records() {
        let g = sample_graph();
        for source in g.referenced_sources() {
            let expected: BTreeSet<ArtifactId> = g
                .records()
                .filter(|(_, r)| r.sources.contains(&source))
                .map(|(id, _)| id.clone())
                .collect();
            let found = g.dependents(&source);
            assert!(expected.is_subset(&found));
            for id in found.difference(&expected) {
                let record = g.get(id).unwrap();
                assert!(
                    record.deps.iter().any(|d| found.contains(d)),
                    "{id} reached without a dependency chain"
                );
            }
        }
    }

    // =========================================================================
    // Persistence
    // =========================================================================

    #[test]
    fn snapshot_roundtrip_rebuilds_indexes() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("graph.json");
        let mut g = sample_graph();
        g.mark_pending("broken.html".into());

        snapshot::save(&path, &g).unwrap();
        let mut loaded: DependencyGraph = snapshot::load(&path).unwrap().unwrap();
        assert!(loaded.dependents(&"l1.md".into()).is_empty());
        loaded.reindex();

        assert_eq!(loaded, g);
        assert_eq!(loaded.dependents(&"l1.md".into()), ids(&["l1.html", "sitemap.xml"]));
        assert!(loaded.is_pending(&"broken.html".into()));
    }
}
