//! Content-addressed incremental build cache.
//!
//! The cache decides, for every output artifact, whether it must be
//! regenerated given changes to the files it was built from. It knows nothing
//! about HTML, markdown or YAML: callers hand it [`Declaration`]s (what output
//! is built from which sources) and it hands back a rebuild decision plus a
//! place to record provenance.
//!
//! # Components
//!
//! | Module | Role |
//! |--------|------|
//! | [`hasher`] | SHA-256 fingerprints of source bytes, memoized per run |
//! | [`store`] | Last-seen fingerprint per source, persisted across runs |
//! | [`graph`] | Per-artifact records and the reverse "who depends on this" index |
//! | [`planner`] | Staleness verdicts with a reason for each artifact |
//! | [`session`] | Loads the snapshots at start, saves them once at the end |
//! | [`gc`] | Deletes outputs no longer declared by the build |
//! | [`snapshot`] | Versioned JSON envelope and atomic writes shared by the above |
//!
//! # Keys
//!
//! Sources and outputs live in different trees, so they get different key
//! types. A [`SourceRef`] is a `/`-separated path relative to the content
//! root; an [`ArtifactId`] is a `/`-separated path relative to the output
//! directory. An artifact that is built from another artifact's output lists
//! it in [`Declaration::deps`] rather than in its sources.

pub mod gc;
pub mod graph;
pub mod hasher;
pub mod planner;
pub mod session;
pub mod snapshot;
pub mod store;

use serde::{Deserialize, Serialize};
use std::fmt;

pub use graph::{ArtifactRecord, DependencyGraph};
pub use hasher::{ContentSource, DirSource, Fingerprint, Hasher};
pub use planner::{Plan, PlanEntry, Planner, Reason};
pub use session::{BuildMode, BuildSession};
pub use snapshot::SnapshotError;
pub use store::FingerprintStore;

/// Identity of a content source, relative to the content root.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SourceRef(String);

impl SourceRef {
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SourceRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for SourceRef {
    fn from(key: &str) -> Self {
        Self(key.to_string())
    }
}

impl From<String> for SourceRef {
    fn from(key: String) -> Self {
        Self(key)
    }
}

/// Identity of an output artifact, relative to the output directory.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ArtifactId(String);

impl ArtifactId {
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// True when the id is a plain relative path that cannot escape the
    /// output directory.
    pub fn is_contained(&self) -> bool {
        !self.0.is_empty()
            && !self.0.starts_with('/')
            && !self.0.contains('\\')
            && self
                .0
                .split('/')
                .all(|part| !part.is_empty() && part != "." && part != "..")
    }
}

impl fmt::Display for ArtifactId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ArtifactId {
    fn from(key: &str) -> Self {
        Self(key.to_string())
    }
}

impl From<String> for ArtifactId {
    fn from(key: String) -> Self {
        Self(key)
    }
}

/// What one output artifact is built from. Pure data: the renderer that
/// produces the bytes lives with the orchestrator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Declaration {
    pub output: ArtifactId,
    /// Direct content sources, in the order the renderer consumes them.
    pub sources: Vec<SourceRef>,
    /// Other artifacts whose output this one is derived from.
    pub deps: Vec<ArtifactId>,
}

impl Declaration {
    pub fn new(output: impl Into<ArtifactId>) -> Self {
        Self {
            output: output.into(),
            sources: Vec::new(),
            deps: Vec::new(),
        }
    }

    pub fn with_sources<I, S>(mut self, sources: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<SourceRef>,
    {
        for source in sources {
            push_unique(&mut self.sources, source.into());
        }
        self
    }

    pub fn with_deps<I, D>(mut self, deps: I) -> Self
    where
        I: IntoIterator<Item = D>,
        D: Into<ArtifactId>,
    {
        for dep in deps {
            push_unique(&mut self.deps, dep.into());
        }
        self
    }
}

/// Append `item` unless already present, keeping first-seen order.
pub(crate) fn push_unique<T: PartialEq>(items: &mut Vec<T>, item: T) {
    if !items.contains(&item) {
        items.push(item);
    }
}

/// Ordered set semantics for source and dependency lists.
pub(crate) fn dedup_ordered<T: PartialEq + Clone>(items: &[T]) -> Vec<T> {
    let mut out = Vec::with_capacity(items.len());
    for item in items {
        push_unique(&mut out, item.clone());
    }
    out
}
