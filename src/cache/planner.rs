//! Rebuild planning.
//!
//! For every declared artifact the planner produces a [`Reason`]: either
//! [`Reason::Unchanged`] or the first cause of staleness it found. Checks run
//! cheapest first and the first match wins:
//!
//! 1. full mode → [`Reason::ForcedFull`]
//! 2. output file missing → [`Reason::MissingOutput`]
//! 3. output exists but was never recorded → [`Reason::Untracked`]
//! 4. last attempt failed or never ran → [`Reason::PreviousFailure`]
//! 5. declared sources or deps differ from the record → [`Reason::SourcesChanged`]
//! 6. per source, in declared order: unreadable → [`Reason::SourceUnreadable`],
//!    fingerprint differs from the store → [`Reason::ContentChanged`]
//! 7. per dep: the dependency is itself stale → [`Reason::DependencyChanged`],
//!    or lies on a cycle → [`Reason::CyclicDependency`]
//! 8. otherwise [`Reason::Unchanged`]
//!
//! Step 7 recurses. A dependency is judged by its declaration for this run if
//! it has one, otherwise by its recorded sources. Verdicts are memoized for the
//! whole planning pass, and the current recursion path doubles as the cycle
//! guard: meeting a node already on the path ends the walk with
//! `CyclicDependency` instead of looping.
//!
//! Planning is read-only. [`Planner::plan`] computes every verdict against the
//! loaded fingerprint store before the orchestrator writes anything, so a
//! source shared by several artifacts is seen as changed by all of them.

use super::graph::DependencyGraph;
use super::hasher::{ContentSource, Fingerprint, Hasher};
use super::session::{BuildMode, BuildSession};
use super::store::FingerprintStore;
use super::{ArtifactId, Declaration, SourceRef, dedup_ordered};
use std::collections::HashMap;
use std::fmt;
use std::path::Path;

/// Why an artifact is (or is not) stale.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reason {
    ForcedFull,
    MissingOutput,
    Untracked,
    PreviousFailure,
    SourcesChanged,
    SourceUnreadable {
        source: SourceRef,
    },
    ContentChanged {
        source: SourceRef,
        old: Option<Fingerprint>,
        new: Fingerprint,
    },
    DependencyChanged {
        dependency: ArtifactId,
    },
    /// The walk met a node already on its path. `cycle` starts and ends with
    /// the same id.
    CyclicDependency {
        cycle: Vec<ArtifactId>,
    },
    Unchanged,
}

impl Reason {
    pub fn is_stale(&self) -> bool {
        !matches!(self, Reason::Unchanged)
    }

    pub fn is_cycle(&self) -> bool {
        matches!(self, Reason::CyclicDependency { .. })
    }
}

impl fmt::Display for Reason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Reason::ForcedFull => write!(f, "forced full rebuild"),
            Reason::MissingOutput => write!(f, "missing output"),
            Reason::Untracked => write!(f, "output not in cache"),
            Reason::PreviousFailure => write!(f, "previous build failed"),
            Reason::SourcesChanged => write!(f, "declared sources changed"),
            Reason::SourceUnreadable { source } => write!(f, "source unreadable: {source}"),
            Reason::ContentChanged { source, old, new } => match old {
                Some(old) => write!(f, "content changed: {source} ({old} -> {new})"),
                None => write!(f, "content changed: {source} (new source)"),
            },
            Reason::DependencyChanged { dependency } => {
                write!(f, "dependency changed: {dependency}")
            }
            Reason::CyclicDependency { cycle } => {
                let path: Vec<&str> = cycle.iter().map(ArtifactId::as_str).collect();
                write!(f, "cyclic dependency: {}", path.join(" -> "))
            }
            Reason::Unchanged => write!(f, "unchanged"),
        }
    }
}

/// Verdict for one declared artifact.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlanEntry {
    pub output: ArtifactId,
    pub reason: Reason,
}

/// Verdicts for a whole run, in declaration order, plus the fingerprints
/// computed while planning.
#[derive(Debug, Clone, Default)]
pub struct Plan {
    pub entries: Vec<PlanEntry>,
    fingerprints: HashMap<SourceRef, Fingerprint>,
}

impl Plan {
    pub fn stale(&self) -> impl Iterator<Item = &PlanEntry> {
        self.entries.iter().filter(|e| e.reason.is_stale())
    }

    pub fn fresh(&self) -> impl Iterator<Item = &PlanEntry> {
        self.entries.iter().filter(|e| !e.reason.is_stale())
    }

    pub fn reason(&self, output: &ArtifactId) -> Option<&Reason> {
        self.entries
            .iter()
            .find(|e| &e.output == output)
            .map(|e| &e.reason)
    }

    /// Fingerprint computed for `source` during planning.
    pub fn fingerprint(&self, source: &SourceRef) -> Option<&Fingerprint> {
        self.fingerprints.get(source)
    }

    pub fn is_up_to_date(&self) -> bool {
        self.stale().next().is_none()
    }
}

pub struct Planner<'a> {
    mode: BuildMode,
    graph: &'a DependencyGraph,
    store: &'a FingerprintStore,
    output_dir: &'a Path,
    hasher: Hasher<'a>,
    declared: HashMap<ArtifactId, (Vec<SourceRef>, Vec<ArtifactId>)>,
    resolved: HashMap<ArtifactId, Reason>,
}

impl<'a> Planner<'a> {
    pub fn new(
        session: &'a BuildSession,
        content: &'a dyn ContentSource,
        output_dir: &'a Path,
    ) -> Self {
        Self::from_parts(
            session.mode(),
            session.graph(),
            session.store(),
            content,
            output_dir,
        )
    }

    /// Same as [`Planner::new`] but without a session, for callers holding
    /// the pieces directly.
    pub fn from_parts(
        mode: BuildMode,
        graph: &'a DependencyGraph,
        store: &'a FingerprintStore,
        content: &'a dyn ContentSource,
        output_dir: &'a Path,
    ) -> Self {
        Self {
            mode,
            graph,
            store,
            output_dir,
            hasher: Hasher::new(content),
            declared: HashMap::new(),
            resolved: HashMap::new(),
        }
    }

    /// Register what `decl.output` is built from in this run, so that
    /// dependency walks judge it by its current declaration.
    pub fn declare(&mut self, decl: &Declaration) {
        self.declared.insert(
            decl.output.clone(),
            (dedup_ordered(&decl.sources), dedup_ordered(&decl.deps)),
        );
    }

    /// Staleness verdict for one artifact.
    pub fn check(&mut self, decl: &Declaration) -> Reason {
        self.declare(decl);
        let mut path = Vec::new();
        self.resolve(&decl.output, &mut path)
    }

    /// Read-only planning pass over a whole build.
    ///
    /// Declares everything first, hashes all declared sources in parallel,
    /// then judges each artifact in declaration order.
    pub fn plan(mut self, decls: &[Declaration]) -> Plan {
        for decl in decls {
            self.declare(decl);
        }
        // Full mode never compares fingerprints, but the session records
        // them after rendering, so hash in both modes.
        self.hasher
            .prefetch(decls.iter().flat_map(|d| d.sources.iter()));
        let entries = decls
            .iter()
            .map(|decl| {
                let mut path = Vec::new();
                PlanEntry {
                    output: decl.output.clone(),
                    reason: self.resolve(&decl.output, &mut path),
                }
            })
            .collect();
        Plan {
            entries,
            fingerprints: self.hasher.into_fingerprints(),
        }
    }

    fn resolve(&mut self, output: &ArtifactId, path: &mut Vec<ArtifactId>) -> Reason {
        if let Some(pos) = path.iter().position(|p| p == output) {
            let mut cycle = path[pos..].to_vec();
            cycle.push(output.clone());
            tracing::warn!(cycle = ?cycle, "cyclic artifact dependency");
            return Reason::CyclicDependency { cycle };
        }
        if let Some(reason) = self.resolved.get(output) {
            return reason.clone();
        }

        let inputs = match self.declared.get(output) {
            Some((sources, deps)) => Some((sources.clone(), deps.clone(), true)),
            None => self
                .graph
                .get(output)
                .map(|r| (r.sources.clone(), r.deps.clone(), false)),
        };
        // Neither declared nor tracked: nothing this run could rebuild, so it
        // cannot make a dependent stale.
        let Some((sources, deps, declared)) = inputs else {
            return Reason::Unchanged;
        };

        path.push(output.clone());
        let reason = self.evaluate(output, &sources, &deps, declared, path);
        path.pop();

        self.resolved.insert(output.clone(), reason.clone());
        reason
    }

    fn evaluate(
        &mut self,
        output: &ArtifactId,
        sources: &[SourceRef],
        deps: &[ArtifactId],
        declared: bool,
        path: &mut Vec<ArtifactId>,
    ) -> Reason {
        if self.mode == BuildMode::Full {
            return Reason::ForcedFull;
        }
        if !self.output_dir.join(output.as_str()).is_file() {
            return Reason::MissingOutput;
        }
        let Some(record) = self.graph.get(output) else {
            return Reason::Untracked;
        };
        if self.graph.is_pending(output) {
            return Reason::PreviousFailure;
        }
        if declared && (record.sources != sources || record.deps != deps) {
            return Reason::SourcesChanged;
        }
        for source in sources {
            let current = self.hasher.fingerprint(source);
            if current.is_absent() {
                return Reason::SourceUnreadable {
                    source: source.clone(),
                };
            }
            let old = self.store.get(source);
            if old != Some(&current) {
                return Reason::ContentChanged {
                    source: source.clone(),
                    old: old.cloned(),
                    new: current,
                };
            }
        }
        for dep in deps {
            match self.resolve(dep, path) {
                Reason::Unchanged => {}
                Reason::CyclicDependency { cycle } => {
                    return Reason::CyclicDependency { cycle };
                }
                _ => {
                    return Reason::DependencyChanged {
                        dependency: dep.clone(),
                    };
                }
            }
        }
        Reason::Unchanged
    }
}
