//! Per-invocation cache state.
//!
//! A [`BuildSession`] is opened once at the start of a build from the two
//! snapshots in the output directory, threaded through planning and
//! rendering, and saved once at the end. There is no ambient or global cache
//! state.
//!
//! ## Storage
//!
//! ```text
//! dist/
//! ├── .lectern-graph.json          # artifact records + pending retries
//! ├── .lectern-fingerprints.json   # last-seen fingerprint per source
//! └── ...
//! ```
//!
//! The state lives alongside the outputs so it travels with the output
//! directory when cached in CI. Both files are in the garbage collector's
//! protected set.
//!
//! ## Recovery
//!
//! A missing snapshot loads as empty state. A corrupt one (unreadable,
//! malformed, wrong version) is logged and also loads as empty state, which
//! plans exactly like a full rebuild. If either file is corrupt both are
//! discarded so records and fingerprints never come from different runs.

use super::graph::DependencyGraph;
use super::planner::Plan;
use super::snapshot::{self, SnapshotError};
use super::store::FingerprintStore;
use super::{ArtifactId, Declaration, Fingerprint};
use chrono::Utc;
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

pub const GRAPH_FILENAME: &str = ".lectern-graph.json";
pub const FINGERPRINTS_FILENAME: &str = ".lectern-fingerprints.json";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BuildMode {
    /// Rebuild only stale artifacts.
    #[default]
    Incremental,
    /// Discard cached state and rebuild everything.
    Full,
}

#[derive(Debug)]
pub struct BuildSession {
    mode: BuildMode,
    state_dir: PathBuf,
    graph: DependencyGraph,
    store: FingerprintStore,
    recovered: bool,
}

impl BuildSession {
    /// Open a session over the state in `state_dir`.
    ///
    /// Full mode ignores whatever is on disk.
    pub fn open(state_dir: &Path, mode: BuildMode) -> Self {
        let mut session = Self::empty(state_dir, mode);
        if mode == BuildMode::Full {
            return session;
        }
        let graph = snapshot::load::<DependencyGraph>(&state_dir.join(GRAPH_FILENAME));
        let store = snapshot::load::<FingerprintStore>(&state_dir.join(FINGERPRINTS_FILENAME));
        match (graph, store) {
            (Ok(graph), Ok(store)) => {
                session.graph = graph.unwrap_or_default();
                session.graph.reindex();
                session.store = store.unwrap_or_default();
            }
            (graph, store) => {
                for err in [graph.err(), store.err()].into_iter().flatten() {
                    tracing::warn!(error = %err, "discarding build cache");
                }
                session.recovered = true;
            }
        }
        tracing::debug!(
            artifacts = session.graph.len(),
            sources = session.store.len(),
            "opened build session"
        );
        session
    }

    /// A session with no prior state.
    pub fn empty(state_dir: &Path, mode: BuildMode) -> Self {
        Self {
            mode,
            state_dir: state_dir.to_path_buf(),
            graph: DependencyGraph::new(),
            store: FingerprintStore::new(),
            recovered: false,
        }
    }

    pub fn mode(&self) -> BuildMode {
        self.mode
    }

    pub fn graph(&self) -> &DependencyGraph {
        &self.graph
    }

    pub fn store(&self) -> &FingerprintStore {
        &self.store
    }

    /// True when a corrupt snapshot was discarded at open.
    pub fn recovered(&self) -> bool {
        self.recovered
    }

    /// Record a successful (re)build: replace the artifact's record and store
    /// the fingerprints its sources had when planning.
    pub fn record_success(&mut self, decl: &Declaration, plan: &Plan) {
        self.graph
            .record_artifact(decl.output.clone(), &decl.sources, &decl.deps, Utc::now());
        for source in &decl.sources {
            let fingerprint = plan
                .fingerprint(source)
                .cloned()
                .unwrap_or_else(Fingerprint::absent);
            self.store.set(source.clone(), fingerprint);
        }
    }

    /// Leave the previous record alone and retry the artifact next run.
    pub fn record_failure(&mut self, output: &ArtifactId) {
        self.graph.mark_pending(output.clone());
    }

    /// Forget records for artifacts no longer declared.
    pub fn forget_undeclared(&mut self, declared: &BTreeSet<ArtifactId>) -> Vec<ArtifactId> {
        self.graph.retain_declared(declared)
    }

    /// Output-relative paths of the state files.
    pub fn state_files() -> [&'static str; 2] {
        [GRAPH_FILENAME, FINGERPRINTS_FILENAME]
    }

    /// Persist both snapshots, consuming the session.
    ///
    /// The graph is written first: if the process dies between the two
    /// writes, records are newer than fingerprints and the next run rebuilds
    /// rather than trusting stale output.
    pub fn save(mut self) -> Result<(), SnapshotError> {
        let live = self.graph.referenced_sources();
        let dropped = self.store.retain_sources(&live);
        if dropped > 0 {
            tracing::debug!(dropped, "pruned fingerprints of unreferenced sources");
        }
        snapshot::save(&self.state_dir.join(GRAPH_FILENAME), &self.graph)?;
        snapshot::save(&self.state_dir.join(FINGERPRINTS_FILENAME), &self.store)?;
        Ok(())
    }
}
