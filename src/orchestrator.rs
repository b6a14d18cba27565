//! Build orchestration.
//!
//! Drives one build over a list of [`Artifact`]s:
//!
//! ```text
//! validate ids → (full: clear output) → plan (read-only)
//!   → render stale artifacts, deps first → record successes / mark failures
//!   → (incremental, not cancelled: forget undeclared, sweep orphans)
//! ```
//!
//! ## Failure isolation
//!
//! A renderer error, timeout or panic fails only its own artifact. The
//! artifact's previous record is left as it was, it goes into the pending set
//! so the next run retries it, and the build carries on with the rest.
//!
//! ## Writes
//!
//! Renderers return bytes; only the orchestrator writes, through
//! [`write_atomic`](crate::cache::snapshot::write_atomic). A late result from
//! a timed-out renderer is dropped with its channel and never reaches disk.
//!
//! ## Cancellation
//!
//! The cancel flag is checked between artifacts, never mid-render. Stale
//! artifacts not reached are marked pending and the orphan sweep is skipped.

use crate::cache::planner::{Plan, Planner, Reason};
use crate::cache::session::{BuildMode, BuildSession};
use crate::cache::snapshot::write_atomic;
use crate::cache::{ArtifactId, ContentSource, Declaration, SourceRef, gc};
use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::io;
use std::panic::{self, AssertUnwindSafe};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum RenderError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
    #[error("{0}")]
    Failed(String),
    #[error("timed out after {0:?}")]
    TimedOut(Duration),
    #[error("renderer panicked")]
    Panicked,
}

/// Per-artifact problems, collected into the report.
#[derive(Error, Debug)]
pub enum ArtifactError {
    #[error("render failed: {0}")]
    Render(#[from] RenderError),
    #[error("could not write output: {0}")]
    Write(io::Error),
}

/// Errors that stop the whole build.
#[derive(Error, Debug)]
pub enum BuildError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
    #[error("artifact declared twice: {0}")]
    DuplicateArtifact(ArtifactId),
    #[error("artifact path escapes the output directory: {0}")]
    InvalidOutput(ArtifactId),
}

/// Everything a renderer gets to see.
#[derive(Debug, Clone)]
pub struct RenderInput {
    pub output: ArtifactId,
    pub sources: Vec<SourceRef>,
    pub content_root: PathBuf,
    pub output_dir: PathBuf,
}

impl RenderInput {
    /// Absolute path of one of the declared sources.
    pub fn source_path(&self, source: &SourceRef) -> PathBuf {
        self.content_root.join(source.as_str())
    }
}

/// Produces the bytes of one artifact kind. The orchestrator never looks
/// inside the bytes.
pub trait Renderer: Send + Sync {
    fn render(&self, input: &RenderInput) -> Result<Vec<u8>, RenderError>;
}

/// A declared output together with the renderer that produces it.
#[derive(Clone)]
pub struct Artifact {
    pub decl: Declaration,
    pub renderer: Arc<dyn Renderer>,
}

impl Artifact {
    pub fn new(decl: Declaration, renderer: Arc<dyn Renderer>) -> Self {
        Self { decl, renderer }
    }

    pub fn output(&self) -> &ArtifactId {
        &self.decl.output
    }
}

impl fmt::Debug for Artifact {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Artifact").field("decl", &self.decl).finish()
    }
}

#[derive(Debug, Clone, Default)]
pub struct BuildOptions {
    /// Upper bound for one render. `None` waits forever.
    pub timeout: Option<Duration>,
    /// Checked between artifacts.
    pub cancel: Option<Arc<AtomicBool>>,
    /// Output-relative paths never swept or cleared.
    pub protected: BTreeSet<String>,
}

impl BuildOptions {
    fn cancelled(&self) -> bool {
        self.cancel
            .as_ref()
            .is_some_and(|flag| flag.load(Ordering::SeqCst))
    }
}

#[derive(Debug)]
pub enum ArtifactStatus {
    Skipped,
    Rebuilt,
    Failed(ArtifactError),
    Cancelled,
}

#[derive(Debug)]
pub struct ArtifactOutcome {
    pub output: ArtifactId,
    pub reason: Reason,
    pub status: ArtifactStatus,
}

/// Overall result of a build, for exit status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BuildOutcome {
    /// Nothing needed rebuilding.
    UpToDate,
    /// Some artifacts were rebuilt and none failed.
    Rebuilt,
    /// At least one render failed or a dependency cycle was found.
    Failed,
    /// Interrupted before every stale artifact was handled.
    Cancelled,
}

impl BuildOutcome {
    pub fn exit_code(self) -> u8 {
        match self {
            BuildOutcome::UpToDate => 0,
            BuildOutcome::Rebuilt => 2,
            BuildOutcome::Failed => 1,
            BuildOutcome::Cancelled => 130,
        }
    }
}

#[derive(Debug)]
pub struct BuildReport {
    pub mode: BuildMode,
    /// One entry per declared artifact, in render order.
    pub artifacts: Vec<ArtifactOutcome>,
    /// Orphans deleted by the sweep.
    pub removed: Vec<ArtifactId>,
    pub cancelled: bool,
    /// A corrupt cache snapshot was discarded at session start.
    pub recovered_state: bool,
}

impl BuildReport {
    pub fn rebuilt(&self) -> impl Iterator<Item = &ArtifactOutcome> {
        self.artifacts
            .iter()
            .filter(|a| matches!(a.status, ArtifactStatus::Rebuilt))
    }

    pub fn skipped(&self) -> impl Iterator<Item = &ArtifactOutcome> {
        self.artifacts
            .iter()
            .filter(|a| matches!(a.status, ArtifactStatus::Skipped))
    }

    pub fn failures(&self) -> impl Iterator<Item = (&ArtifactId, &ArtifactError)> {
        self.artifacts.iter().filter_map(|a| match &a.status {
            ArtifactStatus::Failed(err) => Some((&a.output, err)),
            _ => None,
        })
    }

    /// Artifacts found on a dependency cycle. They are rebuilt every run
    /// until the cycle is removed from the configuration.
    pub fn cycles(&self) -> impl Iterator<Item = &ArtifactOutcome> {
        self.artifacts.iter().filter(|a| a.reason.is_cycle())
    }

    pub fn status_of(&self, output: &ArtifactId) -> Option<&ArtifactOutcome> {
        self.artifacts.iter().find(|a| &a.output == output)
    }

    pub fn stats(&self) -> BuildStats {
        let mut stats = BuildStats {
            removed: self.removed.len(),
            ..BuildStats::default()
        };
        for a in &self.artifacts {
            match a.status {
                ArtifactStatus::Skipped => stats.skipped += 1,
                ArtifactStatus::Rebuilt => stats.rebuilt += 1,
                ArtifactStatus::Failed(_) => stats.failed += 1,
                ArtifactStatus::Cancelled => stats.cancelled += 1,
            }
        }
        stats
    }

    pub fn outcome(&self) -> BuildOutcome {
        let stats = self.stats();
        if self.cancelled {
            BuildOutcome::Cancelled
        } else if stats.failed > 0 || self.cycles().next().is_some() {
            BuildOutcome::Failed
        } else if stats.rebuilt > 0 || stats.removed > 0 {
            BuildOutcome::Rebuilt
        } else {
            BuildOutcome::UpToDate
        }
    }
}

/// Counts for the one-line build summary.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct BuildStats {
    pub rebuilt: usize,
    pub skipped: usize,
    pub failed: usize,
    pub cancelled: usize,
    pub removed: usize,
}

impl fmt::Display for BuildStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} rebuilt, {} unchanged", self.rebuilt, self.skipped)?;
        if self.failed > 0 {
            write!(f, ", {} failed", self.failed)?;
        }
        if self.cancelled > 0 {
            write!(f, ", {} cancelled", self.cancelled)?;
        }
        if self.removed > 0 {
            write!(f, ", {} removed", self.removed)?;
        }
        Ok(())
    }
}

/// Plan without building: the verdicts `build` would act on.
pub fn plan(
    session: &BuildSession,
    content: &dyn ContentSource,
    output_dir: &Path,
    artifacts: &[Artifact],
) -> Result<Plan, BuildError> {
    validate(artifacts)?;
    let decls: Vec<Declaration> = artifacts.iter().map(|a| a.decl.clone()).collect();
    Ok(Planner::new(session, content, output_dir).plan(&decls))
}

/// Run one build. The caller saves the session afterwards.
pub fn build(
    session: &mut BuildSession,
    content: &dyn ContentSource,
    content_root: &Path,
    output_dir: &Path,
    artifacts: &[Artifact],
    options: &BuildOptions,
) -> Result<BuildReport, BuildError> {
    validate(artifacts)?;
    std::fs::create_dir_all(output_dir)?;

    let mut protected = options.protected.clone();
    protected.extend(BuildSession::state_files().map(String::from));

    if session.mode() == BuildMode::Full {
        let cleared = gc::clear(output_dir, &protected)?;
        tracing::info!(cleared, "cleared output directory for full rebuild");
    }

    let plan = plan(session, content, output_dir, artifacts)?;
    let mut outcomes = Vec::with_capacity(artifacts.len());
    let mut cancelled = false;

    for idx in render_order(artifacts) {
        let artifact = &artifacts[idx];
        let output = artifact.output().clone();
        let reason = plan
            .reason(&output)
            .cloned()
            .unwrap_or(Reason::MissingOutput);

        if !reason.is_stale() {
            tracing::debug!(output = %output, "unchanged");
            outcomes.push(ArtifactOutcome {
                output,
                reason,
                status: ArtifactStatus::Skipped,
            });
            continue;
        }

        if cancelled || options.cancelled() {
            cancelled = true;
            session.record_failure(&output);
            outcomes.push(ArtifactOutcome {
                output,
                reason,
                status: ArtifactStatus::Cancelled,
            });
            continue;
        }

        let status = match render_one(artifact, content_root, output_dir, options.timeout) {
            Ok(()) => {
                tracing::info!(output = %output, reason = %reason, "rebuilt");
                session.record_success(&artifact.decl, &plan);
                ArtifactStatus::Rebuilt
            }
            Err(err) => {
                tracing::warn!(output = %output, error = %err, "build failed");
                session.record_failure(&output);
                ArtifactStatus::Failed(err)
            }
        };
        outcomes.push(ArtifactOutcome {
            output,
            reason,
            status,
        });
    }

    let mut removed = Vec::new();
    if !cancelled {
        let declared: BTreeSet<ArtifactId> =
            artifacts.iter().map(|a| a.output().clone()).collect();
        for id in session.forget_undeclared(&declared) {
            tracing::debug!(output = %id, "artifact no longer declared");
        }
        if session.mode() == BuildMode::Incremental {
            let on_disk = gc::outputs_on_disk(output_dir)?;
            removed = gc::sweep(output_dir, &on_disk, session.graph(), &protected)?;
        }
    }

    Ok(BuildReport {
        mode: session.mode(),
        artifacts: outcomes,
        removed,
        cancelled,
        recovered_state: session.recovered(),
    })
}

fn validate(artifacts: &[Artifact]) -> Result<(), BuildError> {
    let mut seen = BTreeSet::new();
    for artifact in artifacts {
        let id = artifact.output();
        if !id.is_contained() {
            return Err(BuildError::InvalidOutput(id.clone()));
        }
        if !seen.insert(id) {
            return Err(BuildError::DuplicateArtifact(id.clone()));
        }
    }
    Ok(())
}

/// Declaration order, except that an artifact's deps come before it.
/// Edges that close a cycle are ignored.
fn render_order(artifacts: &[Artifact]) -> Vec<usize> {
    let index: HashMap<&ArtifactId, usize> = artifacts
        .iter()
        .enumerate()
        .map(|(i, a)| (a.output(), i))
        .collect();
    let mut state = vec![Visit::New; artifacts.len()];
    let mut order = Vec::with_capacity(artifacts.len());
    for start in 0..artifacts.len() {
        visit(start, artifacts, &index, &mut state, &mut order);
    }
    order
}

#[derive(Clone, Copy, PartialEq)]
enum Visit {
    New,
    InProgress,
    Done,
}

fn visit(
    i: usize,
    artifacts: &[Artifact],
    index: &HashMap<&ArtifactId, usize>,
    state: &mut [Visit],
    order: &mut Vec<usize>,
) {
    if state[i] != Visit::New {
        return;
    }
    state[i] = Visit::InProgress;
    for dep in &artifacts[i].decl.deps {
        if let Some(&j) = index.get(dep) {
            visit(j, artifacts, index, state, order);
        }
    }
    state[i] = Visit::Done;
    order.push(i);
}

fn render_one(
    artifact: &Artifact,
    content_root: &Path,
    output_dir: &Path,
    timeout: Option<Duration>,
) -> Result<(), ArtifactError> {
    let input = RenderInput {
        output: artifact.decl.output.clone(),
        sources: artifact.decl.sources.clone(),
        content_root: content_root.to_path_buf(),
        output_dir: output_dir.to_path_buf(),
    };
    let bytes = render_with_timeout(&artifact.renderer, input, timeout)?;
    write_atomic(&output_dir.join(artifact.output().as_str()), &bytes)
        .map_err(ArtifactError::Write)
}

/// Run the renderer, on a worker thread when a timeout is set. A panic is a
/// render failure either way.
fn render_with_timeout(
    renderer: &Arc<dyn Renderer>,
    input: RenderInput,
    timeout: Option<Duration>,
) -> Result<Vec<u8>, RenderError> {
    let Some(limit) = timeout else {
        return panic::catch_unwind(AssertUnwindSafe(|| renderer.render(&input)))
            .unwrap_or(Err(RenderError::Panicked));
    };
    let (tx, rx) = mpsc::channel();
    let renderer = Arc::clone(renderer);
    std::thread::spawn(move || {
        // The receiver is gone if we already gave up on this render.
        let _ = tx.send(renderer.render(&input));
    });
    match rx.recv_timeout(limit) {
        Ok(result) => result,
        Err(RecvTimeoutError::Timeout) => Err(RenderError::TimedOut(limit)),
        Err(RecvTimeoutError::Disconnected) => Err(RenderError::Panicked),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::DirSource;
    use std::fs;
    use std::sync::Mutex;
    use tempfile::TempDir;

    /// Renders the concatenated sources and logs every call.
    struct Concat {
        calls: Mutex<Vec<String>>,
    }

    impl Renderer for Concat {
        fn render(&self, input: &RenderInput) -> Result<Vec<u8>, RenderError> {
            self.calls.lock().unwrap().push(input.output.to_string());
            let mut out = Vec::new();
            for s in &input.sources {
                out.extend(fs::read(input.source_path(s))?);
            }
            Ok(out)
        }
    }

    struct Sleepy(Duration);

    impl Renderer for Sleepy {
        fn render(&self, _input: &RenderInput) -> Result<Vec<u8>, RenderError> {
            std::thread::sleep(self.0);
            Ok(b"late".to_vec())
        }
    }

    struct Panics;

    impl Renderer for Panics {
        fn render(&self, _input: &RenderInput) -> Result<Vec<u8>, RenderError> {
            panic!("template exploded")
        }
    }

    struct Env {
        _tmp: TempDir,
        content: PathBuf,
        out: PathBuf,
    }

    impl Env {
        fn new() -> Self {
            let tmp = TempDir::new().unwrap();
            let content = tmp.path().join("content");
            let out = tmp.path().join("out");
            fs::create_dir_all(&content).unwrap();
            Self {
                _tmp: tmp,
                content,
                out,
            }
        }

        fn write(&self, rel: &str, body: &str) {
            fs::write(self.content.join(rel), body).unwrap();
        }

        fn run(&self, mode: BuildMode, artifacts: &[Artifact], options: &BuildOptions) -> BuildReport {
            let mut session = BuildSession::open(&self.out, mode);
            let source = DirSource::new(&self.content);
            let report =
                build(&mut session, &source, &self.content, &self.out, artifacts, options).unwrap();
            session.save().unwrap();
            report
        }
    }

    fn concat() -> Arc<Concat> {
        Arc::new(Concat {
            calls: Mutex::new(Vec::new()),
        })
    }

    fn art(output: &str, sources: &[&str], renderer: Arc<dyn Renderer>) -> Artifact {
        Artifact::new(
            Declaration::new(output).with_sources(sources.iter().copied()),
            renderer,
        )
    }

    #[test]
    fn writes_rendered_bytes() {
        let env = Env::new();
        env.write("a.md", "hello");
        let report = env.run(
            BuildMode::Incremental,
            &[art("a.html", &["a.md"], concat())],
            &BuildOptions::default(),
        );
        assert_eq!(fs::read_to_string(env.out.join("a.html")).unwrap(), "hello");
        assert_eq!(report.outcome(), BuildOutcome::Rebuilt);
    }

    #[test]
    fn duplicate_artifacts_are_fatal() {
        let env = Env::new();
        let r = concat();
        let artifacts = [art("a.html", &[], r.clone()), art("a.html", &[], r)];
        let mut session = BuildSession::open(&env.out, BuildMode::Incremental);
        let source = DirSource::new(&env.content);
        let err = build(
            &mut session,
            &source,
            &env.content,
            &env.out,
            &artifacts,
            &BuildOptions::default(),
        )
        .unwrap_err();
        assert!(matches!(err, BuildError::DuplicateArtifact(_)));
    }

    #[test]
    fn escaping_output_is_fatal() {
        let env = Env::new();
        let mut session = BuildSession::open(&env.out, BuildMode::Incremental);
        let source = DirSource::new(&env.content);
        let err = build(
            &mut session,
            &source,
            &env.content,
            &env.out,
            &[art("../evil.html", &[], concat())],
            &BuildOptions::default(),
        )
        .unwrap_err();
        assert!(matches!(err, BuildError::InvalidOutput(_)));
    }

    #[test]
    fn deps_render_before_dependents() {
        let env = Env::new();
        env.write("a.md", "a");
        let r = concat();
        let sitemap = Artifact::new(
            Declaration::new("sitemap.xml").with_deps(["a.html"]),
            r.clone(),
        );
        let page = art("a.html", &["a.md"], r.clone());
        env.run(BuildMode::Incremental, &[sitemap, page], &BuildOptions::default());
        assert_eq!(*r.calls.lock().unwrap(), vec!["a.html", "sitemap.xml"]);
    }

    #[test]
    fn render_order_survives_cycles() {
        let r: Arc<dyn Renderer> = concat();
        let artifacts = [
            Artifact::new(Declaration::new("a").with_deps(["b"]), r.clone()),
            Artifact::new(Declaration::new("b").with_deps(["a"]), r),
        ];
        let order = render_order(&artifacts);
        assert_eq!(order.len(), 2);
        assert!(order.contains(&0) && order.contains(&1));
    }

    #[test]
    fn timeout_is_a_render_failure() {
        let env = Env::new();
        let options = BuildOptions {
            timeout: Some(Duration::from_millis(20)),
            ..BuildOptions::default()
        };
        let report = env.run(
            BuildMode::Incremental,
            &[art("slow.html", &[], Arc::new(Sleepy(Duration::from_millis(500))))],
            &options,
        );
        let (id, err) = report.failures().next().unwrap();
        assert_eq!(id.as_str(), "slow.html");
        assert!(matches!(err, ArtifactError::Render(RenderError::TimedOut(_))));
        assert!(!env.out.join("slow.html").exists());
    }

    #[test]
    fn panicking_renderer_is_a_render_failure() {
        let env = Env::new();
        let options = BuildOptions {
            timeout: Some(Duration::from_secs(5)),
            ..BuildOptions::default()
        };
        let report = env.run(
            BuildMode::Incremental,
            &[art("boom.html", &[], Arc::new(Panics))],
            &options,
        );
        let (_, err) = report.failures().next().unwrap();
        assert!(matches!(err, ArtifactError::Render(RenderError::Panicked)));
        assert_eq!(report.outcome(), BuildOutcome::Failed);
    }

    #[test]
    fn panic_without_timeout_spares_other_artifacts() {
        let env = Env::new();
        env.write("good.md", "fine");
        let report = env.run(
            BuildMode::Incremental,
            &[
                art("boom.html", &[], Arc::new(Panics)),
                art("good.html", &["good.md"], concat()),
            ],
            &BuildOptions::default(),
        );
        let (id, err) = report.failures().next().unwrap();
        assert_eq!(id.as_str(), "boom.html");
        assert!(matches!(err, ArtifactError::Render(RenderError::Panicked)));
        assert_eq!(fs::read_to_string(env.out.join("good.html")).unwrap(), "fine");

        // State was saved: the failed artifact is retried next run
        let session = BuildSession::open(&env.out, BuildMode::Incremental);
        assert!(session.graph().is_pending(&"boom.html".into()));
        assert!(session.graph().get(&"good.html".into()).is_some());
    }

    #[test]
    fn cancelled_build_marks_remaining_pending() {
        let env = Env::new();
        env.write("a.md", "a");
        let flag = Arc::new(AtomicBool::new(true));
        let options = BuildOptions {
            cancel: Some(flag),
            ..BuildOptions::default()
        };
        let report = env.run(
            BuildMode::Incremental,
            &[art("a.html", &["a.md"], concat())],
            &options,
        );
        assert!(report.cancelled);
        assert_eq!(report.outcome(), BuildOutcome::Cancelled);
        assert!(!env.out.join("a.html").exists());

        let session = BuildSession::open(&env.out, BuildMode::Incremental);
        assert!(session.graph().is_pending(&"a.html".into()));
    }

    #[test]
    fn cancelled_build_skips_sweep() {
        let env = Env::new();
        fs::create_dir_all(&env.out).unwrap();
        fs::write(env.out.join("orphan.html"), "x").unwrap();
        let options = BuildOptions {
            cancel: Some(Arc::new(AtomicBool::new(true))),
            ..BuildOptions::default()
        };
        let report = env.run(
            BuildMode::Incremental,
            &[art("a.html", &[], concat())],
            &options,
        );
        assert!(report.removed.is_empty());
        assert!(env.out.join("orphan.html").exists());
    }

    #[test]
    fn state_files_survive_sweep() {
        let env = Env::new();
        let artifacts = [art("a.html", &[], concat())];
        env.run(BuildMode::Incremental, &artifacts, &BuildOptions::default());
        let report = env.run(BuildMode::Incremental, &artifacts, &BuildOptions::default());
        assert!(report.removed.is_empty());
        for name in BuildSession::state_files() {
            assert!(env.out.join(name).exists());
        }
    }

    #[test]
    fn stats_display() {
        let stats = BuildStats {
            rebuilt: 3,
            skipped: 10,
            failed: 1,
            cancelled: 0,
            removed: 2,
        };
        assert_eq!(stats.to_string(), "3 rebuilt, 10 unchanged, 1 failed, 2 removed");
        assert_eq!(
            BuildStats::default().to_string(),
            "0 rebuilt, 0 unchanged"
        );
    }

    #[test]
    fn exit_codes_are_distinct() {
        let codes = [
            BuildOutcome::UpToDate.exit_code(),
            BuildOutcome::Rebuilt.exit_code(),
            BuildOutcome::Failed.exit_code(),
            BuildOutcome::Cancelled.exit_code(),
        ];
        let unique: BTreeSet<u8> = codes.into_iter().collect();
        assert_eq!(unique.len(), 4);
        assert_eq!(BuildOutcome::UpToDate.exit_code(), 0);
    }
}
