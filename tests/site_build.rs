//! End-to-end builds of the sample site in `fixtures/content/`.

use lectern::cache::{ArtifactId, BuildMode, Reason};
use lectern::orchestrator::BuildOutcome;
use lectern::site;
use std::fs;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

struct Workspace {
    _tmp: TempDir,
    content: PathBuf,
    out: PathBuf,
}

fn workspace() -> Workspace {
    let tmp = TempDir::new().unwrap();
    let content = tmp.path().join("content");
    let out = tmp.path().join("dist");
    let fixtures = Path::new(env!("CARGO_MANIFEST_DIR")).join("fixtures/content");
    copy_dir(&fixtures, &content);
    Workspace {
        _tmp: tmp,
        content,
        out,
    }
}

fn copy_dir(src: &Path, dst: &Path) {
    fs::create_dir_all(dst).unwrap();
    for entry in fs::read_dir(src).unwrap() {
        let entry = entry.unwrap();
        let target = dst.join(entry.file_name());
        if entry.path().is_dir() {
            copy_dir(&entry.path(), &target);
        } else {
            fs::copy(entry.path(), target).unwrap();
        }
    }
}

impl Workspace {
    fn build(&self, mode: BuildMode) -> lectern::orchestrator::BuildReport {
        site::build(&self.content, &self.out, mode, None).unwrap()
    }

    fn read(&self, rel: &str) -> String {
        fs::read_to_string(self.out.join(rel)).unwrap()
    }
}

// =========================================================================
// First build
// =========================================================================

#[test]
fn first_build_writes_the_whole_site() {
    let ws = workspace();
    let report = ws.build(BuildMode::Incremental);

    assert!(report.failures().next().is_none());
    assert_eq!(report.outcome(), BuildOutcome::Rebuilt);
    assert!(report.rebuilt().all(|a| a.reason == Reason::MissingOutput));

    for rel in [
        "index.html",
        "courses/relatividade/index.html",
        "courses/relatividade/introducao.html",
        "courses/relatividade/dilatacao.html",
        "courses/relatividade/images/diagram.svg",
        "blog/index.html",
        "blog/hello.html",
        "blog/notas.html",
        "static/logo.svg",
        "sitemap.xml",
        ".nojekyll",
        ".lectern-graph.json",
        ".lectern-fingerprints.json",
    ] {
        assert!(ws.out.join(rel).is_file(), "missing {rel}");
    }
}

#[test]
fn pages_carry_site_chrome_and_relative_links() {
    let ws = workspace();
    ws.build(BuildMode::Incremental);

    let lesson = ws.read("courses/relatividade/introducao.html");
    assert!(lesson.contains(r#"<div class="banner">Física Moderna</div>"#));
    assert!(lesson.contains(r#"href="../../index.html""#));
    assert!(lesson.contains(r#"href="dilatacao.html""#));
    assert!(lesson.contains("data:image/png;base64,"));

    let other = ws.read("courses/relatividade/dilatacao.html");
    assert!(other.contains(r#"src="images/diagram.svg""#));
    assert!(other.contains("<table>"));

    let sitemap = ws.read("sitemap.xml");
    assert!(sitemap.contains("<loc>https://example.org/fisica/blog/hello.html</loc>"));
}

// =========================================================================
// Incremental rebuilds
// =========================================================================

#[test]
fn rebuild_touches_only_what_changed() {
    let ws = workspace();
    ws.build(BuildMode::Incremental);

    let untouched = ws.build(BuildMode::Incremental);
    assert_eq!(untouched.outcome(), BuildOutcome::UpToDate);
    assert_eq!(untouched.rebuilt().count(), 0);

    fs::write(
        ws.content.join("blog/relatividade/dilatacao.md"),
        "# Dilatação\n\nRevisado.\n",
    )
    .unwrap();
    let report = ws.build(BuildMode::Incremental);
    let mut rebuilt: Vec<&str> = report.rebuilt().map(|a| a.output.as_str()).collect();
    rebuilt.sort();
    assert_eq!(
        rebuilt,
        vec!["courses/relatividade/dilatacao.html", "sitemap.xml"]
    );
    // No longer referenced by any page
    assert_eq!(
        report.removed,
        vec![ArtifactId::from("courses/relatividade/images/diagram.svg")]
    );
}

#[test]
fn status_matches_what_build_does() {
    let ws = workspace();
    ws.build(BuildMode::Incremental);
    fs::write(ws.content.join("posts/notas.md"), "Outras notas.").unwrap();

    let plan = site::status(&ws.content, &ws.out).unwrap();
    let mut stale: Vec<&str> = plan.stale().map(|e| e.output.as_str()).collect();
    stale.sort();
    assert_eq!(stale, vec!["blog/notas.html", "sitemap.xml"]);

    let report = ws.build(BuildMode::Incremental);
    assert_eq!(report.rebuilt().count(), 2);
}

// =========================================================================
// Full rebuilds
// =========================================================================

#[test]
fn full_build_keeps_protected_files() {
    let ws = workspace();
    ws.build(BuildMode::Incremental);
    fs::write(ws.out.join("CNAME"), "fisica.example.org").unwrap();
    fs::write(ws.out.join("stray.txt"), "x").unwrap();

    let report = ws.build(BuildMode::Full);
    assert!(report.rebuilt().all(|a| a.reason == Reason::ForcedFull));
    assert_eq!(ws.read("CNAME"), "fisica.example.org");
    assert!(!ws.out.join("stray.txt").exists());

    let after = ws.build(BuildMode::Incremental);
    assert_eq!(after.outcome(), BuildOutcome::UpToDate);
}
