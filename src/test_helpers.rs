//! Shared test utilities for the lectern test suite.
//!
//! Provides an isolated copy of the sample site in `fixtures/content/`, small
//! file writers for tweaking it, and lookups over build reports.
//!
//! # Usage
//!
//! ```rust
//! use crate::test_helpers::*;
//!
//! let tmp = setup_fixtures();
//! write_file(tmp.path(), "posts/hello.md", "Edited");
//! let report = build_fixture(tmp.path(), BuildMode::Incremental);
//! assert_eq!(rebuilt_outputs(&report), vec!["blog/hello.html", "sitemap.xml"]);
//! ```

use std::path::{Path, PathBuf};
use tempfile::TempDir;

use crate::cache::BuildMode;
use crate::orchestrator::BuildReport;
use crate::site;

// =========================================================================
// Fixture setup
// =========================================================================

/// Copy `fixtures/content/` to a temp directory and return it.
///
/// Tests get an isolated copy they can mutate without affecting other tests
/// or the source fixtures.
pub fn setup_fixtures() -> TempDir {
    let tmp = TempDir::new().unwrap();
    let fixtures = Path::new(env!("CARGO_MANIFEST_DIR")).join("fixtures/content");
    copy_dir_recursive(&fixtures, tmp.path()).unwrap();
    tmp
}

fn copy_dir_recursive(src: &Path, dst: &Path) -> std::io::Result<()> {
    for entry in std::fs::read_dir(src)? {
        let entry = entry?;
        let src_path = entry.path();
        let dst_path = dst.join(entry.file_name());

        if src_path.is_dir() {
            std::fs::create_dir_all(&dst_path)?;
            copy_dir_recursive(&src_path, &dst_path)?;
        } else {
            std::fs::copy(&src_path, &dst_path)?;
        }
    }
    Ok(())
}

/// Write `body` to `root/rel`, creating parent directories.
pub fn write_file(root: &Path, rel: &str, body: &str) {
    let path = root.join(rel);
    std::fs::create_dir_all(path.parent().unwrap()).unwrap();
    std::fs::write(path, body).unwrap();
}

/// Replace the fixture's `site.yaml`.
pub fn write_site_yaml(root: &Path, yaml: &str) {
    write_file(root, "site.yaml", yaml);
}

/// Output directory used by [`build_fixture`], beside the content.
pub fn output_dir(content: &Path) -> PathBuf {
    content.join("_site")
}

// =========================================================================
// Building
// =========================================================================

/// Build the site in `content` into [`output_dir`]. Panics on fatal errors.
pub fn build_fixture(content: &Path, mode: BuildMode) -> BuildReport {
    site::build(content, &output_dir(content), mode, None)
        .unwrap_or_else(|err| panic!("build failed: {err}"))
}

/// Read a built output as text. Panics if missing.
pub fn read_output(content: &Path, rel: &str) -> String {
    let path = output_dir(content).join(rel);
    std::fs::read_to_string(&path)
        .unwrap_or_else(|err| panic!("cannot read {}: {err}", path.display()))
}

// =========================================================================
// Report extractors
// =========================================================================

/// Outputs rebuilt in this report, sorted.
pub fn rebuilt_outputs(report: &BuildReport) -> Vec<&str> {
    let mut outputs: Vec<&str> = report.rebuilt().map(|a| a.output.as_str()).collect();
    outputs.sort_unstable();
    outputs
}
