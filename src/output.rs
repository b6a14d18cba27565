//! CLI output formatting.
//!
//! # Output Format
//!
//! ## Build
//!
//! ```text
//! Rebuilt
//!     courses/relatividade/introducao.html
//!         Reason: content changed: blog/relatividade/introducao.md (3f2a9c1d04be -> 9d01c2e7aa45)
//!     sitemap.xml
//!         Reason: dependency changed: courses/relatividade/introducao.html
//!
//! Failed
//!     blog/hello.html
//!         Error: render failed: IO error: No such file or directory (os error 2)
//!
//! Removed
//!     blog/old-post.html
//!
//! 2 rebuilt, 11 unchanged, 1 failed, 1 removed
//! ```
//!
//! ## Status
//!
//! ```text
//! Stale
//!     index.html
//!         Reason: missing output
//!
//! 1 stale, 12 up to date
//! ```
//!
//! ## Check
//!
//! ```text
//! Pages
//! 001 index.html
//!     Sources: site.yaml, partials/header.html
//! 002 courses/relatividade/index.html
//!     Sources: site.yaml, partials/header.html
//!
//! Files
//! 001 static/logo.svg
//!     Sources: static/logo.svg
//! 002 sitemap.xml
//!     Sources: site.yaml
//!     Depends on: 6 pages
//!
//! 13 artifacts declared
//! ```
//!
//! # Architecture
//!
//! Each view has a `format_*` function (returns `Vec<String>`) for testability
//! and a `print_*` wrapper that writes to stdout. Format functions are pure:
//! no I/O, no side effects.

use crate::cache::Declaration;
use crate::cache::planner::Plan;
use crate::orchestrator::{ArtifactStatus, BuildReport};

// ============================================================================
// Shared display helpers
// ============================================================================

/// Format a 1-based positional index as 3-digit zero-padded.
fn format_index(pos: usize) -> String {
    format!("{:0>3}", pos)
}

/// Return indentation string: 4 spaces per depth level.
fn indent(depth: usize) -> String {
    "    ".repeat(depth)
}

/// Blank line between sections, never at the top.
fn section(lines: &mut Vec<String>, title: &str) {
    if !lines.is_empty() {
        lines.push(String::new());
    }
    lines.push(title.to_string());
}

fn plural(n: usize, one: &str, many: &str) -> String {
    if n == 1 {
        format!("{n} {one}")
    } else {
        format!("{n} {many}")
    }
}

// ============================================================================
// Build
// ============================================================================

pub fn format_build_report(report: &BuildReport) -> Vec<String> {
    let mut lines = Vec::new();

    if report.recovered_state {
        lines.push("Build cache was unreadable and has been reset".to_string());
    }

    let rebuilt: Vec<_> = report.rebuilt().collect();
    if !rebuilt.is_empty() {
        section(&mut lines, "Rebuilt");
        for artifact in rebuilt {
            lines.push(format!("{}{}", indent(1), artifact.output));
            lines.push(format!("{}Reason: {}", indent(2), artifact.reason));
        }
    }

    let failures: Vec<_> = report.failures().collect();
    if !failures.is_empty() {
        section(&mut lines, "Failed");
        for (output, err) in failures {
            lines.push(format!("{}{}", indent(1), output));
            lines.push(format!("{}Error: {}", indent(2), err));
        }
    }

    let cycles: Vec<_> = report.cycles().collect();
    if !cycles.is_empty() {
        section(&mut lines, "Dependency cycles");
        for artifact in cycles {
            lines.push(format!("{}{}", indent(1), artifact.output));
            lines.push(format!("{}{}", indent(2), artifact.reason));
        }
    }

    let cancelled: Vec<_> = report
        .artifacts
        .iter()
        .filter(|a| matches!(a.status, ArtifactStatus::Cancelled))
        .collect();
    if !cancelled.is_empty() {
        section(&mut lines, "Cancelled");
        for artifact in cancelled {
            lines.push(format!("{}{}", indent(1), artifact.output));
        }
    }

    if !report.removed.is_empty() {
        section(&mut lines, "Removed");
        for output in &report.removed {
            lines.push(format!("{}{}", indent(1), output));
        }
    }

    if !lines.is_empty() {
        lines.push(String::new());
    }
    lines.push(report.stats().to_string());
    lines
}

/// Print the build report to stdout.
pub fn print_build_report(report: &BuildReport) {
    for line in format_build_report(report) {
        println!("{}", line);
    }
}

// ============================================================================
// Status
// ============================================================================

pub fn format_plan(plan: &Plan) -> Vec<String> {
    let mut lines = Vec::new();
    let stale: Vec<_> = plan.stale().collect();
    if !stale.is_empty() {
        lines.push("Stale".to_string());
        for entry in &stale {
            lines.push(format!("{}{}", indent(1), entry.output));
            lines.push(format!("{}Reason: {}", indent(2), entry.reason));
        }
        lines.push(String::new());
    }
    let fresh = plan.fresh().count();
    if stale.is_empty() {
        lines.push(format!(
            "Everything up to date ({})",
            plural(fresh, "artifact", "artifacts")
        ));
    } else {
        lines.push(format!("{} stale, {} up to date", stale.len(), fresh));
    }
    lines
}

/// Print the plan to stdout.
pub fn print_plan(plan: &Plan) {
    for line in format_plan(plan) {
        println!("{}", line);
    }
}

// ============================================================================
// Check
// ============================================================================

pub fn format_check(decls: &[Declaration]) -> Vec<String> {
    let (pages, files): (Vec<&Declaration>, Vec<&Declaration>) = decls
        .iter()
        .partition(|d| d.output.as_str().ends_with(".html"));

    let mut lines = Vec::new();
    for (title, group) in [("Pages", &pages), ("Files", &files)] {
        if group.is_empty() {
            continue;
        }
        section(&mut lines, title);
        for (i, decl) in group.iter().enumerate() {
            lines.push(format!("{} {}", format_index(i + 1), decl.output));
            if !decl.sources.is_empty() {
                let sources: Vec<&str> = decl.sources.iter().map(|s| s.as_str()).collect();
                lines.push(format!("{}Sources: {}", indent(1), sources.join(", ")));
            }
            if !decl.deps.is_empty() {
                lines.push(format!(
                    "{}Depends on: {}",
                    indent(1),
                    plural(decl.deps.len(), "page", "pages")
                ));
            }
        }
    }

    if !lines.is_empty() {
        lines.push(String::new());
    }
    lines.push(format!(
        "{} declared",
        plural(decls.len(), "artifact", "artifacts")
    ));
    lines
}

/// Print the declared artifacts to stdout.
pub fn print_check(decls: &[Declaration]) {
    for line in format_check(decls) {
        println!("{}", line);
    }
}

// ============================================================================
// Tests
// ============================================================================
