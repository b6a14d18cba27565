//! # Lectern
//!
//! A static site generator for course notes and blogs, built around a
//! content-addressed incremental build cache. `site.yaml` lists courses,
//! lessons and posts; lessons and posts are markdown; the output is plain HTML
//! ready for GitHub Pages.
//!
//! # Architecture
//!
//! ```text
//! site.yaml ─▶ site::Project::artifacts ─▶ [Declaration + Renderer]
//!                                                 │
//!         BuildSession::open ─▶ Planner (read-only) ─▶ orchestrator::build
//!                                                 │
//!                      render stale ─▶ record ─▶ sweep orphans ─▶ save
//! ```
//!
//! The cache core ([`cache`]) never looks at HTML or YAML. It sees
//! declarations (this output is built from these sources and these other
//! outputs) and answers one question per artifact: rebuild, and why? The
//! content layer ([`site`]) produces the declarations and the renderers; the
//! [`orchestrator`] ties the two together.
//!
//! # Module Map
//!
//! | Module | Role |
//! |--------|------|
//! | [`cache`] | Fingerprints, persisted state, dependency graph, rebuild planner, orphan sweep |
//! | [`orchestrator`] | Runs renderers for stale artifacts, isolates failures, honours timeouts and Ctrl-C |
//! | [`site`] | `site.yaml` model and validation, artifact declarations, top-level `build`/`status`/`check` |
//! | [`config`] | `config.toml` loading: stock defaults, sparse overrides, validation |
//! | [`output`] | CLI output formatting for build reports, plans and artifact listings |
//!
//! # Design Decisions
//!
//! ## Content Hashes, Not Timestamps
//!
//! Staleness is decided by SHA-256 of source bytes, never by mtime. A fresh
//! checkout in CI, a `touch`, or a branch switch that restores identical
//! content does not trigger rebuilds; an edit that keeps the mtime does.
//!
//! ## State Travels With the Output
//!
//! The dependency graph and the fingerprint store are two JSON files inside
//! the output directory. Caching `dist/` between CI runs caches the build
//! state with it, and deleting `dist/` is a clean rebuild.
//!
//! ## Plan First, Then Write
//!
//! All verdicts are computed before any renderer runs. A source shared by
//! many pages (the site file, a partial) is therefore seen as changed by every
//! one of them, even though the fingerprint store is updated as soon as the
//! first of those pages is rebuilt.

pub mod cache;
pub mod config;
pub mod orchestrator;
pub mod output;
pub mod site;

#[cfg(test)]
pub(crate) mod test_helpers;
