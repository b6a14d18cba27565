//! Course and blog content.
//!
//! A site is described by `site.yaml` in the content root. This module turns
//! that description into [`Artifact`]s (what each output is built from, and
//! which renderer produces it) and runs them through the orchestrator.
//!
//! ## Content Layout
//!
//! ```text
//! content/
//! ├── config.toml                       # optional tool config
//! ├── site.yaml                         # title, navbar, courses, posts
//! ├── partials/header.html              # optional shared fragments
//! ├── blog/relatividade/
//! │   ├── introducao.md                 # a lesson
//! │   └── images/fig1.png               # referenced from the lesson
//! ├── posts/hello.md
//! └── static/logo.svg                   # listed under `assets`
//! ```
//!
//! ## Output Layout
//!
//! ```text
//! dist/
//! ├── index.html
//! ├── courses/relatividade/
//! │   ├── index.html
//! │   ├── introducao.html
//! │   └── images/fig1.png               # unless the lesson inlines images
//! ├── blog/index.html
//! ├── blog/hello.html
//! ├── static/logo.svg
//! ├── sitemap.xml
//! ├── .nojekyll
//! ├── .lectern-graph.json               # cache state
//! └── .lectern-fingerprints.json
//! ```
//!
//! Every page lists `site.yaml` and the partials among its sources, so editing
//! the navbar rebuilds all pages while editing one lesson rebuilds only that
//! lesson (and the sitemap, which depends on every page).

pub mod inline;
pub mod render;

use crate::cache::planner::Plan;
use crate::cache::{ArtifactId, BuildMode, BuildSession, Declaration, DirSource, SnapshotError};
use crate::config::{self, ConfigError, LecternConfig};
use crate::orchestrator::{self, Artifact, BuildError, BuildOptions, BuildReport};
use chrono::NaiveDate;
use render::{CopyFile, Page, PageRenderer, Sitemap, StaticBytes};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::AtomicBool;
use thiserror::Error;
use walkdir::WalkDir;

#[derive(Error, Debug)]
pub enum SiteError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("YAML error in {path}: {source}")]
    Yaml {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },
    #[error("{0}")]
    Config(#[from] ConfigError),
    #[error("Site validation error: {0}")]
    Validation(String),
    #[error("content directory not found: {0}")]
    ContentRoot(PathBuf),
    #[error("{0}")]
    Build(#[from] BuildError),
    #[error("could not save build state: {0}")]
    Snapshot(#[from] SnapshotError),
}

/// Parsed `site.yaml`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SiteSpec {
    pub title: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default)]
    pub navbar: Vec<NavLink>,
    /// Markdown shown at the bottom of every page.
    #[serde(default)]
    pub footer: Option<String>,
    #[serde(default)]
    pub partials: Partials,
    /// Files or directories copied into the output verbatim.
    #[serde(default)]
    pub assets: Vec<String>,
    #[serde(default)]
    pub courses: Vec<Course>,
    #[serde(default)]
    pub posts: Vec<Post>,
}

fn default_base_url() -> String {
    "/".to_string()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct NavLink {
    pub title: String,
    pub href: String,
}

/// Raw HTML fragments spliced into every page.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Partials {
    pub header: Option<String>,
    pub footer: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Course {
    pub slug: String,
    pub title: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub lessons: Vec<Lesson>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Lesson {
    pub slug: String,
    pub title: String,
    /// Markdown file, relative to the content root.
    pub source: String,
    #[serde(default)]
    pub inline_images: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Post {
    pub slug: String,
    pub title: String,
    pub date: NaiveDate,
    pub source: String,
    #[serde(default)]
    pub inline_images: bool,
}

impl SiteSpec {
    pub fn from_yaml(text: &str, path: &Path) -> Result<Self, SiteError> {
        serde_yaml::from_str(text).map_err(|source| SiteError::Yaml {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn validate(&self) -> Result<(), SiteError> {
        if self.title.trim().is_empty() {
            return Err(SiteError::Validation("title must not be empty".into()));
        }
        check_slugs("course", self.courses.iter().map(|c| c.slug.as_str()))?;
        check_slugs("post", self.posts.iter().map(|p| p.slug.as_str()))?;
        for course in &self.courses {
            check_slugs(
                &format!("lesson in course {:?}", course.slug),
                course.lessons.iter().map(|l| l.slug.as_str()),
            )?;
        }
        let content_paths = self
            .courses
            .iter()
            .flat_map(|c| c.lessons.iter().map(|l| l.source.as_str()))
            .chain(self.posts.iter().map(|p| p.source.as_str()))
            .chain(self.assets.iter().map(String::as_str))
            .chain(self.partials.header.as_deref())
            .chain(self.partials.footer.as_deref());
        for path in content_paths {
            if content_ref(path).is_none() {
                return Err(SiteError::Validation(format!(
                    "path must be relative to the content root: {path:?}"
                )));
            }
        }
        Ok(())
    }

    /// Posts, newest first.
    pub fn posts_by_date(&self) -> Vec<&Post> {
        let mut posts: Vec<&Post> = self.posts.iter().collect();
        posts.sort_by(|a, b| b.date.cmp(&a.date).then_with(|| a.slug.cmp(&b.slug)));
        posts
    }

    fn partial_refs(&self) -> impl Iterator<Item = &str> {
        self.partials
            .header
            .as_deref()
            .into_iter()
            .chain(self.partials.footer.as_deref())
    }
}

fn check_slugs<'a>(kind: &str, slugs: impl Iterator<Item = &'a str>) -> Result<(), SiteError> {
    let mut seen = BTreeSet::new();
    for slug in slugs {
        let valid = !slug.is_empty()
            && slug
                .chars()
                .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-' || c == '_');
        if !valid {
            return Err(SiteError::Validation(format!(
                "{kind} slug {slug:?} must be non-empty and use only a-z, 0-9, '-' and '_'"
            )));
        }
        if !seen.insert(slug) {
            return Err(SiteError::Validation(format!("duplicate {kind} slug {slug:?}")));
        }
    }
    Ok(())
}

/// Normalized content-relative path, `None` if absolute or escaping.
fn content_ref(path: &str) -> Option<String> {
    if path.starts_with('/') || path.contains('\\') {
        return None;
    }
    inline::resolve_relative("", path)
}

/// Config and site description loaded from one content root.
#[derive(Debug, Clone)]
pub struct Project {
    pub content_root: PathBuf,
    pub config: LecternConfig,
    pub site: Arc<SiteSpec>,
}

impl Project {
    pub fn load(content_root: &Path) -> Result<Self, SiteError> {
        if !content_root.is_dir() {
            return Err(SiteError::ContentRoot(content_root.to_path_buf()));
        }
        let config = config::load_config(content_root)?;
        let site_path = content_root.join(&config.site_file);
        let text = fs::read_to_string(&site_path)?;
        let site = SiteSpec::from_yaml(&text, &site_path)?;
        site.validate()?;
        Ok(Self {
            content_root: content_root.to_path_buf(),
            config,
            site: Arc::new(site),
        })
    }

    /// Every artifact the site produces, pages first.
    pub fn artifacts(&self) -> Result<Vec<Artifact>, SiteError> {
        let mut decls = Declarations::default();
        let site = &self.site;
        let site_ref =
            content_ref(&self.config.site_file).unwrap_or_else(|| self.config.site_file.clone());
        let mut common = vec![site_ref.clone()];
        common.extend(site.partial_refs().filter_map(content_ref));

        let page = |page: Page| -> Arc<dyn orchestrator::Renderer> {
            Arc::new(PageRenderer::new(Arc::clone(site), page))
        };

        decls.page(
            Declaration::new("index.html").with_sources(common.iter().cloned()),
            page(Page::Home),
        )?;

        for (ci, course) in site.courses.iter().enumerate() {
            let dir = format!("courses/{}", course.slug);
            decls.page(
                Declaration::new(format!("{dir}/index.html")).with_sources(common.iter().cloned()),
                page(Page::Course { course: ci }),
            )?;
            for (li, lesson) in course.lessons.iter().enumerate() {
                let output = format!("{dir}/{}.html", lesson.slug);
                let decl = self.markdown_page(
                    &mut decls,
                    &output,
                    &lesson.source,
                    lesson.inline_images,
                    &common,
                )?;
                decls.page(decl, page(Page::Lesson { course: ci, lesson: li }))?;
            }
        }

        if !site.posts.is_empty() {
            decls.page(
                Declaration::new("blog/index.html").with_sources(common.iter().cloned()),
                page(Page::BlogIndex),
            )?;
            for (pi, post) in site.posts.iter().enumerate() {
                let output = format!("blog/{}.html", post.slug);
                let decl = self.markdown_page(
                    &mut decls,
                    &output,
                    &post.source,
                    post.inline_images,
                    &common,
                )?;
                decls.page(decl, page(Page::Post { post: pi }))?;
            }
        }

        for asset in &site.assets {
            self.declare_asset(&mut decls, asset)?;
        }

        let pages: Vec<ArtifactId> = decls.pages.clone();
        decls.push(Artifact::new(
            Declaration::new("sitemap.xml")
                .with_sources([site_ref])
                .with_deps(pages.iter().cloned()),
            Arc::new(Sitemap::new(&site.base_url, pages)),
        ))?;
        decls.push(Artifact::new(
            Declaration::new(".nojekyll"),
            Arc::new(StaticBytes::new(Vec::new())),
        ))?;

        Ok(decls.into_artifacts())
    }

    /// Declare a markdown page and the copy artifacts for the images it does
    /// not inline.
    fn markdown_page(
        &self,
        decls: &mut Declarations,
        output: &str,
        source: &str,
        inline_images: bool,
        common: &[String],
    ) -> Result<Declaration, SiteError> {
        let source = content_ref(source)
            .ok_or_else(|| SiteError::Validation(format!("bad page source {source:?}")))?;
        let mut decl = Declaration::new(output)
            .with_sources([source.as_str()])
            .with_sources(common.iter().cloned());

        let markdown = match fs::read_to_string(self.content_root.join(&source)) {
            Ok(text) => text,
            Err(err) => {
                // The page render will fail and report it.
                tracing::debug!(source = %source, error = %err, "page source unreadable");
                return Ok(decl);
            }
        };
        let source_dir = inline::parent_dir(&source);
        let output_dir = inline::parent_dir(output);
        for reference in inline::local_image_refs(&markdown) {
            let Some(image) = inline::resolve_relative(source_dir, &reference) else {
                tracing::warn!(page = output, image = %reference, "image outside content root");
                continue;
            };
            if !self.content_root.join(&image).is_file() {
                tracing::warn!(page = output, image = %image, "image not found");
                continue;
            }
            if inline_images {
                decl = decl.with_sources([image]);
                continue;
            }
            let Some(target) = inline::resolve_relative(output_dir, &reference) else {
                tracing::warn!(page = output, image = %reference, "image would land outside output");
                continue;
            };
            decls.copy(target, image)?;
        }
        Ok(decl)
    }

    fn declare_asset(&self, decls: &mut Declarations, asset: &str) -> Result<(), SiteError> {
        let rel = content_ref(asset)
            .ok_or_else(|| SiteError::Validation(format!("bad asset path {asset:?}")))?;
        let path = self.content_root.join(&rel);
        if path.is_file() {
            return decls.copy(rel.clone(), rel);
        }
        if !path.is_dir() {
            return Err(SiteError::Validation(format!("asset not found: {asset:?}")));
        }
        for entry in WalkDir::new(&path).sort_by_file_name() {
            let entry = entry.map_err(std::io::Error::other)?;
            if !entry.file_type().is_file() {
                continue;
            }
            let Ok(sub) = entry.path().strip_prefix(&self.content_root) else {
                continue;
            };
            let sub: Vec<String> = sub
                .components()
                .map(|c| c.as_os_str().to_string_lossy().into_owned())
                .collect();
            let sub = sub.join("/");
            decls.copy(sub.clone(), sub)?;
        }
        Ok(())
    }
}

/// Accumulates artifacts and rejects clashing outputs.
#[derive(Default)]
struct Declarations {
    artifacts: Vec<Artifact>,
    outputs: BTreeSet<ArtifactId>,
    copies: BTreeMap<ArtifactId, String>,
    pages: Vec<ArtifactId>,
}

impl Declarations {
    fn push(&mut self, artifact: Artifact) -> Result<(), SiteError> {
        if !self.outputs.insert(artifact.output().clone()) {
            return Err(SiteError::Validation(format!(
                "two artifacts write {}",
                artifact.output()
            )));
        }
        self.artifacts.push(artifact);
        Ok(())
    }

    fn page(
        &mut self,
        decl: Declaration,
        renderer: Arc<dyn orchestrator::Renderer>,
    ) -> Result<(), SiteError> {
        self.pages.push(decl.output.clone());
        self.push(Artifact::new(decl, renderer))
    }

    /// Copy `source` to `output`. The same copy declared twice is kept once.
    fn copy(&mut self, output: String, source: String) -> Result<(), SiteError> {
        let id = ArtifactId::new(output);
        if let Some(existing) = self.copies.get(&id) {
            if *existing == source {
                return Ok(());
            }
            return Err(SiteError::Validation(format!(
                "{id} would be copied from both {existing} and {source}"
            )));
        }
        self.copies.insert(id.clone(), source.clone());
        self.push(Artifact::new(
            Declaration::new(id).with_sources([source]),
            Arc::new(CopyFile),
        ))
    }

    fn into_artifacts(self) -> Vec<Artifact> {
        self.artifacts
    }
}

/// Build the site in `content_root` into `output_dir`.
pub fn build(
    content_root: &Path,
    output_dir: &Path,
    mode: BuildMode,
    cancel: Option<Arc<AtomicBool>>,
) -> Result<BuildReport, SiteError> {
    let project = Project::load(content_root)?;
    let artifacts = project.artifacts()?;
    tracing::debug!(artifacts = artifacts.len(), "declared artifacts");

    let options = BuildOptions {
        timeout: project.config.build.render_timeout(),
        cancel,
        protected: project.config.build.protected(),
    };
    let content = DirSource::new(content_root);
    let mut session = BuildSession::open(output_dir, mode);
    let report = orchestrator::build(
        &mut session,
        &content,
        content_root,
        output_dir,
        &artifacts,
        &options,
    )?;
    session.save()?;
    Ok(report)
}

/// What an incremental build would do, without doing it.
pub fn status(content_root: &Path, output_dir: &Path) -> Result<Plan, SiteError> {
    let project = Project::load(content_root)?;
    let artifacts = project.artifacts()?;
    let content = DirSource::new(content_root);
    let session = BuildSession::open(output_dir, BuildMode::Incremental);
    Ok(orchestrator::plan(&session, &content, output_dir, &artifacts)?)
}

/// Validate config and site, returning the declared artifacts.
pub fn check(content_root: &Path) -> Result<Vec<Declaration>, SiteError> {
    let project = Project::load(content_root)?;
    Ok(project
        .artifacts()?
        .into_iter()
        .map(|a| a.decl)
        .collect())
}
