//! Renderers for every artifact kind a site declares.
//!
//! Pages are [maud](https://maud.lambda.xyz/) templates around markdown
//! converted with pulldown-cmark. Links between pages are relative, so the
//! output works from any sub-path (GitHub Pages project sites included).
//!
//! Renderers only return bytes; the orchestrator writes them.

use super::inline;
use super::SiteSpec;
use crate::cache::ArtifactId;
use crate::orchestrator::{RenderError, RenderInput, Renderer};
use maud::{DOCTYPE, Markup, PreEscaped, html};
use pulldown_cmark::{Parser, html as md_html};
use std::fs;
use std::sync::Arc;

const CSS: &str = include_str!("../../static/style.css");

/// Which page of the site a [`PageRenderer`] produces.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Page {
    Home,
    Course { course: usize },
    Lesson { course: usize, lesson: usize },
    BlogIndex,
    Post { post: usize },
}

pub struct PageRenderer {
    site: Arc<SiteSpec>,
    page: Page,
}

impl PageRenderer {
    pub fn new(site: Arc<SiteSpec>, page: Page) -> Self {
        Self { site, page }
    }
}

impl Renderer for PageRenderer {
    fn render(&self, input: &RenderInput) -> Result<Vec<u8>, RenderError> {
        let site = &*self.site;
        let ctx = Context::load(site, input)?;
        let markup = match self.page {
            Page::Home => render_home(&ctx),
            Page::Course { course } => {
                let course = site
                    .courses
                    .get(course)
                    .ok_or_else(|| missing("course"))?;
                render_course(&ctx, course)
            }
            Page::Lesson { course, lesson } => {
                let course = site
                    .courses
                    .get(course)
                    .ok_or_else(|| missing("course"))?;
                let lesson = course.lessons.get(lesson).ok_or_else(|| missing("lesson"))?;
                let body = markdown_body(input, &lesson.source, lesson.inline_images)?;
                render_lesson(&ctx, course, lesson, &body)
            }
            Page::BlogIndex => render_blog_index(&ctx),
            Page::Post { post } => {
                let post = site.posts.get(post).ok_or_else(|| missing("post"))?;
                let body = markdown_body(input, &post.source, post.inline_images)?;
                render_post(&ctx, post, &body)
            }
        };
        Ok(markup.into_string().into_bytes())
    }
}

fn missing(what: &str) -> RenderError {
    RenderError::Failed(format!("{what} no longer in site description"))
}

/// What every page needs besides its own content.
struct Context<'a> {
    site: &'a SiteSpec,
    /// `../` steps from the page back to the output root.
    root: String,
    header: Option<String>,
    footer: Option<String>,
}

impl<'a> Context<'a> {
    fn load(site: &'a SiteSpec, input: &RenderInput) -> Result<Self, RenderError> {
        let read = |path: &Option<String>| -> Result<Option<String>, RenderError> {
            match path {
                Some(p) => Ok(Some(fs::read_to_string(input.content_root.join(p))?)),
                None => Ok(None),
            }
        };
        Ok(Self {
            site,
            root: root_prefix(&input.output),
            header: read(&site.partials.header)?,
            footer: read(&site.partials.footer)?,
        })
    }

    fn link(&self, target: &str) -> String {
        format!("{}{}", self.root, target)
    }
}

/// Relative path from `output` back to the output root.
pub fn root_prefix(output: &ArtifactId) -> String {
    "../".repeat(output.as_str().matches('/').count())
}

pub fn markdown_to_html(markdown: &str) -> String {
    let mut out = String::new();
    md_html::push_html(&mut out, Parser::new_ext(markdown, inline::markdown_options()));
    out
}

/// Read a page's markdown and convert it, inlining local images if asked.
fn markdown_body(input: &RenderInput, source: &str, inline_images: bool) -> Result<String, RenderError> {
    let markdown = fs::read_to_string(input.content_root.join(source))?;
    if !inline_images {
        return Ok(markdown_to_html(&markdown));
    }
    let source_dir = inline::parent_dir(source);
    let events = inline::rewrite_images(&markdown, |reference| {
        let image = inline::resolve_relative(source_dir, reference)?;
        match fs::read(input.content_root.join(&image)) {
            Ok(bytes) => Some(inline::data_uri(inline::mime_for(&image), &bytes)),
            Err(err) => {
                tracing::warn!(source, image = %image, error = %err, "image not inlined");
                None
            }
        }
    });
    let mut out = String::new();
    md_html::push_html(&mut out, events);
    Ok(out)
}

// ============================================================================
// HTML Components
// ============================================================================

fn base_document(ctx: &Context, title: &str, content: Markup) -> Markup {
    let full_title = if title == ctx.site.title {
        title.to_string()
    } else {
        format!("{title} · {}", ctx.site.title)
    };
    html! {
        (DOCTYPE)
        html lang="en" {
            head {
                meta charset="UTF-8";
                meta name="viewport" content="width=device-width, initial-scale=1.0";
                @if let Some(description) = &ctx.site.description {
                    meta name="description" content=(description);
                }
                title { (full_title) }
                style { (PreEscaped(CSS)) }
            }
            body {
                @if let Some(header) = &ctx.header {
                    (PreEscaped(header))
                }
                (navbar(ctx))
                main { (content) }
                (site_footer(ctx))
            }
        }
    }
}

fn navbar(ctx: &Context) -> Markup {
    html! {
        nav.navbar {
            a.brand href=(ctx.link("index.html")) { (ctx.site.title) }
            ul {
                @for course in &ctx.site.courses {
                    li {
                        a href=(ctx.link(&format!("courses/{}/index.html", course.slug))) {
                            (course.title)
                        }
                    }
                }
                @if !ctx.site.posts.is_empty() {
                    li { a href=(ctx.link("blog/index.html")) { "Blog" } }
                }
                @for link in &ctx.site.navbar {
                    li { a href=(link.href) { (link.title) } }
                }
            }
        }
    }
}

fn site_footer(ctx: &Context) -> Markup {
    html! {
        @if ctx.site.footer.is_some() || ctx.footer.is_some() {
            footer.site-footer {
                @if let Some(text) = &ctx.site.footer {
                    (PreEscaped(markdown_to_html(text)))
                }
                @if let Some(partial) = &ctx.footer {
                    (PreEscaped(partial))
                }
            }
        }
    }
}

// ============================================================================
// Page Renderers
// ============================================================================

fn render_home(ctx: &Context) -> Markup {
    let site = ctx.site;
    let content = html! {
        h1 { (site.title) }
        @if let Some(description) = &site.description {
            p.lead { (description) }
        }
        @if !site.courses.is_empty() {
            section.courses {
                h2 { "Courses" }
                ul.cards {
                    @for course in &site.courses {
                        li {
                            a href=(ctx.link(&format!("courses/{}/index.html", course.slug))) {
                                (course.title)
                            }
                            @if let Some(description) = &course.description {
                                p { (description) }
                            }
                        }
                    }
                }
            }
        }
        @if !site.posts.is_empty() {
            section.posts {
                h2 { "Latest posts" }
                (post_list(ctx))
            }
        }
    };
    base_document(ctx, &site.title, content)
}

fn post_list(ctx: &Context) -> Markup {
    html! {
        ul.post-list {
            @for post in ctx.site.posts_by_date() {
                li {
                    time datetime=(post.date.to_string()) { (post.date.to_string()) }
                    " "
                    a href=(ctx.link(&format!("blog/{}.html", post.slug))) { (post.title) }
                }
            }
        }
    }
}

fn render_course(ctx: &Context, course: &super::Course) -> Markup {
    let content = html! {
        h1 { (course.title) }
        @if let Some(description) = &course.description {
            p.lead { (description) }
        }
        ol.lessons {
            @for lesson in &course.lessons {
                li { a href={ (lesson.slug) ".html" } { (lesson.title) } }
            }
        }
    };
    base_document(ctx, &course.title, content)
}

fn render_lesson(
    ctx: &Context,
    course: &super::Course,
    lesson: &super::Lesson,
    body: &str,
) -> Markup {
    let idx = course.lessons.iter().position(|l| l.slug == lesson.slug);
    let prev = idx.and_then(|i| i.checked_sub(1)).and_then(|i| course.lessons.get(i));
    let next = idx.and_then(|i| course.lessons.get(i + 1));
    let content = html! {
        nav.breadcrumb {
            a href="index.html" { (course.title) }
            " › "
            (lesson.title)
        }
        article.lesson {
            (PreEscaped(body))
        }
        nav.pager {
            @if let Some(prev) = prev {
                a.prev href={ (prev.slug) ".html" } { "← " (prev.title) }
            }
            @if let Some(next) = next {
                a.next href={ (next.slug) ".html" } { (next.title) " →" }
            }
        }
    };
    base_document(ctx, &lesson.title, content)
}

fn render_blog_index(ctx: &Context) -> Markup {
    let content = html! {
        h1 { "Blog" }
        (post_list(ctx))
    };
    base_document(ctx, "Blog", content)
}

fn render_post(ctx: &Context, post: &super::Post, body: &str) -> Markup {
    let content = html! {
        article.post {
            header {
                h1 { (post.title) }
                time datetime=(post.date.to_string()) { (post.date.format("%d %b %Y").to_string()) }
            }
            (PreEscaped(body))
        }
    };
    base_document(ctx, &post.title, content)
}

// ============================================================================
// Non-page artifacts
// ============================================================================

/// Byte-for-byte copy of the artifact's only source.
pub struct CopyFile;

impl Renderer for CopyFile {
    fn render(&self, input: &RenderInput) -> Result<Vec<u8>, RenderError> {
        let source = input
            .sources
            .first()
            .ok_or_else(|| RenderError::Failed("copy artifact has no source".into()))?;
        Ok(fs::read(input.source_path(source))?)
    }
}

/// Fixed content, such as the empty `.nojekyll` marker.
pub struct StaticBytes(Vec<u8>);

impl StaticBytes {
    pub fn new(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }
}

impl Renderer for StaticBytes {
    fn render(&self, _input: &RenderInput) -> Result<Vec<u8>, RenderError> {
        Ok(self.0.clone())
    }
}

/// `sitemap.xml` listing every page under the site's base URL.
pub struct Sitemap {
    base_url: String,
    pages: Vec<ArtifactId>,
}

impl Sitemap {
    pub fn new(base_url: &str, pages: Vec<ArtifactId>) -> Self {
        let mut base_url = base_url.to_string();
        if !base_url.ends_with('/') {
            base_url.push('/');
        }
        Self { base_url, pages }
    }

    /// Public URL of a page; `dir/index.html` is served as `dir/`.
    pub fn url(&self, page: &ArtifactId) -> String {
        let path = page.as_str();
        let path = path.strip_suffix("index.html").unwrap_or(path);
        format!("{}{}", self.base_url, path)
    }
}

impl Renderer for Sitemap {
    fn render(&self, _input: &RenderInput) -> Result<Vec<u8>, RenderError> {
        let markup = html! {
            (PreEscaped(r#"<?xml version="1.0" encoding="UTF-8"?>"#))
            "\n"
            urlset xmlns="http://www.sitemaps.org/schemas/sitemap/0.9" {
                @for page in &self.pages {
                    url { loc { (self.url(page)) } }
                }
            }
        };
        Ok(markup.into_string().into_bytes())
    }
}

// ============================================================================
// Tests
// ============================================================================
