//! Local image references in markdown.
//!
//! A page's markdown may reference images next to it (`![fig](images/a.png)`).
//! With `inline_images: true` each local reference is replaced by a
//! `data:` URI carrying the file's bytes, so the page is self-contained. The
//! referenced images become sources of the page either way: inlined images
//! through the page itself, the rest through a copy artifact.
//!
//! Remote URLs, absolute paths and existing `data:` URIs are left alone.

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use pulldown_cmark::{CowStr, Event, Parser, Tag};
use std::path::Path;

/// Markdown extensions enabled for every page.
pub fn markdown_options() -> pulldown_cmark::Options {
    use pulldown_cmark::Options;
    Options::ENABLE_TABLES | Options::ENABLE_FOOTNOTES | Options::ENABLE_STRIKETHROUGH
}

/// True for references that point at a file in the content tree.
pub fn is_local(dest: &str) -> bool {
    let dest = dest.trim();
    !(dest.is_empty()
        || dest.starts_with('/')
        || dest.starts_with('#')
        || dest.starts_with("data:")
        || dest.starts_with("//")
        || dest.contains("://")
        || dest.starts_with("mailto:"))
}

/// Drop a `?query` or `#fragment` suffix.
fn strip_suffix(dest: &str) -> &str {
    dest.split(['?', '#']).next().unwrap_or(dest)
}

/// Image destinations referenced by `markdown`, local ones only, first-seen
/// order, without duplicates.
pub fn local_image_refs(markdown: &str) -> Vec<String> {
    let mut refs: Vec<String> = Vec::new();
    for event in Parser::new_ext(markdown, markdown_options()) {
        if let Event::Start(Tag::Image { dest_url, .. }) = event
            && is_local(&dest_url)
        {
            let dest = strip_suffix(dest_url.trim()).to_string();
            if !refs.contains(&dest) {
                refs.push(dest);
            }
        }
    }
    refs
}

/// Join `reference` onto the `/`-separated directory `base` and normalize
/// `.` and `..`. `None` if the result would climb above the root.
pub fn resolve_relative(base: &str, reference: &str) -> Option<String> {
    let mut parts: Vec<&str> = Vec::new();
    for part in base.split('/').chain(reference.split('/')) {
        match part {
            "" | "." => {}
            ".." => {
                parts.pop()?;
            }
            other => parts.push(other),
        }
    }
    if parts.is_empty() {
        return None;
    }
    Some(parts.join("/"))
}

/// Directory part of a `/`-separated path, `""` at the root.
pub fn parent_dir(path: &str) -> &str {
    path.rsplit_once('/').map_or("", |(dir, _)| dir)
}

/// Mime type guessed from the file extension.
pub fn mime_for(path: &str) -> &'static str {
    let ext = Path::new(path)
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_ascii_lowercase);
    match ext.as_deref() {
        Some("png") => "image/png",
        Some("jpg") | Some("jpeg") => "image/jpeg",
        Some("gif") => "image/gif",
        Some("svg") => "image/svg+xml",
        Some("webp") => "image/webp",
        Some("avif") => "image/avif",
        _ => "application/octet-stream",
    }
}

pub fn data_uri(mime: &str, bytes: &[u8]) -> String {
    format!("data:{mime};base64,{}", STANDARD.encode(bytes))
}

/// Markdown events with every local image rewritten by `lookup`.
///
/// `lookup` receives the reference as written and returns the replacement
/// URL, or `None` to leave it untouched.
pub fn rewrite_images<'a, F>(
    markdown: &'a str,
    mut lookup: F,
) -> impl Iterator<Item = Event<'a>> + 'a
where
    F: FnMut(&str) -> Option<String> + 'a,
{
    Parser::new_ext(markdown, markdown_options()).map(move |event| match event {
        Event::Start(Tag::Image {
            link_type,
            dest_url,
            title,
            id,
        }) if is_local(&dest_url) => {
            let dest_url = match lookup(strip_suffix(dest_url.trim())) {
                Some(replacement) => CowStr::from(replacement),
                None => dest_url,
            };
            Event::Start(Tag::Image {
                link_type,
                dest_url,
                title,
                id,
            })
        }
        other => other,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use pulldown_cmark::html;

    #[test]
    fn finds_local_images_once() {
        let md = "![a](images/a.png)\n\n![b](https://x.org/b.png)\n\n![again](images/a.png)\n\n![c](data:image/png;base64,AAAA)\n\n![d](/abs.png)\n\n![e](fig/e.svg#frag)";
        assert_eq!(local_image_refs(md), vec!["images/a.png", "fig/e.svg"]);
    }

    #[test]
    fn ignores_links_that_are_not_images() {
        assert!(local_image_refs("[text](images/a.png)").is_empty());
    }

    #[test]
    fn resolve_relative_normalizes() {
        assert_eq!(
            resolve_relative("blog/rel", "images/a.png").as_deref(),
            Some("blog/rel/images/a.png")
        );
        assert_eq!(
            resolve_relative("blog/rel", "../shared/./b.png").as_deref(),
            Some("blog/shared/b.png")
        );
        assert_eq!(resolve_relative("", "a.png").as_deref(), Some("a.png"));
        assert_eq!(resolve_relative("blog", "../../etc/passwd"), None);
    }

    #[test]
    fn parent_dir_of_paths() {
        assert_eq!(parent_dir("blog/rel/intro.md"), "blog/rel");
        assert_eq!(parent_dir("intro.md"), "");
    }

    #[test]
    fn mime_by_extension() {
        assert_eq!(mime_for("a.PNG"), "image/png");
        assert_eq!(mime_for("a.jpeg"), "image/jpeg");
        assert_eq!(mime_for("a.svg"), "image/svg+xml");
        assert_eq!(mime_for("a.bin"), "application/octet-stream");
        assert_eq!(mime_for("noext"), "application/octet-stream");
    }

    #[test]
    fn data_uri_encodes_base64() {
        assert_eq!(data_uri("image/png", b"hi"), "data:image/png;base64,aGk=");
    }

    #[test]
    fn rewrite_replaces_only_found_images() {
        let md = "![a](a.png) ![b](b.png) ![c](https://x.org/c.png)";
        let events = rewrite_images(md, |dest| {
            (dest == "a.png").then(|| "data:image/png;base64,AA==".to_string())
        });
        let mut out = String::new();
        html::push_html(&mut out, events);
        assert!(out.contains(r#"src="data:image/png;base64,AA==""#));
        assert!(out.contains(r#"src="b.png""#));
        assert!(out.contains(r#"src="https://x.org/c.png""#));
    }
}
