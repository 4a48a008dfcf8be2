use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use pulldown_cmark::{CodeBlockKind, CowStr, Event, Options, Parser, Tag, TagEnd, html};
use serde::Serialize;
use syntect::highlighting::ThemeSet;
use syntect::html::highlighted_html_for_string;
use syntect::parsing::{SyntaxReference, SyntaxSet};

use crate::extensions::{
    Extension, ExtensionConflict, HighlightOptions, Stage, TocOptions, admonitions, check_order,
};
use crate::nav::{is_markdown, normalize_relative};

// Initialize syntax highlighting resources once
static SYNTAX_SET: LazyLock<SyntaxSet> = LazyLock::new(SyntaxSet::load_defaults_newlines);
static THEME_SET: LazyLock<ThemeSet> = LazyLock::new(ThemeSet::load_defaults);

pub fn highlight_theme_exists(name: &str) -> bool {
    THEME_SET.themes.contains_key(name)
}

/// One heading of a page's table of contents.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TocEntry {
    pub level: u8,
    pub title: String,
    pub id: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderedMarkdown {
    pub html: String,
    /// Text of the first level-1 heading.
    pub title: Option<String>,
    /// Filled when the `toc` extension is enabled.
    pub toc: Vec<TocEntry>,
}

/// Resolves relative links of one page against the rest of the site.
pub struct LinkContext<'a> {
    /// Docs-relative path of the page being rendered.
    pub page: &'a Path,
    /// Root-relative URL of every page, keyed by docs-relative source path.
    pub urls: &'a HashMap<PathBuf, String>,
    /// Relative path from the page to the site root.
    pub base_url: &'a str,
    /// Non-page link targets are only rewritten when they exist here.
    pub docs_dir: &'a Path,
}

/// The configured `markdown_extensions`, ready to apply.
#[derive(Debug, Clone)]
pub struct Pipeline {
    options: Options,
    source: Vec<Extension>,
    events: Vec<Extension>,
}

impl Default for Pipeline {
    fn default() -> Self {
        Self {
            options: Options::empty(),
            source: Vec::new(),
            events: Vec::new(),
        }
    }
}

impl Pipeline {
    pub fn new(extensions: &[Extension]) -> Result<Self, ExtensionConflict> {
        check_order(extensions)?;

        let mut pipeline = Self::default();
        for ext in extensions {
            match ext.stage() {
                Stage::Parser(options) => pipeline.options.insert(options),
                Stage::Source => pipeline.source.push(ext.clone()),
                Stage::Event => pipeline.events.push(ext.clone()),
            }
        }
        Ok(pipeline)
    }

    pub fn render(&self, markdown: &str, links: Option<&LinkContext<'_>>) -> RenderedMarkdown {
        let mut text = markdown.to_string();
        for ext in &self.source {
            if let Extension::Admonition = ext {
                text = admonitions(&text);
            }
        }

        let mut events: Vec<Event> = Parser::new_ext(&text, self.options).collect();
        let title = first_heading(&events);

        if let Some(links) = links {
            events = rewrite_links(events, links);
        }

        let mut toc = Vec::new();
        for ext in &self.events {
            events = match ext {
                Extension::Toc(options) => anchor_headings(events, options, &mut toc),
                Extension::Highlight(options) => highlight_code(events, options),
                Extension::FencedCode => fence_code(events),
                _ => events,
            };
        }

        let mut out = String::new();
        html::push_html(&mut out, events.into_iter());

        RenderedMarkdown {
            html: out,
            title,
            toc,
        }
    }
}

fn first_heading(events: &[Event]) -> Option<String> {
    let start = events.iter().position(|e| {
        matches!(
            e,
            Event::Start(Tag::Heading {
                level: pulldown_cmark::HeadingLevel::H1,
                ..
            })
        )
    })?;
    let end = events[start..]
        .iter()
        .position(|e| matches!(e, Event::End(TagEnd::Heading(_))))?;
    let text = plain_text(&events[start + 1..start + end]);
    let text = text.trim();
    if text.is_empty() {
        None
    } else {
        Some(text.to_string())
    }
}

fn plain_text(events: &[Event]) -> String {
    let mut text = String::new();
    for event in events {
        match event {
            Event::Text(t) | Event::Code(t) | Event::InlineMath(t) => text.push_str(t),
            Event::SoftBreak | Event::HardBreak => text.push(' '),
            _ => {}
        }
    }
    text
}

pub fn slugify(text: &str) -> String {
    let mut slug = String::with_capacity(text.len());
    for c in text.trim().chars().flat_map(char::to_lowercase) {
        if c.is_alphanumeric() {
            slug.push(c);
        } else if (c.is_whitespace() || c == '-' || c == '_') && !slug.ends_with('-') {
            slug.push('-');
        }
    }
    let slug = slug.trim_matches('-');
    if slug.is_empty() {
        "section".to_string()
    } else {
        slug.to_string()
    }
}

fn rewrite_links<'a>(events: Vec<Event<'a>>, ctx: &LinkContext<'_>) -> Vec<Event<'a>> {
    events
        .into_iter()
        .map(|event| match event {
            Event::Start(Tag::Link {
                link_type,
                dest_url,
                title,
                id,
            }) => {
                let dest_url = resolve_link(&dest_url, ctx)
                    .map(CowStr::from)
                    .unwrap_or(dest_url);
                Event::Start(Tag::Link {
                    link_type,
                    dest_url,
                    title,
                    id,
                })
            }
            Event::Start(Tag::Image {
                link_type,
                dest_url,
                title,
                id,
            }) => {
                let dest_url = resolve_link(&dest_url, ctx)
                    .map(CowStr::from)
                    .unwrap_or(dest_url);
                Event::Start(Tag::Image {
                    link_type,
                    dest_url,
                    title,
                    id,
                })
            }
            other => other,
        })
        .collect()
}

/// Map a relative link in the markdown source to its location in the
/// built site. Links to other pages point at the page URL, anything else
/// at the copied file.
fn resolve_link(dest: &str, ctx: &LinkContext<'_>) -> Option<String> {
    if dest.is_empty()
        || dest.starts_with('#')
        || dest.starts_with('/')
        || dest.contains("://")
        || dest.starts_with("mailto:")
        || dest.starts_with("data:")
    {
        return None;
    }

    let (path, fragment) = match dest.split_once('#') {
        Some((path, fragment)) => (path, Some(fragment)),
        None => (dest, None),
    };
    // Same-page anchors and directory links are left as written
    if path.is_empty() || path == "." || path.ends_with('/') {
        return None;
    }
    let page_dir = ctx.page.parent().unwrap_or(Path::new(""));
    let target = normalize_relative(&page_dir.join(path))?;

    let location = if is_markdown(&target) {
        match ctx.urls.get(&target) {
            Some(url) => url.clone(),
            None => {
                tracing::warn!(
                    page = %ctx.page.display(),
                    link = dest,
                    "link points to a page that is not part of the site"
                );
                return None;
            }
        }
    } else if ctx.docs_dir.join(&target).is_file() {
        target.to_string_lossy().replace('\\', "/")
    } else {
        return None;
    };

    let mut resolved = format!("{}/{}", ctx.base_url, location);
    if let Some(fragment) = fragment {
        resolved.push('#');
        resolved.push_str(fragment);
    }
    Some(resolved)
}

fn anchor_headings<'a>(
    events: Vec<Event<'a>>,
    options: &TocOptions,
    toc: &mut Vec<TocEntry>,
) -> Vec<Event<'a>> {
    // Explicit `{#id}`s are reserved up front so generated ids step around them
    let mut used: HashMap<String, usize> = events
        .iter()
        .filter_map(|event| match event {
            Event::Start(Tag::Heading { id: Some(id), .. }) => Some((id.to_string(), 0)),
            _ => None,
        })
        .collect();
    let mut explicit_seen = HashSet::new();
    let mut out = Vec::with_capacity(events.len());
    let mut iter = events.into_iter();

    while let Some(event) = iter.next() {
        let Event::Start(Tag::Heading {
            level,
            id,
            classes,
            attrs,
        }) = event
        else {
            out.push(event);
            continue;
        };

        let mut inner = Vec::new();
        for next in iter.by_ref() {
            if matches!(next, Event::End(TagEnd::Heading(_))) {
                break;
            }
            inner.push(next);
        }

        let text = plain_text(&inner).trim().to_string();
        let anchor = match id {
            Some(explicit) => {
                if !explicit_seen.insert(explicit.to_string()) {
                    tracing::warn!(id = %explicit, heading = %text, "heading id is used twice on this page");
                }
                explicit.to_string()
            }
            None => unique_id(slugify(&text), &mut used),
        };

        let depth = level as u8;
        if depth <= options.toc_depth {
            toc.push(TocEntry {
                level: depth,
                title: text,
                id: anchor.clone(),
            });
        }

        out.push(Event::Start(Tag::Heading {
            level,
            id: Some(CowStr::from(anchor.clone())),
            classes,
            attrs,
        }));
        out.extend(inner);
        if options.permalink {
            out.push(Event::InlineHtml(CowStr::from(format!(
                "<a class=\"headerlink\" href=\"#{}\" title=\"Permanent link\">&para;</a>",
                html_escape::encode_double_quoted_attribute(&anchor)
            ))));
        }
        out.push(Event::End(TagEnd::Heading(level)));
    }

    out
}

/// `intro`, `intro_1`, `intro_2`, ...
fn unique_id(base: String, used: &mut HashMap<String, usize>) -> String {
    let Some(mut n) = used.get(&base).copied() else {
        used.insert(base.clone(), 0);
        return base;
    };
    loop {
        n += 1;
        let candidate = format!("{base}_{n}");
        if !used.contains_key(&candidate) {
            used.insert(base, n);
            used.insert(candidate.clone(), 0);
            return candidate;
        }
    }
}

fn find_syntax(lang: &str) -> Option<&'static SyntaxReference> {
    if lang.is_empty() {
        return None;
    }
    SYNTAX_SET.find_syntax_by_token(lang).or_else(|| {
        // Fallback mappings for unsupported languages
        match lang {
            "nix" => SYNTAX_SET.find_syntax_by_name("JavaScript"),
            "toml" => SYNTAX_SET.find_syntax_by_name("YAML"),
            "py" | "pycon" => SYNTAX_SET.find_syntax_by_name("Python"),
            _ => None,
        }
    })
}

fn collect_code<'a>(iter: &mut impl Iterator<Item = Event<'a>>) -> String {
    let mut code = String::new();
    for event in iter.by_ref() {
        match event {
            Event::End(TagEnd::CodeBlock) => break,
            Event::Text(text) => code.push_str(&text),
            _ => {}
        }
    }
    code
}

fn highlight_code<'a>(events: Vec<Event<'a>>, options: &HighlightOptions) -> Vec<Event<'a>> {
    let Some(theme) = THEME_SET.themes.get(&options.theme) else {
        tracing::warn!(theme = %options.theme, "highlight theme not found, leaving code as is");
        return events;
    };

    let mut out = Vec::with_capacity(events.len());
    let mut iter = events.into_iter();

    while let Some(event) = iter.next() {
        match event {
            Event::Start(Tag::CodeBlock(CodeBlockKind::Fenced(info))) => {
                let lang = info.split_whitespace().next().unwrap_or_default().to_string();
                let Some(syntax) = find_syntax(&lang) else {
                    // Leave unknown languages for later stages.
                    out.push(Event::Start(Tag::CodeBlock(CodeBlockKind::Fenced(info))));
                    continue;
                };
                let code = collect_code(&mut iter);
                let highlighted = highlighted_html_for_string(&code, &SYNTAX_SET, syntax, theme)
                    .unwrap_or_else(|_| plain_code_block(&code, Some(&lang)));
                out.push(Event::Html(CowStr::from(format!(
                    "<div class=\"highlight\" data-lang=\"{}\">{}</div>\n",
                    html_escape::encode_double_quoted_attribute(&lang),
                    highlighted
                ))));
            }
            other => out.push(other),
        }
    }

    out
}

fn fence_code<'a>(events: Vec<Event<'a>>) -> Vec<Event<'a>> {
    let mut out = Vec::with_capacity(events.len());
    let mut iter = events.into_iter();

    while let Some(event) = iter.next() {
        match event {
            Event::Start(Tag::CodeBlock(CodeBlockKind::Fenced(info))) => {
                let (lang, title) = parse_fence_info(&info);
                let code = collect_code(&mut iter);
                let mut block = String::from("<div class=\"fenced-code\">");
                if let Some(title) = title {
                    block.push_str(&format!(
                        "<span class=\"filename\">{}</span>",
                        html_escape::encode_text(&title)
                    ));
                }
                block.push_str(&plain_code_block(&code, lang.as_deref()));
                block.push_str("</div>\n");
                out.push(Event::Html(CowStr::from(block)));
            }
            other => out.push(other),
        }
    }

    out
}

/// `python title="setup.py"` -> (Some("python"), Some("setup.py"))
fn parse_fence_info(info: &str) -> (Option<String>, Option<String>) {
    let lang = info
        .split_whitespace()
        .next()
        .filter(|token| !token.contains('='))
        .map(str::to_string);
    let title = info.find("title=\"").and_then(|start| {
        let rest = &info[start + "title=\"".len()..];
        rest.find('"').map(|end| rest[..end].to_string())
    });
    (lang, title)
}

fn plain_code_block(code: &str, lang: Option<&str>) -> String {
    match lang {
        Some(lang) if !lang.is_empty() => format!(
            "<pre><code class=\"language-{}\">{}</code></pre>\n",
            html_escape::encode_double_quoted_attribute(lang),
            html_escape::encode_text(code)
        ),
        _ => format!("<pre><code>{}</code></pre>\n", html_escape::encode_text(code)),
    }
}
