//! Markdown extensions named in `markdown_extensions`.
//!
//! Each extension belongs to one stage of the pipeline. Parser toggles are
//! plain `pulldown_cmark` options. Source transforms rewrite the markdown
//! text before parsing. Event transforms rewrite the parsed event stream.
//! Source and event transforms run in the order they are listed.

use std::collections::HashSet;

use pulldown_cmark::Options;
use serde::Deserialize;
use thiserror::Error;

use crate::config::{NamedEntry, RawNamedEntry};

pub const DEFAULT_HIGHLIGHT_THEME: &str = "base16-ocean.dark";

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(try_from = "RawNamedEntry")]
pub enum Extension {
    Tables,
    Footnotes,
    Strikethrough,
    TaskList,
    DefList,
    Smarty,
    AttrList,
    Math,
    Admonition,
    Toc(TocOptions),
    Highlight(HighlightOptions),
    FencedCode,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct TocOptions {
    /// Append a `¶` anchor to every heading.
    pub permalink: bool,
    /// Deepest heading level listed in the page's table of contents.
    pub toc_depth: u8,
}

impl Default for TocOptions {
    fn default() -> Self {
        Self {
            permalink: false,
            toc_depth: 3,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct HighlightOptions {
    /// A syntect theme from the default theme set.
    pub theme: String,
}

impl Default for HighlightOptions {
    fn default() -> Self {
        Self {
            theme: DEFAULT_HIGHLIGHT_THEME.to_string(),
        }
    }
}

pub const KNOWN_EXTENSIONS: &[&str] = &[
    "tables",
    "footnotes",
    "strikethrough",
    "tasklist",
    "def_list",
    "smarty",
    "attr_list",
    "math",
    "admonition",
    "toc",
    "highlight",
    "fenced_code",
];

impl TryFrom<RawNamedEntry> for Extension {
    type Error = String;

    fn try_from(raw: RawNamedEntry) -> Result<Self, Self::Error> {
        let entry = NamedEntry::try_from(raw)?;
        let takes_no_options = |ext: Extension| -> Result<Extension, String> {
            match &entry.options {
                serde_json::Value::Object(map) if map.is_empty() => Ok(ext),
                _ => Err(format!("markdown extension '{}' takes no options", entry.name)),
            }
        };

        match entry.name.as_str() {
            "tables" => takes_no_options(Extension::Tables),
            "footnotes" => takes_no_options(Extension::Footnotes),
            "strikethrough" => takes_no_options(Extension::Strikethrough),
            "tasklist" => takes_no_options(Extension::TaskList),
            "def_list" => takes_no_options(Extension::DefList),
            "smarty" => takes_no_options(Extension::Smarty),
            "attr_list" => takes_no_options(Extension::AttrList),
            "math" => takes_no_options(Extension::Math),
            "admonition" => takes_no_options(Extension::Admonition),
            "fenced_code" => takes_no_options(Extension::FencedCode),
            "toc" => Ok(Extension::Toc(entry.options()?)),
            "highlight" => {
                let options: HighlightOptions = entry.options()?;
                if !crate::markdown::highlight_theme_exists(&options.theme) {
                    return Err(format!("unknown highlight theme '{}'", options.theme));
                }
                Ok(Extension::Highlight(options))
            }
            other => Err(format!(
                "unknown markdown extension '{other}' (known: {})",
                KNOWN_EXTENSIONS.join(", ")
            )),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Parser(Options),
    Source,
    Event,
}

impl Extension {
    pub fn name(&self) -> &'static str {
        match self {
            Extension::Tables => "tables",
            Extension::Footnotes => "footnotes",
            Extension::Strikethrough => "strikethrough",
            Extension::TaskList => "tasklist",
            Extension::DefList => "def_list",
            Extension::Smarty => "smarty",
            Extension::AttrList => "attr_list",
            Extension::Math => "math",
            Extension::Admonition => "admonition",
            Extension::Toc(_) => "toc",
            Extension::Highlight(_) => "highlight",
            Extension::FencedCode => "fenced_code",
        }
    }

    pub fn stage(&self) -> Stage {
        match self {
            Extension::Tables => Stage::Parser(Options::ENABLE_TABLES),
            Extension::Footnotes => Stage::Parser(Options::ENABLE_FOOTNOTES),
            Extension::Strikethrough => Stage::Parser(Options::ENABLE_STRIKETHROUGH),
            Extension::TaskList => Stage::Parser(Options::ENABLE_TASKLISTS),
            Extension::DefList => Stage::Parser(Options::ENABLE_DEFINITION_LIST),
            Extension::Smarty => Stage::Parser(Options::ENABLE_SMART_PUNCTUATION),
            Extension::AttrList => Stage::Parser(Options::ENABLE_HEADING_ATTRIBUTES),
            Extension::Math => Stage::Parser(Options::ENABLE_MATH),
            Extension::Admonition => Stage::Source,
            Extension::Toc(_) | Extension::Highlight(_) | Extension::FencedCode => Stage::Event,
        }
    }
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("markdown extension '{second}' cannot follow '{first}': {reason}")]
pub struct ExtensionConflict {
    pub first: String,
    pub second: String,
    pub reason: String,
}

/// Pairs where `first` listed before `second` leaves `second` nothing to do.
const ORDERING_RULES: &[(&str, &str, &str)] = &[(
    "fenced_code",
    "highlight",
    "fenced_code renders every fenced block before highlighting can see it",
)];

/// Check that the listed extensions compose in the given order.
pub fn check_order(extensions: &[Extension]) -> Result<(), ExtensionConflict> {
    let mut seen = HashSet::new();
    for ext in extensions {
        if !seen.insert(ext.name()) {
            return Err(ExtensionConflict {
                first: ext.name().to_string(),
                second: ext.name().to_string(),
                reason: "listed more than once".to_string(),
            });
        }
    }

    for (i, earlier) in extensions.iter().enumerate() {
        for later in &extensions[i + 1..] {
            if let Some((_, _, reason)) = ORDERING_RULES
                .iter()
                .find(|(first, second, _)| *first == earlier.name() && *second == later.name())
            {
                return Err(ExtensionConflict {
                    first: earlier.name().to_string(),
                    second: later.name().to_string(),
                    reason: reason.to_string(),
                });
            }
        }
    }
    Ok(())
}

/// Turn `!!! kind "Title"` blocks with a four-space indented body into
/// admonition markup. Bodies are transformed recursively; fenced code
/// outside admonitions is left alone.
pub fn admonitions(source: &str) -> String {
    let lines: Vec<&str> = source.lines().collect();
    let mut out = String::with_capacity(source.len());
    let mut fence: Option<&str> = None;
    let mut i = 0;

    while i < lines.len() {
        let line = lines[i];
        let trimmed = line.trim_start();

        if let Some(marker) = fence {
            if trimmed.starts_with(marker) {
                fence = None;
            }
            push_line(&mut out, line);
            i += 1;
            continue;
        }
        if trimmed.starts_with("```") || trimmed.starts_with("~~~") {
            fence = Some(&trimmed[..3]);
            push_line(&mut out, line);
            i += 1;
            continue;
        }

        let Some((kind, title)) = parse_admonition_header(line) else {
            push_line(&mut out, line);
            i += 1;
            continue;
        };

        i += 1;
        let mut body: Vec<&str> = Vec::new();
        while i < lines.len() {
            let next = lines[i];
            if next.trim().is_empty() {
                body.push("");
            } else if let Some(rest) = next.strip_prefix("    ").or_else(|| next.strip_prefix('\t')) {
                body.push(rest);
            } else {
                break;
            }
            i += 1;
        }
        while body.last().is_some_and(|l| l.is_empty()) {
            body.pop();
        }

        out.push_str(&format!(
            "<div class=\"admonition {}\">\n",
            html_escape::encode_double_quoted_attribute(&kind)
        ));
        if let Some(title) = title {
            out.push_str(&format!(
                "<p class=\"admonition-title\">{}</p>\n",
                html_escape::encode_text(&title)
            ));
        }
        out.push('\n');
        let inner = admonitions(&body.join("\n"));
        if !inner.is_empty() {
            out.push_str(&inner);
            if !inner.ends_with('\n') {
                out.push('\n');
            }
            out.push('\n');
        }
        out.push_str("</div>\n");
        if i < lines.len() {
            out.push('\n');
        }
    }

    out
}

fn push_line(out: &mut String, line: &str) {
    out.push_str(line);
    out.push('\n');
}

/// `!!! note` -> ("note", Some("Note")), `!!! tip "Careful"` ->
/// ("tip", Some("Careful")), `!!! tip ""` -> ("tip", None).
fn parse_admonition_header(line: &str) -> Option<(String, Option<String>)> {
    let rest = line.strip_prefix("!!!")?;
    if !rest.starts_with(char::is_whitespace) {
        return None;
    }
    let rest = rest.trim();
    let (kind, title) = match rest.find(char::is_whitespace) {
        Some(pos) => (&rest[..pos], rest[pos..].trim()),
        None => (rest, ""),
    };
    if kind.is_empty() || !kind.chars().all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_') {
        return None;
    }
    let kind = kind.to_ascii_lowercase();

    let title = if title.is_empty() {
        let mut chars = kind.chars();
        chars
            .next()
            .map(|first| first.to_uppercase().chain(chars).collect())
    } else {
        let unquoted = title
            .strip_prefix('"')
            .and_then(|t| t.strip_suffix('"'))
            .unwrap_or(title);
        if unquoted.is_empty() {
            None
        } else {
            Some(unquoted.to_string())
        }
    };

    Some((kind, title))
}
