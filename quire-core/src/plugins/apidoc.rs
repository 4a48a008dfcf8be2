//! API reference pages from Python docstrings.
//!
//! A line of the form `::: dotted.identifier` in any page is replaced by
//! the rendered documentation of that module, class, function or method.

use std::path::{Path, PathBuf};
use std::process::Command;

use serde::Deserialize;
use tracing::{debug, info};

use super::python::{ModuleIndex, ObjectKind, PyObject};
use super::{ContributedPage, Plugin, PluginEnv, PluginError};

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ApiDocOptions {
    /// Extra paths `serve` watches, relative to the config file.
    pub watch: Vec<PathBuf>,
    pub handlers: Handlers,
    /// Contribute one `reference/<module>` page per indexed module.
    pub reference_pages: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Handlers {
    pub python: PythonHandler,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PythonHandler {
    /// Source roots, relative to the config file.
    pub paths: Vec<PathBuf>,
    /// Run in order before scanning, each as one argument to `interpreter`.
    pub setup_commands: Vec<String>,
    pub interpreter: Vec<String>,
    pub show_source: bool,
    pub include_private: bool,
}

impl Default for PythonHandler {
    fn default() -> Self {
        Self {
            paths: vec![PathBuf::from(".")],
            setup_commands: Vec::new(),
            interpreter: vec!["sh".to_string(), "-c".to_string()],
            show_source: false,
            include_private: false,
        }
    }
}

pub struct ApiDoc {
    options: ApiDocOptions,
    index: ModuleIndex,
}

impl ApiDoc {
    pub fn new(options: ApiDocOptions) -> Self {
        Self {
            options,
            index: ModuleIndex::default(),
        }
    }

    fn run_setup_commands(&self, project_dir: &Path) -> Result<(), PluginError> {
        let handler = &self.options.handlers.python;
        if handler.setup_commands.is_empty() {
            return Ok(());
        }
        let (program, args) = handler.interpreter.split_first().ok_or_else(|| {
            PluginError::Message("handlers.python.interpreter must name a program".to_string())
        })?;

        for command in &handler.setup_commands {
            info!(command = %command, "running setup command");
            let status = Command::new(program)
                .args(args)
                .arg(command)
                .current_dir(project_dir)
                .status()
                .map_err(|err| PluginError::Message(format!("failed to run `{command}`: {err}")))?;
            if !status.success() {
                return Err(PluginError::Command {
                    command: command.clone(),
                    status: status.to_string(),
                });
            }
        }
        Ok(())
    }

    /// Markdown for one identifier at the given heading level.
    fn render(&self, object: &PyObject, level: usize, out: &mut String) {
        let show_heading = object.kind != ObjectKind::Module;
        let kind = match object.kind {
            ObjectKind::Module => "module",
            ObjectKind::Class => "class",
            ObjectKind::Function => "function",
            ObjectKind::Method => "method",
        };

        out.push_str(&format!("<div class=\"api-object api-{kind}\" id=\"{}\">\n\n", object.id));
        if show_heading {
            out.push_str(&format!("{} `{}`\n\n", "#".repeat(level), object.name()));
        }
        if let Some(signature) = &object.signature {
            push_code_block(out, "python", signature);
        }
        if let Some(docstring) = &object.docstring {
            out.push_str(&google_sections(docstring));
            out.push_str("\n\n");
        }
        if self.options.handlers.python.show_source
            && let Some(source) = &object.source
        {
            out.push_str(&format!(
                "<details class=\"source\">\n<summary>Source code in <code>{}</code>, line {}</summary>\n\n",
                object.file.display(),
                object.line
            ));
            push_code_block(out, "python", source);
            out.push_str("</details>\n\n");
        }

        let child_level = if show_heading { level + 1 } else { level };
        for member in self.index.members(&object.id) {
            self.render(member, child_level.min(6), out);
        }
        out.push_str("</div>\n\n");
    }

    fn expand(&self, id: &str) -> Option<String> {
        let object = self.index.get(id)?;
        let mut out = String::new();
        self.render(object, 2, &mut out);
        Some(out)
    }
}

impl Plugin for ApiDoc {
    fn name(&self) -> &'static str {
        "apidoc"
    }

    fn pre_build(&mut self, env: &PluginEnv<'_>) -> Result<(), PluginError> {
        self.run_setup_commands(env.project_dir)?;

        let handler = &self.options.handlers.python;
        let roots: Vec<PathBuf> = handler
            .paths
            .iter()
            .map(|path| env.project_dir.join(path))
            .collect();
        self.index = ModuleIndex::scan(&roots, handler.include_private)?;
        info!(objects = self.index.len(), "indexed python api");
        Ok(())
    }

    fn page_markdown(&self, page: &Path, markdown: String) -> Result<String, PluginError> {
        if !markdown.contains(":::") {
            return Ok(markdown);
        }

        let mut out = String::with_capacity(markdown.len());
        let mut fence: Option<String> = None;
        for line in markdown.lines() {
            let trimmed = line.trim_start();
            if let Some(open) = &fence {
                if trimmed.starts_with(open.as_str()) {
                    fence = None;
                }
            } else if let Some(marker) = fence_marker(trimmed) {
                fence = Some(marker);
            } else if let Some(id) = trimmed.strip_prefix(":::") {
                let id = id.trim();
                debug!(page = %page.display(), id, "expanding api reference");
                let rendered = self.expand(id).ok_or_else(|| PluginError::UnknownIdentifier {
                    id: id.to_string(),
                    page: page.to_path_buf(),
                })?;
                out.push_str(&rendered);
                continue;
            }
            out.push_str(line);
            out.push('\n');
        }
        Ok(out)
    }

    fn extra_pages(&self) -> Result<Vec<ContributedPage>, PluginError> {
        if !self.options.reference_pages {
            return Ok(Vec::new());
        }
        Ok(self
            .index
            .modules()
            .map(|module| ContributedPage {
                path: PathBuf::from("reference").join(format!("{}.md", module.id)),
                title: module.id.clone(),
                markdown: format!("# {}\n\n::: {}\n", module.id, module.id),
            })
            .collect())
    }
}

fn fence_marker(line: &str) -> Option<String> {
    let ch = line.chars().next().filter(|c| *c == '`' || *c == '~')?;
    let len = line.chars().take_while(|c| *c == ch).count();
    (len >= 3).then(|| ch.to_string().repeat(len))
}

fn push_code_block(out: &mut String, lang: &str, code: &str) {
    let longest = code
        .split(|c| c != '`')
        .map(str::len)
        .max()
        .unwrap_or(0);
    let fence = "`".repeat(longest.max(2) + 1);
    out.push_str(&format!("{fence}{lang}\n{}\n{fence}\n\n", code.trim_end()));
}

#[derive(Clone, Copy)]
enum Section {
    Items(&'static str),
    Text(&'static str),
}

fn section(header: &str) -> Option<Section> {
    Some(match header {
        "Args" | "Arguments" | "Parameters" | "Params" => Section::Items("Parameters"),
        "Attributes" => Section::Items("Attributes"),
        "Raises" | "Exceptions" => Section::Items("Raises"),
        "Returns" | "Return" => Section::Items("Returns"),
        "Yields" | "Yield" => Section::Items("Yields"),
        "Example" | "Examples" => Section::Text("Examples"),
        "Note" | "Notes" => Section::Text("Note"),
        "Warning" | "Warnings" => Section::Text("Warning"),
        "See Also" => Section::Text("See also"),
        _ => return None,
    })
}

fn indent_of(line: &str) -> usize {
    line.len() - line.trim_start_matches(' ').len()
}

/// Turn Google-style docstring sections into markdown lists.
pub fn google_sections(docstring: &str) -> String {
    let lines: Vec<&str> = docstring.lines().collect();
    let mut out: Vec<String> = Vec::new();
    let mut i = 0;

    while i < lines.len() {
        let line = lines[i];
        let header = line.trim().strip_suffix(':').and_then(section);
        let Some(kind) = header else {
            out.push(line.to_string());
            i += 1;
            continue;
        };

        let indent = indent_of(line);
        let mut end = i + 1;
        let mut body_end = end;
        while end < lines.len() && (lines[end].trim().is_empty() || indent_of(lines[end]) > indent) {
            end += 1;
            if !lines[end - 1].trim().is_empty() {
                body_end = end;
            }
        }
        let body = &lines[i + 1..body_end];

        match kind {
            Section::Items(label) => {
                out.push(format!("**{label}:**"));
                out.push(String::new());
                out.extend(items(body).into_iter().map(|item| render_item(&item)));
            }
            Section::Text(label) => {
                out.push(format!("**{label}:**"));
                let margin = body
                    .iter()
                    .filter(|l| !l.trim().is_empty())
                    .map(|l| indent_of(l))
                    .min()
                    .unwrap_or(0);
                if !body.is_empty() {
                    out.push(String::new());
                }
                out.extend(body.iter().map(|l| l.get(margin..).unwrap_or("").to_string()));
            }
        }
        if lines.get(body_end).is_some_and(|next| !next.trim().is_empty()) {
            out.push(String::new());
        }
        i = body_end;
    }

    while out.last().is_some_and(|line| line.is_empty()) {
        out.pop();
    }
    out.join("\n")
}

/// Entries of a section body: each starts at the body's shallowest
/// indent, deeper lines continue the previous entry.
fn items(body: &[&str]) -> Vec<String> {
    let margin = body
        .iter()
        .filter(|l| !l.trim().is_empty())
        .map(|l| indent_of(l))
        .min()
        .unwrap_or(0);
    let mut entries: Vec<String> = Vec::new();
    for line in body.iter().filter(|l| !l.trim().is_empty()) {
        match entries.last_mut() {
            Some(entry) if indent_of(line) > margin => {
                entry.push(' ');
                entry.push_str(line.trim());
            }
            _ => entries.push(line.trim().to_string()),
        }
    }
    entries
}

/// `name (type): description` -> ``- `name` (`type`): description``.
/// Entries without a single-word name (plain `Returns:` prose) stay as text.
fn render_item(entry: &str) -> String {
    let Some((head, description)) = entry.split_once(':') else {
        return format!("- {entry}");
    };
    let head = head.trim();
    let description = description.trim();

    if let Some((name, ty)) = head.split_once('(')
        && let Some(ty) = ty.strip_suffix(')')
        && is_word(name.trim())
    {
        return format!("- `{}` (`{}`): {description}", name.trim(), ty.trim());
    }
    if !is_word(head) {
        return format!("- {entry}");
    }
    format!("- `{head}`: {description}")
}

fn is_word(text: &str) -> bool {
    !text.is_empty() && !text.contains(char::is_whitespace)
}
