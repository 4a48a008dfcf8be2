//! Navigation tree: parsing from the site document, resolution against the
//! docs directory, and the menu handed to templates.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::{Component, Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::warn;
use walkdir::WalkDir;

#[derive(Debug, Error)]
pub enum NavError {
    #[error("nav entry points to a missing file: {}", .0.display())]
    MissingFile(PathBuf),
    #[error("nav entry {} is outside the docs directory", .0.display())]
    OutsideDocs(PathBuf),
    #[error("nav entry {} is not a markdown file", .0.display())]
    NotMarkdown(PathBuf),
    #[error("{} appears in the nav more than once", .0.display())]
    Duplicate(PathBuf),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// One entry of the navigation tree. Order is significant.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(try_from = "RawNavEntry")]
pub enum NavNode {
    /// A page. Without a title the page's first heading is used.
    Page { title: Option<String>, path: PathBuf },
    Section { title: String, children: Vec<NavNode> },
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RawNavEntry {
    Path(String),
    Titled(BTreeMap<String, RawNavTarget>),
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RawNavTarget {
    Path(String),
    Children(Vec<NavNode>),
}

impl TryFrom<RawNavEntry> for NavNode {
    type Error = String;

    fn try_from(raw: RawNavEntry) -> Result<Self, Self::Error> {
        match raw {
            RawNavEntry::Path(path) => Ok(NavNode::Page {
                title: None,
                path: PathBuf::from(path),
            }),
            RawNavEntry::Titled(map) => {
                if map.len() != 1 {
                    return Err(format!(
                        "a nav entry maps exactly one title, found {}",
                        map.len()
                    ));
                }
                let (title, target) = map
                    .into_iter()
                    .next()
                    .ok_or_else(|| "empty nav entry".to_string())?;
                Ok(match target {
                    RawNavTarget::Path(path) => NavNode::Page {
                        title: Some(title),
                        path: PathBuf::from(path),
                    },
                    RawNavTarget::Children(children) => NavNode::Section { title, children },
                })
            }
        }
    }
}

/// A page leaf of the nav, in nav order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NavLeaf {
    pub title: Option<String>,
    /// Path relative to the docs directory.
    pub path: PathBuf,
}

/// Flatten the tree into its page leaves, checking each one exists under
/// `docs_dir`.
pub fn resolve(nodes: &[NavNode], docs_dir: &Path) -> Result<Vec<NavLeaf>, NavError> {
    let mut leaves = Vec::new();
    let mut seen = HashSet::new();
    collect_leaves(nodes, docs_dir, &mut seen, &mut leaves)?;
    Ok(leaves)
}

fn collect_leaves(
    nodes: &[NavNode],
    docs_dir: &Path,
    seen: &mut HashSet<PathBuf>,
    leaves: &mut Vec<NavLeaf>,
) -> Result<(), NavError> {
    for node in nodes {
        match node {
            NavNode::Page { title, path } => {
                let path = normalize_relative(path)
                    .ok_or_else(|| NavError::OutsideDocs(path.clone()))?;
                if !is_markdown(&path) {
                    return Err(NavError::NotMarkdown(path));
                }
                if !docs_dir.join(&path).is_file() {
                    return Err(NavError::MissingFile(path));
                }
                if !seen.insert(path.clone()) {
                    return Err(NavError::Duplicate(path));
                }
                leaves.push(NavLeaf {
                    title: title.clone(),
                    path,
                });
            }
            NavNode::Section { children, .. } => {
                collect_leaves(children, docs_dir, seen, leaves)?;
            }
        }
    }
    Ok(())
}

/// Lexically normalize a docs-relative path, rejecting anything that
/// leaves the docs directory.
pub fn normalize_relative(path: &Path) -> Option<PathBuf> {
    let mut parts: Vec<&std::ffi::OsStr> = Vec::new();
    for component in path.components() {
        match component {
            Component::Normal(part) => parts.push(part),
            Component::CurDir => {}
            Component::ParentDir => {
                parts.pop()?;
            }
            Component::RootDir | Component::Prefix(_) => return None,
        }
    }
    if parts.is_empty() {
        return None;
    }
    Some(parts.iter().collect())
}

pub fn is_markdown(path: &Path) -> bool {
    path.extension()
        .map(|ext| ext.eq_ignore_ascii_case("md") || ext.eq_ignore_ascii_case("markdown"))
        .unwrap_or(false)
}

/// Derive a nav from the markdown files under `docs_dir`: `index.md` first,
/// then files and directories by name. Directories become sections.
pub fn discover(docs_dir: &Path) -> Result<Vec<NavNode>, NavError> {
    discover_dir(docs_dir, docs_dir)
}

fn discover_dir(docs_dir: &Path, dir: &Path) -> Result<Vec<NavNode>, NavError> {
    let mut index = None;
    let mut nodes = Vec::new();

    for entry in WalkDir::new(dir)
        .min_depth(1)
        .max_depth(1)
        .sort_by_file_name()
    {
        let entry = entry.map_err(|err| {
            NavError::Io(
                err.into_io_error()
                    .unwrap_or_else(|| std::io::Error::other("directory loop")),
            )
        })?;
        let name = entry.file_name().to_string_lossy();
        if name.starts_with('.') || name.starts_with('_') {
            continue;
        }

        let path = entry.path();
        let relative = path.strip_prefix(docs_dir).unwrap_or(path).to_path_buf();

        if entry.file_type().is_dir() {
            let children = discover_dir(docs_dir, path)?;
            if !children.is_empty() {
                nodes.push(NavNode::Section {
                    title: title_from_file_name(path),
                    children,
                });
            }
        } else if is_markdown(path) {
            if !is_index(path) {
                nodes.push(NavNode::Page {
                    title: None,
                    path: relative,
                });
                continue;
            }
            index = match index.take() {
                None => Some(relative),
                Some(kept) => {
                    let (kept, dropped) = if prefers_over(&relative, &kept) {
                        (relative, kept)
                    } else {
                        (kept, relative)
                    };
                    warn!(
                        kept = %kept.display(),
                        dropped = %dropped.display(),
                        "two index pages in one directory, leaving one out of the nav"
                    );
                    Some(kept)
                }
            };
        }
    }

    if let Some(path) = index {
        nodes.insert(0, NavNode::Page { title: None, path });
    }
    Ok(nodes)
}

/// `index.md` wins over `README.md` for the same directory.
fn prefers_over(candidate: &Path, kept: &Path) -> bool {
    let is_named_index = |path: &Path| {
        path.file_stem()
            .is_some_and(|stem| stem.eq_ignore_ascii_case("index"))
    };
    is_named_index(candidate) && !is_named_index(kept)
}

pub fn is_index(path: &Path) -> bool {
    path.file_stem()
        .map(|stem| stem.eq_ignore_ascii_case("index") || stem.eq_ignore_ascii_case("readme"))
        .unwrap_or(false)
}

/// `getting_started.md` -> `Getting started`
pub fn title_from_file_name(path: &Path) -> String {
    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_default();
    let words = stem.replace(['-', '_'], " ");
    let mut chars = words.trim().chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => "Untitled".to_string(),
    }
}

/// An entry of the rendered menu.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NavItem {
    pub title: String,
    /// Root-relative URL, `None` for sections.
    pub url: Option<String>,
    pub is_section: bool,
    pub active: bool,
    pub children: Vec<NavItem>,
}

/// Title and URL of a rendered page, keyed by docs-relative source path.
pub type PageIndex = HashMap<PathBuf, (String, String)>;

/// Build the menu in nav order. Pages missing from `pages` are skipped.
pub fn menu(nodes: &[NavNode], pages: &PageIndex) -> Vec<NavItem> {
    nodes
        .iter()
        .filter_map(|node| match node {
            NavNode::Page { path, .. } => {
                let path = normalize_relative(path)?;
                let (title, url) = pages.get(&path)?;
                Some(NavItem {
                    title: title.clone(),
                    url: Some(url.clone()),
                    is_section: false,
                    active: false,
                    children: Vec::new(),
                })
            }
            NavNode::Section { title, children } => Some(NavItem {
                title: title.clone(),
                url: None,
                is_section: true,
                active: false,
                children: menu(children, pages),
            }),
        })
        .collect()
}

/// Copy of the menu with the page at `url` and its ancestors marked active.
pub fn with_active(items: &[NavItem], url: &str) -> Vec<NavItem> {
    items
        .iter()
        .map(|item| {
            let children = with_active(&item.children, url);
            let active = item.url.as_deref() == Some(url) || children.iter().any(|c| c.active);
            NavItem {
                active,
                children,
                ..item.clone()
            }
        })
        .collect()
}
