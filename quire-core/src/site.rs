use std::path::{Path, PathBuf};

use serde::Serialize;

use crate::nav::{NavItem, is_index};

/// Where a rendered page came from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", content = "name", rename_all = "lowercase")]
pub enum PageOrigin {
    /// A markdown file listed in the nav.
    Docs,
    /// A page contributed by the named plugin.
    Plugin(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Page {
    pub title: String,
    /// Docs-relative markdown path (virtual for plugin pages).
    pub path: PathBuf,
    /// Output file relative to the site root.
    pub out_path: PathBuf,
    /// Root-relative URL, `""` for the home page.
    pub url: String,
    pub origin: PageOrigin,
}

impl Page {
    pub fn new(title: String, path: PathBuf, origin: PageOrigin, use_directory_urls: bool) -> Self {
        let out_path = out_path(&path, use_directory_urls);
        let url = url_for(&out_path);
        Self {
            title,
            path,
            out_path,
            url,
            origin,
        }
    }

    pub fn is_homepage(&self) -> bool {
        self.out_path == Path::new("index.html")
    }

    /// Relative path from this page back to the site root, e.g. `..`.
    pub fn base_url(&self) -> String {
        base_url(&self.out_path)
    }
}

/// Relative path from an output file back to the site root.
pub fn base_url(out_path: &Path) -> String {
    let depth = out_path.components().count().saturating_sub(1);
    if depth == 0 {
        ".".to_string()
    } else {
        vec![".."; depth].join("/")
    }
}

/// `index.md` -> `index.html`, `a/b.md` -> `a/b/index.html`
/// (or `a/b.html` without directory URLs).
pub fn out_path(source: &Path, use_directory_urls: bool) -> PathBuf {
    if is_index(source) {
        return source.with_file_name("index.html");
    }
    if use_directory_urls {
        source.with_extension("").join("index.html")
    } else {
        source.with_extension("html")
    }
}

/// URL of an output file relative to the site root, using `/` separators.
pub fn url_for(out_path: &Path) -> String {
    let parts: Vec<String> = out_path
        .components()
        .map(|c| c.as_os_str().to_string_lossy().to_string())
        .collect();
    match parts.split_last() {
        Some((file, dirs)) if file == "index.html" => {
            if dirs.is_empty() {
                String::new()
            } else {
                format!("{}/", dirs.join("/"))
            }
        }
        _ => parts.join("/"),
    }
}

/// What a successful build produced.
#[derive(Debug, Clone, Serialize)]
pub struct SiteOutput {
    pub output_dir: PathBuf,
    /// Nav pages in nav order, followed by plugin pages.
    pub pages: Vec<Page>,
    /// Non-page files copied or generated, relative to the site root.
    pub assets: Vec<PathBuf>,
    pub nav: Vec<NavItem>,
}

impl SiteOutput {
    pub fn page_count(&self) -> usize {
        self.pages.len()
    }
}
