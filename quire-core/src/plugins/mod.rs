//! Build plugins.
//!
//! A plugin is declared in the site document by name, optionally with
//! options. Declarations are validated against each plugin's option schema
//! when the document loads; instances live for exactly one build.

pub mod apidoc;
pub mod python;
pub mod sitemap;

use std::path::{Path, PathBuf};

use serde::Deserialize;
use thiserror::Error;

use crate::config::{NamedEntry, RawNamedEntry, SiteConfig};
use crate::site::Page;

pub use apidoc::{ApiDoc, ApiDocOptions};
pub use sitemap::{Sitemap, SitemapOptions};

pub const KNOWN_PLUGINS: &[&str] = &["apidoc", "sitemap"];

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(try_from = "RawNamedEntry")]
pub enum PluginDeclaration {
    ApiDoc(ApiDocOptions),
    Sitemap(SitemapOptions),
}

impl TryFrom<RawNamedEntry> for PluginDeclaration {
    type Error = String;

    fn try_from(raw: RawNamedEntry) -> Result<Self, Self::Error> {
        let entry = NamedEntry::try_from(raw)?;
        match entry.name.as_str() {
            "apidoc" => Ok(PluginDeclaration::ApiDoc(entry.options()?)),
            "sitemap" => Ok(PluginDeclaration::Sitemap(entry.options()?)),
            other => Err(format!(
                "unknown plugin '{other}' (known: {})",
                KNOWN_PLUGINS.join(", ")
            )),
        }
    }
}

impl PluginDeclaration {
    pub fn name(&self) -> &'static str {
        match self {
            PluginDeclaration::ApiDoc(_) => "apidoc",
            PluginDeclaration::Sitemap(_) => "sitemap",
        }
    }

    /// Create the instance used for one build.
    pub fn instantiate(&self) -> Box<dyn Plugin> {
        match self {
            PluginDeclaration::ApiDoc(options) => Box::new(ApiDoc::new(options.clone())),
            PluginDeclaration::Sitemap(options) => Box::new(Sitemap::new(options.clone())),
        }
    }

    /// Paths outside the docs dir whose changes should trigger a rebuild,
    /// relative to the config file.
    pub fn watch_paths(&self) -> Vec<PathBuf> {
        match self {
            PluginDeclaration::ApiDoc(options) => options.watch.clone(),
            PluginDeclaration::Sitemap(_) => Vec::new(),
        }
    }
}

#[derive(Debug, Error)]
pub enum PluginError {
    #[error("{0}")]
    Message(String),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("command `{command}` failed: {status}")]
    Command { command: String, status: String },
    #[error("unknown identifier '{id}' in {}", page.display())]
    UnknownIdentifier { id: String, page: PathBuf },
    #[error("failed to parse {}: {message}", path.display())]
    Parse { path: PathBuf, message: String },
}

/// What a plugin can see of the build it takes part in.
pub struct PluginEnv<'a> {
    pub config: &'a SiteConfig,
    /// Directory holding the config file. Plugin paths resolve against it.
    pub project_dir: &'a Path,
}

/// A page that exists only because a plugin produced it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContributedPage {
    /// Virtual docs-relative markdown path; decides the output location.
    pub path: PathBuf,
    pub title: String,
    pub markdown: String,
}

/// State handed to `post_build` once every page is in the staging dir.
pub struct PostBuild<'a> {
    pub out_dir: &'a Path,
    pub pages: &'a [Page],
}

/// Build hooks. Every hook defaults to doing nothing.
pub trait Plugin {
    fn name(&self) -> &'static str;

    /// Runs before any markdown is parsed, in declaration order.
    fn pre_build(&mut self, _env: &PluginEnv<'_>) -> Result<(), PluginError> {
        Ok(())
    }

    /// Rewrites a page's markdown before the extension pipeline sees it.
    fn page_markdown(&self, _page: &Path, markdown: String) -> Result<String, PluginError> {
        Ok(markdown)
    }

    fn extra_pages(&self) -> Result<Vec<ContributedPage>, PluginError> {
        Ok(Vec::new())
    }

    fn post_build(&self, _env: &PluginEnv<'_>, _build: &PostBuild<'_>) -> Result<(), PluginError> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(yaml: &str) -> Result<PluginDeclaration, serde_yaml::Error> {
        serde_yaml::from_str(yaml)
    }

    #[test]
    fn bare_names_use_default_options() {
        let declaration = parse("sitemap").unwrap();
        assert_eq!(declaration, PluginDeclaration::Sitemap(SitemapOptions::default()));
        assert_eq!(declaration.instantiate().name(), "sitemap");
        assert!(declaration.watch_paths().is_empty());
    }

    #[test]
    fn options_are_typed() {
        let declaration = parse("apidoc:\n  watch: [src]\n  reference_pages: true\n").unwrap();
        let PluginDeclaration::ApiDoc(options) = &declaration else {
            panic!("expected apidoc, got {declaration:?}");
        };
        assert!(options.reference_pages);
        assert_eq!(declaration.watch_paths(), vec![PathBuf::from("src")]);
    }

    #[test]
    fn unknown_plugin_is_rejected() {
        let err = parse("search").unwrap_err().to_string();
        assert!(err.contains("unknown plugin 'search'"), "{err}");
    }

    #[test]
    fn sitemap_rejects_unknown_changefreq() {
        assert!(parse("sitemap:\n  changefreq: sometimes\n").is_err());
    }
}
