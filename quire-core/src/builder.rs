//! The `build` operation: a site document and a docs directory in, a
//! static site out.
//!
//! Everything is rendered into a staging directory next to the site dir.
//! Only a fully successful build replaces the published site, so a
//! failure at any step leaves the previous site as it was.

use std::collections::HashMap;
use std::fs;
use std::path::{Component, Path, PathBuf};

use serde::Serialize;
use tempfile::TempDir;
use thiserror::Error;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use crate::config::{ConfigError, SiteConfig};
use crate::extensions::ExtensionConflict;
use crate::markdown::{LinkContext, Pipeline, RenderedMarkdown, TocEntry};
use crate::nav::{self, NavError, NavItem, PageIndex};
use crate::plugins::{Plugin, PluginDeclaration, PluginEnv, PluginError, PostBuild};
use crate::renderer::{RenderContext, Renderer};
use crate::site::{self, Page, PageOrigin, SiteOutput};
use crate::template::TemplateError;
use crate::theme::{self, Palette, Theme, ThemeError};

const PAGE_TEMPLATE: &str = "main.html";
const STAGING_PREFIX: &str = ".quire-staging-";
const PREVIOUS_PREFIX: &str = ".quire-previous-";

#[derive(Debug, Error)]
pub enum BuildError {
    #[error("malformed config: {0}")]
    MalformedConfig(String),
    #[error("missing file: {}", path.display())]
    MissingFile { path: PathBuf },
    #[error("unknown theme '{name}' (known themes: {known})")]
    UnknownTheme { name: String, known: String },
    #[error("unknown {role} palette color '{color}'")]
    UnknownPaletteColor { role: String, color: String },
    #[error("plugin '{plugin}' failed: {message}")]
    PluginFailure { plugin: String, message: String },
    #[error(transparent)]
    ExtensionConflict(#[from] ExtensionConflict),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Template(#[from] TemplateError),
}

impl From<ThemeError> for BuildError {
    fn from(err: ThemeError) -> Self {
        match err {
            ThemeError::UnknownTheme { name, known } => BuildError::UnknownTheme { name, known },
            ThemeError::UnknownColor { role, color } => BuildError::UnknownPaletteColor {
                role: role.to_string(),
                color,
            },
        }
    }
}

/// A document that cannot be loaded is reported like any other bad config.
impl From<ConfigError> for BuildError {
    fn from(err: ConfigError) -> Self {
        match err {
            ConfigError::Io { path, source } if source.kind() == std::io::ErrorKind::NotFound => {
                BuildError::MissingFile { path }
            }
            ConfigError::Io { source, .. } => BuildError::Io(source),
            other => BuildError::MalformedConfig(other.to_string()),
        }
    }
}

impl From<NavError> for BuildError {
    fn from(err: NavError) -> Self {
        match err {
            NavError::MissingFile(path) => BuildError::MissingFile { path },
            NavError::Io(err) => BuildError::Io(err),
            other => BuildError::MalformedConfig(other.to_string()),
        }
    }
}

fn plugin_failure(plugin: &dyn Plugin, err: PluginError) -> BuildError {
    BuildError::PluginFailure {
        plugin: plugin.name().to_string(),
        message: err.to_string(),
    }
}

/// Build the site described by `config` from the markdown under
/// `source_root` into the config's site dir.
pub fn build(config: &SiteConfig, source_root: &Path) -> Result<SiteOutput, BuildError> {
    SiteBuilder::new(config).source_dir(source_root).build()
}

pub struct SiteBuilder<'a> {
    config: &'a SiteConfig,
    source_dir: Option<PathBuf>,
    output_dir: Option<PathBuf>,
    livereload_url: Option<String>,
}

impl<'a> SiteBuilder<'a> {
    pub fn new(config: &'a SiteConfig) -> Self {
        Self {
            config,
            source_dir: None,
            output_dir: None,
            livereload_url: None,
        }
    }

    // Paths, defaulting to the config's docs_dir and site_dir
    pub fn source_dir<P: AsRef<Path>>(mut self, path: P) -> Self {
        self.source_dir = Some(path.as_ref().to_path_buf());
        self
    }

    pub fn output_dir<P: AsRef<Path>>(mut self, path: P) -> Self {
        self.output_dir = Some(path.as_ref().to_path_buf());
        self
    }

    /// Inject the live reload script, pointing at this websocket URL.
    pub fn livereload<S: Into<String>>(mut self, url: S) -> Self {
        self.livereload_url = Some(url.into());
        self
    }

    pub fn build(self) -> Result<SiteOutput, BuildError> {
        let config = self.config;
        let docs_dir = self.source_dir.unwrap_or_else(|| config.docs_dir());
        let site_dir = self.output_dir.unwrap_or_else(|| config.site_dir());
        let project_dir = config.config_dir();
        info!(docs = %docs_dir.display(), site = %site_dir.display(), "building site");

        // Everything that can be checked without side effects goes first.
        let theme = theme::find(&config.theme.name)?;
        let palette = Palette::resolve(&config.theme.palette)?;
        let pipeline = Pipeline::new(&config.markdown_extensions)?;
        if !docs_dir.is_dir() {
            return Err(BuildError::MissingFile { path: docs_dir });
        }
        let assets = ThemeAssets::resolve(config, &docs_dir)?;
        let custom_dir = config.custom_dir();
        if let Some(dir) = &custom_dir
            && !dir.is_dir()
        {
            return Err(BuildError::MissingFile { path: dir.clone() });
        }
        check_site_dir(&docs_dir, &site_dir)?;

        let nav_nodes = match &config.nav {
            Some(nodes) => nodes.clone(),
            None => nav::discover(&docs_dir)?,
        };
        let leaves = nav::resolve(&nav_nodes, &docs_dir)?;
        if leaves.is_empty() {
            warn!(docs = %docs_dir.display(), "no markdown pages to build");
        }

        let env = PluginEnv {
            config,
            project_dir: &project_dir,
        };
        let mut plugins: Vec<Box<dyn Plugin>> = config
            .plugins
            .iter()
            .map(PluginDeclaration::instantiate)
            .collect();
        for plugin in &mut plugins {
            debug!(plugin = plugin.name(), "running pre_build");
            plugin
                .pre_build(&env)
                .map_err(|err| plugin_failure(plugin.as_ref(), err))?;
        }

        let mut sources = Vec::with_capacity(leaves.len());
        for leaf in leaves {
            let markdown = fs::read_to_string(docs_dir.join(&leaf.path))?;
            sources.push(Source {
                path: leaf.path,
                title: leaf.title,
                markdown,
                origin: PageOrigin::Docs,
            });
        }
        for plugin in &plugins {
            let contributed = plugin
                .extra_pages()
                .map_err(|err| plugin_failure(plugin.as_ref(), err))?;
            for page in contributed {
                let path = nav::normalize_relative(&page.path)
                    .filter(|path| nav::is_markdown(path))
                    .ok_or_else(|| BuildError::PluginFailure {
                        plugin: plugin.name().to_string(),
                        message: format!("contributed page {} is not a docs-relative markdown path", page.path.display()),
                    })?;
                sources.push(Source {
                    path,
                    title: Some(page.title),
                    markdown: page.markdown,
                    origin: PageOrigin::Plugin(plugin.name().to_string()),
                });
            }
        }

        let urls = page_urls(&sources, config.use_directory_urls)?;

        let mut rendered = Vec::with_capacity(sources.len());
        for source in sources {
            let mut markdown = source.markdown;
            for plugin in &plugins {
                markdown = plugin
                    .page_markdown(&source.path, markdown)
                    .map_err(|err| plugin_failure(plugin.as_ref(), err))?;
            }

            let out_path = site::out_path(&source.path, config.use_directory_urls);
            let base_url = site::base_url(&out_path);
            let html = pipeline.render(
                &markdown,
                Some(&LinkContext {
                    page: &source.path,
                    urls: &urls,
                    base_url: &base_url,
                    docs_dir: &docs_dir,
                }),
            );
            let title = source
                .title
                .or_else(|| html.title.clone())
                .unwrap_or_else(|| nav::title_from_file_name(&source.path));
            debug!(page = %source.path.display(), title = %title, "rendered markdown");

            let page = Page::new(title, source.path, source.origin, config.use_directory_urls);
            rendered.push((page, html));
        }

        let page_index: PageIndex = rendered
            .iter()
            .filter(|(page, _)| page.origin == PageOrigin::Docs)
            .map(|(page, _)| (page.path.clone(), (page.title.clone(), page.url.clone())))
            .collect();
        let menu = nav::menu(&nav_nodes, &page_index);

        let mut renderer = Renderer::new(theme, custom_dir.as_deref())?;
        set_globals(&mut renderer, config, theme, palette, &assets, self.livereload_url.as_deref());
        let staging = staging_dir(&site_dir)?;
        render_pages(&renderer, &rendered, &menu, staging.path())?;

        let mut copied = vec![PathBuf::from(theme.stylesheet_path())];
        let stylesheet = staging.path().join(theme.stylesheet_path());
        if let Some(parent) = stylesheet.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&stylesheet, theme.stylesheet)?;
        copied.extend(copy_static_files(&docs_dir, staging.path())?);

        let pages: Vec<Page> = rendered.into_iter().map(|(page, _)| page).collect();
        let post = PostBuild {
            out_dir: staging.path(),
            pages: &pages,
        };
        for plugin in &plugins {
            debug!(plugin = plugin.name(), "running post_build");
            plugin
                .post_build(&env, &post)
                .map_err(|err| plugin_failure(plugin.as_ref(), err))?;
        }
        drop(plugins);

        publish(staging, &site_dir)?;
        info!(pages = pages.len(), assets = copied.len(), site = %site_dir.display(), "site built");

        Ok(SiteOutput {
            output_dir: site_dir,
            pages,
            assets: copied,
            nav: menu,
        })
    }
}

/// A page waiting to be rendered.
struct Source {
    path: PathBuf,
    title: Option<String>,
    markdown: String,
    origin: PageOrigin,
}

/// URL of every page keyed by source path. Two pages landing on the same
/// output file is an error.
fn page_urls(sources: &[Source], use_directory_urls: bool) -> Result<HashMap<PathBuf, String>, BuildError> {
    let mut owners: HashMap<PathBuf, &Source> = HashMap::new();
    let mut urls = HashMap::new();
    for source in sources {
        let out_path = site::out_path(&source.path, use_directory_urls);
        if let Some(existing) = owners.get(&out_path) {
            let message = format!(
                "{} and {} both render to {}",
                existing.path.display(),
                source.path.display(),
                out_path.display()
            );
            return Err(match &source.origin {
                PageOrigin::Plugin(plugin) => BuildError::PluginFailure {
                    plugin: plugin.clone(),
                    message,
                },
                PageOrigin::Docs => BuildError::MalformedConfig(message),
            });
        }
        urls.insert(source.path.clone(), site::url_for(&out_path));
        owners.insert(out_path, source);
    }
    Ok(urls)
}

/// Logo, favicon and extra stylesheets, as docs-relative paths that exist.
struct ThemeAssets {
    logo: Option<PathBuf>,
    favicon: Option<PathBuf>,
    extra_css: Vec<PathBuf>,
}

impl ThemeAssets {
    fn resolve(config: &SiteConfig, docs_dir: &Path) -> Result<Self, BuildError> {
        let check = |path: &Path| -> Result<PathBuf, BuildError> {
            let relative = nav::normalize_relative(path).ok_or_else(|| {
                BuildError::MalformedConfig(format!(
                    "{} must be a path inside the docs directory",
                    path.display()
                ))
            })?;
            let full = docs_dir.join(&relative);
            if !full.is_file() {
                return Err(BuildError::MissingFile { path: full });
            }
            Ok(relative)
        };

        Ok(Self {
            logo: config.theme.logo.as_deref().map(check).transpose()?,
            favicon: config.theme.favicon.as_deref().map(check).transpose()?,
            extra_css: config
                .extra_css
                .iter()
                .map(|path| check(path))
                .collect::<Result<_, _>>()?,
        })
    }
}

/// The site dir must not overlap the docs dir in either direction.
fn check_site_dir(docs_dir: &Path, site_dir: &Path) -> Result<(), BuildError> {
    let docs = absolute(docs_dir)?;
    let site = absolute(site_dir)?;
    if site.starts_with(&docs) {
        return Err(BuildError::MalformedConfig(format!(
            "site_dir {} must not be inside docs_dir {}",
            site_dir.display(),
            docs_dir.display()
        )));
    }
    if docs.starts_with(&site) {
        return Err(BuildError::MalformedConfig(format!(
            "docs_dir {} must not be inside site_dir {}",
            docs_dir.display(),
            site_dir.display()
        )));
    }
    Ok(())
}

/// Absolute, lexically normalized path. Nothing needs to exist.
fn absolute(path: &Path) -> Result<PathBuf, std::io::Error> {
    let mut out = PathBuf::new();
    for component in std::path::absolute(path)?.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                out.pop();
            }
            other => out.push(other),
        }
    }
    Ok(out)
}

fn slash_path(path: &Path) -> String {
    path.components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}

#[derive(Serialize)]
struct SiteContext<'a> {
    name: &'a str,
    description: Option<&'a str>,
    author: Option<&'a str>,
    url: Option<&'a str>,
    repo_url: Option<&'a str>,
    repo_name: Option<&'a str>,
    copyright: Option<&'a str>,
}

#[derive(Serialize)]
struct ThemeContext {
    name: &'static str,
    logo: Option<String>,
    favicon: Option<String>,
    palette: Palette,
    stylesheet: String,
}

#[derive(Serialize)]
struct PageLink<'a> {
    title: &'a str,
    url: &'a str,
}

#[derive(Serialize)]
struct PageContext<'a> {
    title: &'a str,
    url: &'a str,
    content: &'a str,
    toc: &'a [TocEntry],
    previous: Option<PageLink<'a>>,
    next: Option<PageLink<'a>>,
    is_homepage: bool,
    origin: &'a PageOrigin,
}

fn set_globals(
    renderer: &mut Renderer,
    config: &SiteConfig,
    theme: &Theme,
    palette: Palette,
    assets: &ThemeAssets,
    livereload_url: Option<&str>,
) {
    renderer.set_global_context(
        "site",
        &SiteContext {
            name: &config.site_name,
            description: config.site_description.as_deref(),
            author: config.site_author.as_deref(),
            url: config.site_url.as_deref(),
            repo_url: config.repo_url.as_deref(),
            repo_name: config.repo_name.as_deref(),
            copyright: config.copyright.as_deref(),
        },
    );
    renderer.set_global_context(
        "theme",
        &ThemeContext {
            name: theme.name,
            logo: assets.logo.as_deref().map(slash_path),
            favicon: assets.favicon.as_deref().map(slash_path),
            palette,
            stylesheet: theme.stylesheet_path(),
        },
    );
    let extra_css: Vec<String> = assets.extra_css.iter().map(|p| slash_path(p)).collect();
    renderer.set_global_context("extra_css", &extra_css);
    renderer.set_global_context("extra", &config.extra);
    renderer.set_global_context("livereload_url", &livereload_url);
}

fn render_pages(
    renderer: &Renderer,
    rendered: &[(Page, RenderedMarkdown)],
    menu: &[NavItem],
    out_dir: &Path,
) -> Result<(), BuildError> {
    // Previous/next follow the nav leaves only.
    let order: Vec<usize> = rendered
        .iter()
        .enumerate()
        .filter(|(_, (page, _))| page.origin == PageOrigin::Docs)
        .map(|(i, _)| i)
        .collect();
    let link = move |i: usize| PageLink {
        title: &rendered[i].0.title,
        url: &rendered[i].0.url,
    };

    for (i, (page, html)) in rendered.iter().enumerate() {
        let position = order.iter().position(|&j| j == i);
        let previous = position
            .and_then(|p| p.checked_sub(1))
            .map(|p| link(order[p]));
        let next = position
            .and_then(|p| order.get(p + 1))
            .map(|&j| link(j));

        let mut context = RenderContext::new();
        context.add_to_context(
            "page",
            &PageContext {
                title: &page.title,
                url: &page.url,
                content: &html.html,
                toc: &html.toc,
                previous,
                next,
                is_homepage: page.is_homepage(),
                origin: &page.origin,
            },
        );
        context.add_to_context("nav", &nav::with_active(menu, &page.url));
        context.add_to_context("base_url", &page.base_url());

        debug!(page = %page.out_path.display(), "writing page");
        renderer.render_to_file(PAGE_TEMPLATE, &context, &out_dir.join(&page.out_path))?;
    }
    Ok(())
}

/// Copy everything under the docs dir that is not markdown, skipping
/// hidden files and directories.
fn copy_static_files(docs_dir: &Path, out_dir: &Path) -> Result<Vec<PathBuf>, BuildError> {
    let mut copied = Vec::new();
    let walker = WalkDir::new(docs_dir)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|e| e.depth() == 0 || !e.file_name().to_string_lossy().starts_with('.'));
    for entry in walker {
        let entry = entry.map_err(|err| {
            err.into_io_error()
                .unwrap_or_else(|| std::io::Error::other("directory loop"))
        })?;
        let path = entry.path();
        if !entry.file_type().is_file() || nav::is_markdown(path) {
            continue;
        }
        let relative = path.strip_prefix(docs_dir).unwrap_or(path);
        let target = out_dir.join(relative);
        if target.exists() {
            warn!(file = %relative.display(), "static file clashes with a generated file, skipping");
            continue;
        }
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::copy(path, &target)?;
        debug!(file = %relative.display(), "copied static file");
        copied.push(relative.to_path_buf());
    }
    Ok(copied)
}

fn staging_dir(site_dir: &Path) -> Result<TempDir, BuildError> {
    let parent = site_parent(site_dir);
    fs::create_dir_all(&parent)?;
    Ok(tempfile::Builder::new()
        .prefix(STAGING_PREFIX)
        .tempdir_in(&parent)?)
}

fn site_parent(site_dir: &Path) -> PathBuf {
    site_dir
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from("."))
}

/// Whether `path` lies in one of the directories a build creates next to
/// the site dir while publishing.
pub fn is_temporary_build_path(path: &Path) -> bool {
    path.components().any(|c| {
        let name = c.as_os_str().to_string_lossy();
        name.starts_with(STAGING_PREFIX) || name.starts_with(PREVIOUS_PREFIX)
    })
}

/// Swap the staged site into place. The previous site is moved aside
/// first and restored if the swap fails.
fn publish(staging: TempDir, site_dir: &Path) -> Result<(), BuildError> {
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        fs::set_permissions(staging.path(), fs::Permissions::from_mode(0o755))?;
    }

    if !site_dir.exists() {
        fs::rename(staging.path(), site_dir)?;
        let _ = staging.keep();
        return Ok(());
    }

    let trash = tempfile::Builder::new()
        .prefix(PREVIOUS_PREFIX)
        .tempdir_in(site_parent(site_dir))?;
    let previous = trash.path().join("site");
    fs::rename(site_dir, &previous)?;
    if let Err(err) = fs::rename(staging.path(), site_dir) {
        fs::rename(&previous, site_dir)?;
        return Err(err.into());
    }
    let _ = staging.keep();
    // `trash` removes the previous site when dropped.
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn site_dir_may_not_overlap_docs_dir() {
        assert!(check_site_dir(Path::new("docs"), Path::new("docs/site")).is_err());
        assert!(check_site_dir(Path::new("docs"), Path::new("./docs")).is_err());
        assert!(check_site_dir(Path::new("docs"), Path::new(".")).is_err());
        assert!(check_site_dir(Path::new("docs"), Path::new("site")).is_ok());
        assert!(check_site_dir(Path::new("docs"), Path::new("docs/../site")).is_ok());
    }

    #[test]
    fn config_errors_map_onto_build_errors() {
        use crate::config::ConfigFormat;

        let err = SiteConfig::parse("site_name: Docs\nplugins:\n  - search\n", ConfigFormat::Yaml)
            .map_err(BuildError::from)
            .unwrap_err();
        assert!(matches!(err, BuildError::MalformedConfig(ref message) if message.contains("search")));

        let err = SiteConfig::load("no/such/quire.yml").map_err(BuildError::from).unwrap_err();
        assert!(matches!(err, BuildError::MissingFile { ref path } if path == Path::new("no/such/quire.yml")));
    }

    #[test]
    fn temporary_build_paths_are_recognised() {
        assert!(is_temporary_build_path(Path::new("project/.quire-staging-abc123/index.html")));
        assert!(is_temporary_build_path(Path::new("project/.quire-previous-x/site")));
        assert!(!is_temporary_build_path(Path::new("project/site/index.html")));
    }

    #[test]
    fn colliding_outputs_are_reported() {
        let source = |path: &str, origin: PageOrigin| Source {
            path: PathBuf::from(path),
            title: None,
            markdown: String::new(),
            origin,
        };
        let docs = vec![source("a.md", PageOrigin::Docs), source("a/index.md", PageOrigin::Docs)];
        assert!(matches!(page_urls(&docs, true), Err(BuildError::MalformedConfig(_))));
        assert!(page_urls(&docs, false).is_ok());

        let plugin = vec![
            source("reference/x.md", PageOrigin::Docs),
            source("reference/x.md", PageOrigin::Plugin("apidoc".into())),
        ];
        assert!(matches!(
            page_urls(&plugin, true),
            Err(BuildError::PluginFailure { ref plugin, .. }) if plugin == "apidoc"
        ));
    }
}
