use std::fs;
use std::path::{Path, PathBuf};

use pretty_assertions::assert_eq;
use quire_core::{BuildError, PageOrigin, SiteBuilder, SiteConfig};
use tempfile::TempDir;
use walkdir::WalkDir;

/// A project directory with a `quire.yml` and a docs folder.
struct Project {
    dir: TempDir,
}

impl Project {
    fn new(config: &str) -> Self {
        let project = Self {
            dir: tempfile::tempdir().unwrap(),
        };
        project.write("quire.yml", config);
        fs::create_dir_all(project.path("docs")).unwrap();
        project
    }

    fn path(&self, rel: &str) -> PathBuf {
        self.dir.path().join(rel)
    }

    fn write(&self, rel: &str, contents: &str) {
        let path = self.path(rel);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, contents).unwrap();
    }

    fn config(&self) -> SiteConfig {
        SiteConfig::load(self.path("quire.yml")).unwrap()
    }

    fn build(&self) -> Result<quire_core::SiteOutput, BuildError> {
        SiteBuilder::new(&self.config()).build()
    }

    fn read_site(&self, rel: &str) -> String {
        fs::read_to_string(self.path("site").join(rel)).unwrap()
    }

    fn html_files(&self) -> Vec<PathBuf> {
        let site = self.path("site");
        let mut files: Vec<PathBuf> = WalkDir::new(&site)
            .into_iter()
            .map(|e| e.unwrap())
            .filter(|e| e.path().extension().is_some_and(|ext| ext == "html"))
            .map(|e| e.path().strip_prefix(&site).unwrap().to_path_buf())
            .collect();
        files.sort();
        files
    }

    fn leftover_build_dirs(&self) -> Vec<String> {
        fs::read_dir(self.dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().to_string())
            .filter(|name| name.starts_with(".quire-"))
            .collect()
    }
}

const HOME_AND_ARCHITECTURE: &str = "\
site_name: Ecco
nav:
  - Home: index.md
  - Architecture: architecture.md
";

fn home_and_architecture() -> Project {
    let project = Project::new(HOME_AND_ARCHITECTURE);
    project.write("docs/index.md", "# Welcome\n\nSee [the design](architecture.md#layers).\n");
    project.write("docs/architecture.md", "# Layers\n\nBack [home](index.md).\n");
    project
}

fn sidebar(html: &str) -> &str {
    let start = html.find("<nav class=\"sidebar\"").expect("sidebar");
    let end = start + html[start..].find("</nav>").expect("end of sidebar");
    &html[start..end]
}

#[test]
fn home_and_architecture_become_two_pages_in_nav_order() {
    let project = home_and_architecture();
    let output = project.build().unwrap();

    let titles: Vec<&str> = output.pages.iter().map(|p| p.title.as_str()).collect();
    assert_eq!(titles, vec!["Home", "Architecture"]);
    assert_eq!(
        project.html_files(),
        vec![
            PathBuf::from("architecture/index.html"),
            PathBuf::from("index.html")
        ]
    );

    let home = project.read_site("index.html");
    let nav = sidebar(&home);
    let home_at = nav.find(">Home<").unwrap();
    let architecture_at = nav.find(">Architecture<").unwrap();
    assert!(home_at < architecture_at, "{nav}");
}

#[test]
fn one_html_file_per_nav_leaf() {
    let project = Project::new(
        "\
site_name: Ecco
nav:
  - index.md
  - Guide:
      - guide/install.md
      - Usage: guide/usage.md
",
    );
    project.write("docs/index.md", "# Start\n");
    project.write("docs/guide/install.md", "# Install\n");
    project.write("docs/guide/usage.md", "# Use it\n");
    project.write("docs/drafts/unlisted.md", "# Not in the nav\n");

    let output = project.build().unwrap();

    assert_eq!(output.page_count(), 3);
    assert_eq!(
        project.html_files(),
        vec![
            PathBuf::from("guide/install/index.html"),
            PathBuf::from("guide/usage/index.html"),
            PathBuf::from("index.html"),
        ]
    );
    // Untitled leaves take their first heading
    assert_eq!(output.pages[1].title, "Install");
    assert_eq!(output.pages[2].title, "Usage");
}

#[test]
fn nav_markup_is_identical_across_builds() {
    let project = home_and_architecture();

    project.build().unwrap();
    let first = project.read_site("architecture/index.html");
    project.build().unwrap();
    let second = project.read_site("architecture/index.html");

    assert_eq!(sidebar(&first), sidebar(&second));
    assert_eq!(first, second);
}

#[test]
fn missing_nav_leaf_is_reported() {
    let project = Project::new("site_name: Ecco\nnav:\n  - Home: index.md\n  - Gone: gone.md\n");
    project.write("docs/index.md", "# Home\n");

    match project.build() {
        Err(BuildError::MissingFile { path }) => assert_eq!(path, Path::new("gone.md")),
        other => panic!("expected MissingFile, got {other:?}"),
    }
    assert!(!project.path("site").exists());
}

#[test]
fn unknown_theme_is_reported() {
    let project = Project::new("site_name: Ecco\ntheme:\n  name: readthedocs\n");
    project.write("docs/index.md", "# Home\n");

    match project.build() {
        Err(BuildError::UnknownTheme { name, known }) => {
            assert_eq!(name, "readthedocs");
            assert!(known.contains("material"));
        }
        other => panic!("expected UnknownTheme, got {other:?}"),
    }
}

#[test]
fn extension_conflict_is_reported_before_anything_is_written() {
    let project = Project::new(
        "site_name: Ecco\nmarkdown_extensions:\n  - fenced_code\n  - highlight\n",
    );
    project.write("docs/index.md", "# Home\n");

    match project.build() {
        Err(BuildError::ExtensionConflict(conflict)) => {
            assert_eq!(conflict.first, "fenced_code");
            assert_eq!(conflict.second, "highlight");
        }
        other => panic!("expected ExtensionConflict, got {other:?}"),
    }
    assert!(!project.path("site").exists());
    assert!(project.leftover_build_dirs().is_empty());
}

#[test]
fn failed_build_leaves_the_published_site_untouched() {
    let project = home_and_architecture();
    project.build().unwrap();
    let before = project.read_site("index.html");

    project.write("docs/index.md", "# Changed\n");
    project.write(
        "quire.yml",
        &format!("{HOME_AND_ARCHITECTURE}  - Missing: missing.md\n"),
    );
    assert!(project.build().is_err());

    assert_eq!(project.read_site("index.html"), before);
    assert!(project.path("site/architecture/index.html").is_file());
    assert!(project.leftover_build_dirs().is_empty());
}

#[test]
fn rebuild_replaces_stale_output() {
    let project = home_and_architecture();
    project.build().unwrap();

    project.write("quire.yml", "site_name: Ecco\nnav:\n  - Home: index.md\n");
    project.build().unwrap();

    assert_eq!(project.html_files(), vec![PathBuf::from("index.html")]);
    assert!(project.leftover_build_dirs().is_empty());
}

#[test]
fn relative_links_point_at_built_pages() {
    let project = home_and_architecture();
    project.build().unwrap();

    let home = project.read_site("index.html");
    assert!(home.contains(r#"href="./architecture/#layers""#), "{home}");
    let architecture = project.read_site("architecture/index.html");
    assert!(architecture.contains(r#"href="../""#), "{architecture}");
}

#[test]
fn static_files_and_theme_assets_are_copied() {
    let project = Project::new(
        "\
site_name: Ecco
theme:
  name: classic
  logo: img/logo.svg
extra_css:
  - css/extra.css
",
    );
    project.write("docs/index.md", "# Home\n");
    project.write("docs/img/logo.svg", "<svg/>");
    project.write("docs/css/extra.css", "body { margin: 0 }");
    project.write("docs/.notes/secret.txt", "hidden");

    let output = project.build().unwrap();

    assert_eq!(project.read_site("img/logo.svg"), "<svg/>");
    assert!(project.path("site/css/extra.css").is_file());
    assert!(!project.path("site/.notes").exists());
    assert!(output.assets.contains(&PathBuf::from("img/logo.svg")));

    let home = project.read_site("index.html");
    assert!(home.contains(r#"src="./img/logo.svg""#), "{home}");
    assert!(home.contains(r#"href="./css/extra.css""#), "{home}");
}

#[test]
fn missing_logo_is_reported() {
    let project = Project::new("site_name: Ecco\ntheme:\n  name: material\n  logo: logo.png\n");
    project.write("docs/index.md", "# Home\n");

    match project.build() {
        Err(BuildError::MissingFile { path }) => assert!(path.ends_with("logo.png")),
        other => panic!("expected MissingFile, got {other:?}"),
    }
}

#[test]
fn livereload_script_is_injected_only_when_requested() {
    let project = home_and_architecture();

    project.build().unwrap();
    assert!(!project.read_site("index.html").contains("WebSocket"));

    let config = project.config();
    SiteBuilder::new(&config)
        .livereload("ws://127.0.0.1:8000/__livereload")
        .build()
        .unwrap();
    let home = project.read_site("index.html");
    assert!(home.contains("ws://127.0.0.1:8000/__livereload"), "{home}");
}

#[test]
fn sitemap_lists_every_page() {
    let project = Project::new(
        "\
site_name: Ecco
site_url: https://ecco.example/docs/
nav:
  - Home: index.md
  - Architecture: architecture.md
plugins:
  - sitemap
",
    );
    project.write("docs/index.md", "# Home\n");
    project.write("docs/architecture.md", "# Architecture\n");

    project.build().unwrap();

    let xml = project.read_site("sitemap.xml");
    assert!(xml.contains("<loc>https://ecco.example/docs/</loc>"), "{xml}");
    assert!(xml.contains("<loc>https://ecco.example/docs/architecture/</loc>"), "{xml}");
}

const WIDGETS_PY: &str = r#""""Widgets for the demo."""


class Widget:
    """A thing on screen.

    Args:
        name (str): Label shown to the user.
    """

    def draw(self, scale: float = 1.0) -> None:
        """Paint the widget."""
"#;

fn apidoc_project(plugin: &str) -> Project {
    let project = Project::new(&format!(
        "site_name: Ecco\nnav:\n  - Home: index.md\n  - API: api.md\nplugins:\n{plugin}"
    ));
    project.write("docs/index.md", "# Home\n");
    project.write("docs/api.md", "# API\n\n::: shop.widgets.Widget\n");
    project.write("src/shop/__init__.py", "");
    project.write("src/shop/widgets.py", WIDGETS_PY);
    project
}

#[test]
fn apidoc_expands_identifiers_from_python_sources() {
    let project = apidoc_project(
        "  - apidoc:\n      handlers:\n        python:\n          paths: [src]\n          setup_commands: [\"true\"]\n",
    );

    project.build().unwrap();

    let api = project.read_site("api/index.html");
    assert!(api.contains(r#"id="shop.widgets.Widget""#), "{api}");
    assert!(api.contains("A thing on screen."), "{api}");
    assert!(api.contains("Label shown to the user."), "{api}");
    assert!(api.contains(r#"id="shop.widgets.Widget.draw""#), "{api}");
    assert!(!api.contains(":::"), "{api}");
}

#[test]
fn apidoc_unknown_identifier_fails_the_build() {
    let project = apidoc_project("  - apidoc:\n      handlers:\n        python:\n          paths: [src]\n");
    project.write("docs/api.md", "::: shop.gadgets\n");

    match project.build() {
        Err(BuildError::PluginFailure { plugin, message }) => {
            assert_eq!(plugin, "apidoc");
            assert!(message.contains("shop.gadgets"), "{message}");
        }
        other => panic!("expected PluginFailure, got {other:?}"),
    }
}

#[test]
fn apidoc_failing_setup_command_fails_the_build() {
    let project = apidoc_project(
        "  - apidoc:\n      handlers:\n        python:\n          paths: [src]\n          setup_commands: [\"exit 4\"]\n",
    );

    assert!(matches!(
        project.build(),
        Err(BuildError::PluginFailure { ref plugin, .. }) if plugin == "apidoc"
    ));
    assert!(!project.path("site").exists());
}

#[test]
fn apidoc_reference_pages_are_built_outside_the_nav() {
    let project = apidoc_project(
        "  - apidoc:\n      reference_pages: true\n      handlers:\n        python:\n          paths: [src]\n",
    );

    let output = project.build().unwrap();

    let reference = project.read_site("reference/shop.widgets/index.html");
    assert!(reference.contains("Widgets for the demo."), "{reference}");
    let plugin_pages: Vec<&Path> = output
        .pages
        .iter()
        .filter(|page| page.origin == PageOrigin::Plugin("apidoc".into()))
        .map(|page| page.path.as_path())
        .collect();
    assert_eq!(
        plugin_pages,
        vec![Path::new("reference/shop.md"), Path::new("reference/shop.widgets.md")]
    );
    assert!(!sidebar(&project.read_site("index.html")).contains("reference/"));
}

#[test]
fn pager_follows_the_flattened_nav() {
    let project = Project::new(
        "\
site_name: Ecco
nav:
  - Home: index.md
  - Guide:
      - Install: guide/install.md
      - Usage: guide/usage.md
",
    );
    project.write("docs/index.md", "# Home\n");
    project.write("docs/guide/install.md", "# Install\n");
    project.write("docs/guide/usage.md", "# Usage\n");

    project.build().unwrap();

    let home = project.read_site("index.html");
    assert!(!home.contains(r#"rel="prev""#), "{home}");
    assert!(home.contains(r#"rel="next" href="./guide/install/""#), "{home}");

    let install = project.read_site("guide/install/index.html");
    assert!(install.contains(r#"rel="prev" href="../../""#), "{install}");
    assert!(install.contains(r#"rel="next" href="../../guide/usage/""#), "{install}");

    let usage = project.read_site("guide/usage/index.html");
    assert!(usage.contains(r#"rel="prev" href="../../guide/install/""#), "{usage}");
    assert!(!usage.contains(r#"rel="next""#), "{usage}");
}

#[test]
fn plugin_pages_stay_out_of_the_pager() {
    let project = apidoc_project(
        "  - apidoc:\n      reference_pages: true\n      handlers:\n        python:\n          paths: [src]\n",
    );

    project.build().unwrap();

    let api = project.read_site("api/index.html");
    assert!(api.contains(r#"rel="prev" href="../""#), "{api}");
    assert!(!api.contains(r#"rel="next""#), "{api}");
    let reference = project.read_site("reference/shop.widgets/index.html");
    assert!(!reference.contains(r#"class="pager""#), "{reference}");
}

#[test]
fn flat_urls_without_directory_urls() {
    let project = Project::new(
        "\
site_name: Ecco
use_directory_urls: false
nav:
  - Home: index.md
  - Install: guide/install.md
",
    );
    project.write("docs/index.md", "# Home\n\nStart with [installing](guide/install.md).\n");
    project.write("docs/guide/install.md", "# Install\n\nBack [home](../index.md).\n");

    let output = project.build().unwrap();

    assert_eq!(
        project.html_files(),
        vec![PathBuf::from("guide/install.html"), PathBuf::from("index.html")]
    );
    let urls: Vec<&str> = output.pages.iter().map(|p| p.url.as_str()).collect();
    assert_eq!(urls, vec!["", "guide/install.html"]);

    let home = project.read_site("index.html");
    assert!(home.contains(r#"href="./guide/install.html">installing"#), "{home}");
    assert!(home.contains(r#"rel="next" href="./guide/install.html""#), "{home}");
    let install = project.read_site("guide/install.html");
    assert!(install.contains(r#"href="../">home"#), "{install}");
    assert!(install.contains(r#"rel="prev" href="../""#), "{install}");
}

#[test]
fn same_page_anchors_survive_on_nested_pages() {
    let project = Project::new("site_name: Ecco\nnav:\n  - Home: index.md\n  - Output: api/output.md\n");
    project.write("docs/index.md", "# Home\n");
    project.write(
        "docs/api/output.md",
        "# Output\n\nSee [rankings](./#ecco.output.OutputSeq.rankings).\n",
    );

    project.build().unwrap();

    let output = project.read_site("api/output/index.html");
    assert!(
        output.contains(r#"href="./#ecco.output.OutputSeq.rankings""#),
        "{output}"
    );
}
