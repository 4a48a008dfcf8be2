use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::extensions::Extension;
use crate::nav::NavNode;
use crate::plugins::PluginDeclaration;

pub const DEFAULT_CONFIG_FILE: &str = "quire.yml";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid YAML in {}: {source}", path.display())]
    Yaml {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },
    #[error("invalid TOML in {}: {source}", path.display())]
    Toml {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
    #[error("unsupported config format for {} (expected .yml, .yaml or .toml)", .0.display())]
    UnsupportedFormat(PathBuf),
    #[error("{0}")]
    Invalid(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigFormat {
    Yaml,
    Toml,
}

impl ConfigFormat {
    pub fn from_path(path: &Path) -> Option<Self> {
        match path.extension()?.to_str()?.to_ascii_lowercase().as_str() {
            "yml" | "yaml" => Some(Self::Yaml),
            "toml" => Some(Self::Toml),
            _ => None,
        }
    }
}

/// The site document: metadata, theme, navigation, extensions and plugins.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SiteConfig {
    pub site_name: String,
    #[serde(default)]
    pub site_description: Option<String>,
    #[serde(default)]
    pub site_author: Option<String>,
    /// Canonical URL the site is deployed at, used for absolute links.
    #[serde(default)]
    pub site_url: Option<String>,
    #[serde(default)]
    pub repo_url: Option<String>,
    #[serde(default)]
    pub repo_name: Option<String>,
    #[serde(default)]
    pub copyright: Option<String>,

    #[serde(default = "default_docs_dir")]
    pub docs_dir: PathBuf,
    #[serde(default = "default_site_dir")]
    pub site_dir: PathBuf,
    #[serde(default = "default_true")]
    pub use_directory_urls: bool,

    #[serde(default)]
    pub theme: ThemeConfig,
    #[serde(default)]
    pub extra_css: Vec<PathBuf>,
    #[serde(default)]
    pub plugins: Vec<PluginDeclaration>,
    /// Declared navigation. When absent the nav is derived from the docs dir.
    #[serde(default)]
    pub nav: Option<Vec<NavNode>>,
    #[serde(default)]
    pub markdown_extensions: Vec<Extension>,
    /// Free-form values handed to templates as `extra`.
    #[serde(default)]
    pub extra: BTreeMap<String, serde_json::Value>,

    #[serde(skip)]
    config_path: Option<PathBuf>,
}

fn default_docs_dir() -> PathBuf {
    PathBuf::from("docs")
}

fn default_site_dir() -> PathBuf {
    PathBuf::from("site")
}

fn default_true() -> bool {
    true
}

#[derive(Deserialize, Serialize, Debug, Clone, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct ThemeConfig {
    pub name: String,
    #[serde(default)]
    pub logo: Option<PathBuf>,
    #[serde(default)]
    pub favicon: Option<PathBuf>,
    #[serde(default)]
    pub palette: PaletteConfig,
    /// Directory of templates that replace the built-in ones by name.
    #[serde(default)]
    pub custom_dir: Option<PathBuf>,
}

impl Default for ThemeConfig {
    fn default() -> Self {
        Self {
            name: "material".into(),
            logo: None,
            favicon: None,
            palette: PaletteConfig::default(),
            custom_dir: None,
        }
    }
}

#[derive(Deserialize, Serialize, Debug, Clone, Default, PartialEq, Eq)]
#[serde(default, deny_unknown_fields)]
pub struct PaletteConfig {
    pub primary: Option<String>,
    pub accent: Option<String>,
}

impl SiteConfig {
    /// Read a site document, picking the format from the file extension.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let format =
            ConfigFormat::from_path(path).ok_or_else(|| ConfigError::UnsupportedFormat(path.into()))?;
        let data = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;

        let mut config = Self::parse(&data, format).map_err(|err| match err {
            ConfigError::Yaml { source, .. } => ConfigError::Yaml {
                path: path.to_path_buf(),
                source,
            },
            ConfigError::Toml { source, .. } => ConfigError::Toml {
                path: path.to_path_buf(),
                source,
            },
            other => other,
        })?;
        config.config_path = Some(path.to_path_buf());

        tracing::debug!(config = %path.display(), "loaded site config");
        Ok(config)
    }

    /// Parse a document that has no location on disk. Relative paths
    /// resolve against the current directory.
    pub fn parse(data: &str, format: ConfigFormat) -> Result<Self, ConfigError> {
        let config: SiteConfig = match format {
            ConfigFormat::Yaml => serde_yaml::from_str(data).map_err(|source| ConfigError::Yaml {
                path: PathBuf::new(),
                source,
            })?,
            ConfigFormat::Toml => toml::from_str(data).map_err(|source| ConfigError::Toml {
                path: PathBuf::new(),
                source,
            })?,
        };
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.site_name.trim().is_empty() {
            return Err(ConfigError::Invalid("site_name must not be empty".into()));
        }
        if self.theme.name.trim().is_empty() {
            return Err(ConfigError::Invalid("theme.name must not be empty".into()));
        }
        if let Some(nav) = &self.nav
            && nav.is_empty()
        {
            return Err(ConfigError::Invalid(
                "nav must list at least one page (omit it to derive the nav from docs_dir)".into(),
            ));
        }
        Ok(())
    }

    pub fn config_path(&self) -> Option<&Path> {
        self.config_path.as_deref()
    }

    /// Directory relative paths in the document resolve against.
    pub fn config_dir(&self) -> PathBuf {
        self.config_path
            .as_deref()
            .and_then(Path::parent)
            .filter(|p| !p.as_os_str().is_empty())
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."))
    }

    pub fn docs_dir(&self) -> PathBuf {
        self.config_dir().join(&self.docs_dir)
    }

    pub fn site_dir(&self) -> PathBuf {
        self.config_dir().join(&self.site_dir)
    }

    pub fn custom_dir(&self) -> Option<PathBuf> {
        self.theme
            .custom_dir
            .as_ref()
            .map(|dir| self.config_dir().join(dir))
    }

    /// Override the output directory, e.g. from the command line.
    pub fn set_site_dir<P: AsRef<Path>>(&mut self, path: P) {
        self.site_dir = path.as_ref().to_path_buf();
    }

    /// Every path `serve` should watch besides the docs dir.
    pub fn watch_paths(&self) -> Vec<PathBuf> {
        let base = self.config_dir();
        let mut paths: Vec<PathBuf> = self
            .plugins
            .iter()
            .flat_map(|plugin| plugin.watch_paths())
            .map(|path| base.join(path))
            .collect();
        if let Some(custom_dir) = self.custom_dir() {
            paths.push(custom_dir);
        }
        if let Some(config_path) = &self.config_path {
            paths.push(config_path.clone());
        }
        paths
    }
}

/// A list entry that is either a bare name or a single-key map of
/// name to options, as used by `plugins` and `markdown_extensions`.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct NamedEntry {
    pub name: String,
    pub options: serde_json::Value,
}

#[derive(Deserialize)]
#[serde(untagged)]
pub(crate) enum RawNamedEntry {
    Name(String),
    WithOptions(BTreeMap<String, serde_json::Value>),
}

impl TryFrom<RawNamedEntry> for NamedEntry {
    type Error = String;

    fn try_from(raw: RawNamedEntry) -> Result<Self, Self::Error> {
        match raw {
            RawNamedEntry::Name(name) => Ok(Self {
                name,
                options: serde_json::Value::Object(serde_json::Map::new()),
            }),
            RawNamedEntry::WithOptions(map) => {
                if map.len() != 1 {
                    let keys: Vec<_> = map.keys().cloned().collect();
                    return Err(format!(
                        "expected a single name mapped to its options, found keys [{}]",
                        keys.join(", ")
                    ));
                }
                let (name, options) = map
                    .into_iter()
                    .next()
                    .ok_or_else(|| "expected a name".to_string())?;
                let options = match options {
                    serde_json::Value::Null => serde_json::Value::Object(serde_json::Map::new()),
                    other => other,
                };
                Ok(Self { name, options })
            }
        }
    }
}

impl NamedEntry {
    /// Deserialize the options into the schema of the named entry.
    pub fn options<T: serde::de::DeserializeOwned>(&self) -> Result<T, String> {
        serde_json::from_value(self.options.clone())
            .map_err(|err| format!("invalid options for '{}': {err}", self.name))
    }
}
