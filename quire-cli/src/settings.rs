use anyhow::{Context, Result};
use clap::ArgMatches;
use config::{Config, Environment};
use quire_core::{BuildError, DEFAULT_CONFIG_FILE, SiteConfig};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Command-line settings, merged from defaults, `QUIRE_*` environment
/// variables and flags. The site itself is described by the file at
/// `config_file`.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Settings {
    /// Site document to build
    pub config_file: PathBuf,
    /// Replaces `site_dir` from the site document
    pub site_dir: Option<PathBuf>,
    /// Address the dev server binds to
    pub dev_addr: String,
    /// Open browser automatically
    pub open: bool,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            config_file: PathBuf::from(DEFAULT_CONFIG_FILE),
            site_dir: None,
            dev_addr: "127.0.0.1:8000".to_string(),
            open: false,
        }
    }
}

impl Settings {
    /// Load settings with cascading precedence:
    /// 1. CLI arguments (highest priority)
    /// 2. Environment variables (QUIRE_*)
    /// 3. Defaults (lowest priority)
    pub fn load(args: &ArgMatches) -> Result<Self> {
        let mut builder = Config::builder();

        builder = builder.add_source(Config::try_from(&Self::default())?);

        builder = builder.add_source(
            Environment::with_prefix("QUIRE")
                .prefix_separator("_")
                .separator("__"),
        );

        // Only args defined for the running subcommand are looked up
        for (arg, key) in [
            ("config_file", "config_file"),
            ("site_dir", "site_dir"),
            ("dev_addr", "dev_addr"),
        ] {
            if let Some(value) = args.try_get_one::<String>(arg).unwrap_or(None) {
                builder = builder.set_override(key, value.clone())?;
            }
        }
        if args.try_get_one::<bool>("open").unwrap_or(None) == Some(&true) {
            builder = builder.set_override("open", true)?;
        }

        let settings: Settings = builder.build()?.try_deserialize()?;
        Ok(settings)
    }

    /// Read the site document, applying `site_dir` when set.
    pub fn site_config(&self) -> Result<SiteConfig> {
        let mut config = SiteConfig::load(&self.config_file)
            .map_err(BuildError::from)
            .with_context(|| format!("failed to load {}", self.config_file.display()))?;
        if let Some(site_dir) = &self.site_dir {
            // Flags are relative to the working directory, not the config file.
            config.set_site_dir(std::path::absolute(site_dir)?);
        }
        Ok(config)
    }
}
