pub mod builder;
pub mod config;
pub mod extensions;
pub mod markdown;
pub mod nav;
pub mod plugins;
pub mod renderer;
pub mod site;
pub mod template;
pub mod theme;

// Re-export main types
pub use builder::{BuildError, SiteBuilder, build, is_temporary_build_path};
pub use config::{ConfigError, ConfigFormat, DEFAULT_CONFIG_FILE, SiteConfig};
pub use site::{Page, PageOrigin, SiteOutput};
