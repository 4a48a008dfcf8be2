use serde::Deserialize;

use super::{Plugin, PluginEnv, PluginError, PostBuild};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeFreq {
    Always,
    Hourly,
    Daily,
    Weekly,
    Monthly,
    Yearly,
    Never,
}

impl ChangeFreq {
    fn as_str(self) -> &'static str {
        match self {
            ChangeFreq::Always => "always",
            ChangeFreq::Hourly => "hourly",
            ChangeFreq::Daily => "daily",
            ChangeFreq::Weekly => "weekly",
            ChangeFreq::Monthly => "monthly",
            ChangeFreq::Yearly => "yearly",
            ChangeFreq::Never => "never",
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SitemapOptions {
    pub changefreq: Option<ChangeFreq>,
}

/// Writes `sitemap.xml` at the site root.
pub struct Sitemap {
    options: SitemapOptions,
}

impl Sitemap {
    pub fn new(options: SitemapOptions) -> Self {
        Self { options }
    }
}

impl Plugin for Sitemap {
    fn name(&self) -> &'static str {
        "sitemap"
    }

    fn post_build(&self, env: &PluginEnv<'_>, build: &PostBuild<'_>) -> Result<(), PluginError> {
        let site_url = env.config.site_url.as_deref().map(|url| url.trim_end_matches('/'));
        if site_url.is_none() {
            tracing::warn!("site_url is not set, sitemap.xml will list root-relative URLs");
        }

        let mut urls = String::new();
        for page in build.pages {
            let loc = match site_url {
                Some(base) => format!("{base}/{}", page.url),
                None => format!("/{}", page.url),
            };
            urls.push_str("  <url>\n");
            urls.push_str(&format!(
                "    <loc>{}</loc>\n",
                html_escape::encode_text(&loc)
            ));
            if let Some(freq) = self.options.changefreq {
                urls.push_str(&format!("    <changefreq>{}</changefreq>\n", freq.as_str()));
            }
            urls.push_str("  </url>\n");
        }

        let xml = format!(
            r#"<?xml version="1.0" encoding="UTF-8"?>
<urlset xmlns="http://www.sitemaps.org/schemas/sitemap/0.9">
{urls}</urlset>
"#
        );
        std::fs::write(build.out_dir.join("sitemap.xml"), xml)?;
        tracing::info!(pages = build.pages.len(), "generated sitemap.xml");
        Ok(())
    }
}
