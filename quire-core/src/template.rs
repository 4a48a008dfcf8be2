use std::path::Path;

use tera::{Context, Tera};
use thiserror::Error;
use walkdir::WalkDir;

use crate::theme::Theme;

#[derive(Debug, Error)]
pub enum TemplateError {
    #[error("Template error: {0}")]
    Tera(#[from] tera::Error),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub struct TemplateRenderer {
    tera: Tera,
}

impl TemplateRenderer {
    /// Load a built-in theme, then let `.html` files from `custom_dir`
    /// replace or add templates by their relative name.
    pub fn new(theme: &Theme, custom_dir: Option<&Path>) -> Result<Self, TemplateError> {
        let mut tera = Tera::default();
        tera.add_raw_templates(theme.templates.iter().copied())?;

        if let Some(dir) = custom_dir {
            let overrides = template_files(dir)?;
            tracing::debug!(
                dir = %dir.display(),
                count = overrides.len(),
                "loading theme overrides"
            );
            tera.add_template_files(overrides)?;
        }

        Ok(Self { tera })
    }

    /// Render a template with the given context
    pub fn render(&self, template: &str, context: &Context) -> Result<String, TemplateError> {
        Ok(self.tera.render(template, context)?)
    }

}

fn template_files(dir: &Path) -> Result<Vec<(std::path::PathBuf, Option<String>)>, std::io::Error> {
    let mut files = Vec::new();
    for entry in WalkDir::new(dir).sort_by_file_name() {
        let entry = entry.map_err(|err| {
            err.into_io_error()
                .unwrap_or_else(|| std::io::Error::other("directory loop"))
        })?;
        let path = entry.path();
        if !entry.file_type().is_file() || path.extension().is_none_or(|ext| ext != "html") {
            continue;
        }
        let name = path
            .strip_prefix(dir)
            .unwrap_or(path)
            .to_string_lossy()
            .replace('\\', "/");
        files.push((path.to_path_buf(), Some(name)));
    }
    Ok(files)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::theme;

    #[test]
    fn custom_dir_overrides_builtin_templates() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("main.html"), "custom {{ page.title }}").unwrap();

        let renderer =
            TemplateRenderer::new(theme::find("material").unwrap(), Some(dir.path())).unwrap();
        let mut context = Context::new();
        context.insert("page", &serde_json::json!({ "title": "Home" }));

        assert_eq!(renderer.render("main.html", &context).unwrap(), "custom Home");
    }
}
