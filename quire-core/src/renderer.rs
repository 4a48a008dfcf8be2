use std::path::Path;

use serde::Serialize;
use tera::Context;

use crate::template::{TemplateError, TemplateRenderer};
use crate::theme::Theme;

/// Page-specific template values, layered over the renderer's globals.
#[derive(Default)]
pub struct RenderContext {
    context: Context,
}

impl RenderContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_to_context<T: Serialize + ?Sized>(&mut self, key: &str, value: &T) {
        self.context.insert(key, value);
    }
}

pub struct Renderer {
    templates: TemplateRenderer,
    global: Context,
}

impl Renderer {
    pub fn new(theme: &Theme, custom_dir: Option<&Path>) -> Result<Self, TemplateError> {
        Ok(Self {
            templates: TemplateRenderer::new(theme, custom_dir)?,
            global: Context::new(),
        })
    }

    /// Values every page sees: site metadata, theme, extra css, ...
    pub fn set_global_context<T: Serialize + ?Sized>(&mut self, key: &str, value: &T) {
        self.global.insert(key, value);
    }

    /// Render with the page's values layered over the globals.
    pub fn render(&self, template: &str, page: &RenderContext) -> Result<String, TemplateError> {
        let mut context = self.global.clone();
        context.extend(page.context.clone());
        self.templates.render(template, &context)
    }

    pub fn render_to_file(
        &self,
        template: &str,
        page: &RenderContext,
        output_path: &Path,
    ) -> Result<(), TemplateError> {
        let rendered = self.render(template, page)?;

        if let Some(parent) = output_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        std::fs::write(output_path, rendered)?;
        Ok(())
    }
}
