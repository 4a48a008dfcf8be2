//! Built-in themes and palette colors.

use serde::Serialize;
use thiserror::Error;

use crate::config::PaletteConfig;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ThemeError {
    #[error("unknown theme '{name}' (known themes: {known})")]
    UnknownTheme { name: String, known: String },
    #[error("unknown {role} color '{color}' in theme palette")]
    UnknownColor { role: &'static str, color: String },
}

/// A theme compiled into the binary.
#[derive(Debug)]
pub struct Theme {
    pub name: &'static str,
    /// Template name and source. Names are what `custom_dir` files override.
    pub templates: &'static [(&'static str, &'static str)],
    pub stylesheet: &'static str,
}

impl Theme {
    /// Where the theme stylesheet lands in the built site.
    pub fn stylesheet_path(&self) -> String {
        format!("assets/stylesheets/{}.css", self.name)
    }
}

const MACROS: (&str, &str) = ("macros.html", include_str!("../themes/common/macros.html"));
const LIVERELOAD: (&str, &str) = (
    "livereload.html",
    include_str!("../themes/common/livereload.html"),
);

static THEMES: &[Theme] = &[
    Theme {
        name: "material",
        templates: &[
            MACROS,
            LIVERELOAD,
            ("base.html", include_str!("../themes/material/base.html")),
            ("main.html", include_str!("../themes/material/main.html")),
        ],
        stylesheet: include_str!("../themes/material/theme.css"),
    },
    Theme {
        name: "classic",
        templates: &[
            MACROS,
            LIVERELOAD,
            ("base.html", include_str!("../themes/classic/base.html")),
            ("main.html", include_str!("../themes/classic/main.html")),
        ],
        stylesheet: include_str!("../themes/classic/theme.css"),
    },
];

pub fn find(name: &str) -> Result<&'static Theme, ThemeError> {
    THEMES
        .iter()
        .find(|theme| theme.name == name)
        .ok_or_else(|| ThemeError::UnknownTheme {
            name: name.to_string(),
            known: known().collect::<Vec<_>>().join(", "),
        })
}

pub fn known() -> impl Iterator<Item = &'static str> {
    THEMES.iter().map(|theme| theme.name)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Color {
    pub name: &'static str,
    pub hex: &'static str,
}

static COLORS: &[Color] = &[
    Color { name: "red", hex: "#ef5350" },
    Color { name: "pink", hex: "#e91e63" },
    Color { name: "purple", hex: "#ab47bc" },
    Color { name: "deep purple", hex: "#7e57c2" },
    Color { name: "indigo", hex: "#3f51b5" },
    Color { name: "blue", hex: "#2094f3" },
    Color { name: "light blue", hex: "#02a6f2" },
    Color { name: "cyan", hex: "#00bdd6" },
    Color { name: "teal", hex: "#009485" },
    Color { name: "green", hex: "#4cae4f" },
    Color { name: "light green", hex: "#8bc34b" },
    Color { name: "lime", hex: "#cbdc38" },
    Color { name: "yellow", hex: "#ffec3d" },
    Color { name: "amber", hex: "#ffc105" },
    Color { name: "orange", hex: "#ffa724" },
    Color { name: "deep orange", hex: "#ff6e42" },
    Color { name: "brown", hex: "#795649" },
    Color { name: "grey", hex: "#757575" },
    Color { name: "blue grey", hex: "#546d78" },
    Color { name: "black", hex: "#000000" },
    Color { name: "white", hex: "#ffffff" },
];

const DEFAULT_COLOR: &str = "indigo";

/// Case-insensitive, with `-` and `_` read as spaces: `Deep_Orange`.
pub fn color(name: &str) -> Option<Color> {
    let wanted = name.trim().to_lowercase().replace(['-', '_'], " ");
    COLORS.iter().copied().find(|c| c.name == wanted)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Palette {
    pub primary: Color,
    pub accent: Color,
    /// Text color readable on top of `primary`.
    pub on_primary: &'static str,
}

impl Palette {
    pub fn resolve(config: &PaletteConfig) -> Result<Self, ThemeError> {
        let pick = |role: &'static str, value: &Option<String>| {
            let name = value.as_deref().unwrap_or(DEFAULT_COLOR);
            color(name).ok_or_else(|| ThemeError::UnknownColor {
                role,
                color: name.to_string(),
            })
        };
        let primary = pick("primary", &config.primary)?;
        let accent = pick("accent", &config.accent)?;
        let on_primary = match primary.name {
            "white" | "yellow" | "lime" | "amber" | "light green" => "#000000de",
            _ => "#ffffff",
        };
        Ok(Self {
            primary,
            accent,
            on_primary,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn finds_builtin_themes() {
        assert_eq!(find("material").unwrap().name, "material");
        assert_eq!(find("classic").unwrap().stylesheet_path(), "assets/stylesheets/classic.css");
    }

    #[test]
    fn unknown_theme_lists_known_ones() {
        let err = find("readthedocs").unwrap_err();
        assert_eq!(
            err,
            ThemeError::UnknownTheme {
                name: "readthedocs".into(),
                known: "material, classic".into()
            }
        );
    }

    #[test]
    fn every_theme_ships_the_templates_the_renderer_needs() {
        for theme in THEMES {
            for required in ["base.html", "main.html", "macros.html", "livereload.html"] {
                assert!(
                    theme.templates.iter().any(|(name, _)| *name == required),
                    "{} lacks {required}",
                    theme.name
                );
            }
        }
    }

    #[test]
    fn colors_are_forgiving_about_spelling() {
        assert_eq!(color("Deep_Orange").unwrap().name, "deep orange");
        assert_eq!(color("blue-grey").unwrap().hex, "#546d78");
        assert!(color("mauve").is_none());
    }

    #[test]
    fn palette_defaults_and_errors() {
        let palette = Palette::resolve(&PaletteConfig::default()).unwrap();
        assert_eq!(palette.primary.name, "indigo");
        assert_eq!(palette.accent.name, "indigo");

        let white = Palette::resolve(&PaletteConfig {
            primary: Some("white".into()),
            accent: None,
        })
        .unwrap();
        assert_eq!(white.on_primary, "#000000de");

        let err = Palette::resolve(&PaletteConfig {
            primary: None,
            accent: Some("mauve".into()),
        })
        .unwrap_err();
        assert!(matches!(err, ThemeError::UnknownColor { role: "accent", .. }));
    }
}
