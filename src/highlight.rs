use syntect::{
    highlighting::{Theme, ThemeSet},
    html::{css_for_theme_with_class_style, ClassStyle, ClassedHTMLGenerator},
    parsing::SyntaxSet,
    util::LinesWithEndings,
};
use thiserror::Error;
use tracing::debug;

use crate::config::ThemesConfig;

const CLASS_STYLE: ClassStyle = ClassStyle::SpacedPrefixed { prefix: "hl-" };

/// Theme names that are not bundled with syntect, mapped to their closest bundled theme.
const THEME_ALIASES: &[(&str, &str)] = &[
    ("github-light", "InspiredGitHub"),
    ("github-dark", "base16-ocean.dark"),
];

#[derive(Debug, Error)]
pub enum HighlightError {
    #[error("unknown highlighting theme {0:?}")]
    UnknownTheme(String),

    #[error("failed to build highlighting stylesheet: {0}")]
    Stylesheet(#[from] syntect::Error),
}

/// Highlights fenced code with class-styled spans; colors for both color schemes
/// live in [`Highlighter::stylesheet`].
#[derive(Debug)]
pub struct Highlighter {
    syntax_set: SyntaxSet,
    themes: ThemesConfig,
    stylesheet: String,
}

impl Highlighter {
    pub fn new(themes: &ThemesConfig) -> Result<Self, HighlightError> {
        let theme_set = ThemeSet::load_defaults();
        let light = resolve_theme(&theme_set, &themes.light)?;
        let dark = resolve_theme(&theme_set, &themes.dark)?;

        let stylesheet = format!(
            "{}\n@media (prefers-color-scheme: dark) {{\n{}}}\n",
            css_for_theme_with_class_style(light, CLASS_STYLE)?,
            css_for_theme_with_class_style(dark, CLASS_STYLE)?,
        );

        Ok(Self {
            syntax_set: SyntaxSet::load_defaults_newlines(),
            themes: themes.clone(),
            stylesheet,
        })
    }

    pub fn themes(&self) -> &ThemesConfig {
        &self.themes
    }

    pub fn stylesheet(&self) -> &str {
        &self.stylesheet
    }

    pub fn highlight(&self, code: &str, lang: Option<&str>) -> String {
        let syntax = lang
            .and_then(|l| self.syntax_set.find_syntax_by_token(l))
            .unwrap_or_else(|| self.syntax_set.find_syntax_plain_text());

        let mut generator =
            ClassedHTMLGenerator::new_with_class_style(syntax, &self.syntax_set, CLASS_STYLE);
        for line in LinesWithEndings::from(code) {
            if let Err(e) = generator.parse_html_for_line_which_includes_newline(line) {
                debug!(lang = ?lang, error = %e, "highlighting failed, emitting plain code");
                return self.wrap(lang, &htmlescape::encode_minimal(code));
            }
        }
        self.wrap(lang, &generator.finalize())
    }

    fn wrap(&self, lang: Option<&str>, inner: &str) -> String {
        let code_class = lang
            .map(|l| format!(" class=\"language-{}\"", htmlescape::encode_minimal(l)))
            .unwrap_or_default();
        format!(
            "<pre class=\"highlight hl-code\" data-theme-light=\"{}\" data-theme-dark=\"{}\"><code{code_class}>{inner}</code></pre>\n",
            htmlescape::encode_minimal(&self.themes.light),
            htmlescape::encode_minimal(&self.themes.dark),
        )
    }
}

fn resolve_theme<'a>(theme_set: &'a ThemeSet, name: &str) -> Result<&'a Theme, HighlightError> {
    let bundled = THEME_ALIASES
        .iter()
        .find(|(alias, _)| *alias == name)
        .map_or(name, |(_, bundled)| *bundled);
    theme_set
        .themes
        .get(bundled)
        .ok_or_else(|| HighlightError::UnknownTheme(name.to_string()))
}
