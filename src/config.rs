use std::{
    collections::BTreeMap,
    path::{Path, PathBuf},
};

use serde::Deserialize;
use thiserror::Error;
use tokio::fs;
use tracing::{info, warn};
use url::Url;

pub const DEFAULT_CONFIG_PATH: &str = "site.toml";

const DEFAULT_SITE: &str = "https://timhall.github.io";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse site config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("site origin {0:?} must be an absolute http(s) URL")]
    InvalidSite(String),

    #[error("redirect {from:?} -> {to:?}: {reason}")]
    InvalidRedirect {
        from: String,
        to: String,
        reason: &'static str,
    },
}

/// Everything the site needs at startup, read from `site.toml`.
///
/// Sections left out of the file keep their defaults, so an empty file (or no
/// file at all) describes the canonical site.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SiteConfig {
    /// Canonical origin used for absolute URLs.
    pub site: String,
    pub markdown: MarkdownConfig,
    /// Source path -> destination path.
    pub redirects: BTreeMap<String, String>,
    pub integrations: Vec<Integration>,
    pub content: ContentConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct MarkdownConfig {
    pub remark_plugins: Vec<RemarkPlugin>,
    pub rehype_plugins: Vec<RehypePlugin>,
    pub shiki_config: ShikiConfig,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ShikiConfig {
    pub themes: ThemesConfig,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ThemesConfig {
    pub light: String,
    pub dark: String,
}

/// Source-level markdown extensions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RemarkPlugin {
    /// `$..$`, `$$..$$`, `\(..\)` and `\[..\]` math notation.
    Math,
}

/// HTML-level extensions applied after markdown parsing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RehypePlugin {
    /// Typeset math nodes with KaTeX.
    Katex,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Integration {
    Svelte,
    Mdx,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ContentConfig {
    /// Glob, relative to `base`, selecting article files.
    pub pattern: String,
    pub base: PathBuf,
    /// Directory holding `layout.html` and `not_found.html`.
    pub templates: PathBuf,
    /// Served under `/static`.
    pub public: PathBuf,
}

impl Default for SiteConfig {
    fn default() -> Self {
        Self {
            site: DEFAULT_SITE.to_string(),
            markdown: MarkdownConfig::default(),
            redirects: BTreeMap::from([(
                "/articles/freebody/vectors".to_string(),
                "/articles/vectors".to_string(),
            )]),
            integrations: vec![Integration::Svelte, Integration::Mdx],
            content: ContentConfig::default(),
        }
    }
}

impl Default for MarkdownConfig {
    fn default() -> Self {
        Self {
            remark_plugins: vec![RemarkPlugin::Math],
            rehype_plugins: vec![RehypePlugin::Katex],
            shiki_config: ShikiConfig::default(),
        }
    }
}

impl Default for ThemesConfig {
    fn default() -> Self {
        Self {
            light: "github-light".to_string(),
            dark: "github-dark".to_string(),
        }
    }
}

impl Default for ContentConfig {
    fn default() -> Self {
        Self {
            pattern: "**/*.md".to_string(),
            base: PathBuf::from("./src/articles"),
            templates: PathBuf::from("templates"),
            public: PathBuf::from("public"),
        }
    }
}

impl MarkdownConfig {
    /// Math is typeset only when it is both parsed and rendered.
    pub fn math_enabled(&self) -> bool {
        self.remark_plugins.contains(&RemarkPlugin::Math)
            && self.rehype_plugins.contains(&RehypePlugin::Katex)
    }

    pub fn themes(&self) -> &ThemesConfig {
        &self.shiki_config.themes
    }
}

impl SiteConfig {
    /// Reads and validates the config file. A missing file is not an error.
    pub async fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        match fs::read_to_string(path).await {
            Ok(raw) => {
                info!(path = %path.display(), "loading site config");
                Self::from_toml_str(&raw)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                warn!(path = %path.display(), "site config not found, using defaults");
                let config = Self::default();
                config.validate()?;
                Ok(config)
            }
            Err(source) => Err(ConfigError::Io {
                path: path.to_path_buf(),
                source,
            }),
        }
    }

    pub fn from_toml_str(raw: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let origin =
            Url::parse(&self.site).map_err(|_| ConfigError::InvalidSite(self.site.clone()))?;
        if !matches!(origin.scheme(), "http" | "https") || origin.host_str().is_none() {
            return Err(ConfigError::InvalidSite(self.site.clone()));
        }

        for (from, to) in &self.redirects {
            let invalid = |reason| ConfigError::InvalidRedirect {
                from: from.clone(),
                to: to.clone(),
                reason,
            };
            if !from.starts_with('/') || !to.starts_with('/') {
                return Err(invalid("paths must start with '/'"));
            }
            if from.trim_end_matches('/') == to.trim_end_matches('/') {
                return Err(invalid("redirects to itself"));
            }
        }
        Ok(())
    }

    /// Joins a site-relative path onto the origin.
    pub fn absolute_url(&self, path: &str) -> String {
        format!(
            "{}/{}",
            self.site.trim_end_matches('/'),
            path.trim_start_matches('/')
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_describe_the_canonical_site() {
        let config = SiteConfig::default();
        config.validate().unwrap();

        assert_eq!(config.site, "https://timhall.github.io");
        assert_eq!(config.markdown.themes().light, "github-light");
        assert_eq!(config.markdown.themes().dark, "github-dark");
        assert!(config.markdown.math_enabled());
        assert_eq!(
            config.redirects.get("/articles/freebody/vectors").map(String::as_str),
            Some("/articles/vectors")
        );
        assert_eq!(config.redirects.len(), 1);
        assert_eq!(config.integrations, vec![Integration::Svelte, Integration::Mdx]);
        assert_eq!(config.content.pattern, "**/*.md");
        assert_eq!(config.content.base, PathBuf::from("./src/articles"));
    }

    #[test]
    fn shipped_site_toml_matches_defaults() {
        let shipped = SiteConfig::from_toml_str(include_str!("../site.toml")).unwrap();
        let defaults = SiteConfig::default();

        assert_eq!(shipped.site, defaults.site);
        assert_eq!(shipped.redirects, defaults.redirects);
        assert_eq!(shipped.integrations, defaults.integrations);
        assert_eq!(shipped.markdown.themes(), defaults.markdown.themes());
        assert_eq!(shipped.content.pattern, defaults.content.pattern);
        assert_eq!(shipped.content.base, defaults.content.base);
    }

    #[test]
    fn empty_file_is_the_default_config() {
        let config = SiteConfig::from_toml_str("").unwrap();
        assert_eq!(config.site, DEFAULT_SITE);
        assert_eq!(config.markdown.themes(), &ThemesConfig::default());
    }

    #[test]
    fn sections_override_independently() {
        let raw = r#"
            site = "https://example.com/"
            integrations = ["mdx"]

            [markdown]
            remark_plugins = []

            [markdown.shiki_config.themes]
            dark = "base16-ocean.dark"

            [redirects]
            "/old" = "/new"
        "#;
        let config = SiteConfig::from_toml_str(raw).unwrap();

        assert_eq!(config.integrations, vec![Integration::Mdx]);
        assert!(!config.markdown.math_enabled());
        assert_eq!(config.markdown.themes().light, "github-light");
        assert_eq!(config.markdown.themes().dark, "base16-ocean.dark");
        assert_eq!(config.redirects.len(), 1);
        assert_eq!(config.redirects["/old"], "/new");
        assert_eq!(config.content.base, PathBuf::from("./src/articles"));
    }

    #[test]
    fn rejects_relative_site_origin() {
        let err = SiteConfig::from_toml_str(r#"site = "timhall.github.io""#).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidSite(_)));

        let err = SiteConfig::from_toml_str(r#"site = "ftp://example.com""#).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidSite(_)));
    }

    #[test]
    fn rejects_unknown_integration_and_fields() {
        let err = SiteConfig::from_toml_str(r#"integrations = ["react"]"#).unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));

        let err = SiteConfig::from_toml_str(r#"base_url = "https://example.com""#).unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[test]
    fn rejects_malformed_redirects() {
        let err = SiteConfig::from_toml_str("[redirects]\n\"old\" = \"/new\"").unwrap_err();
        assert!(matches!(err, ConfigError::InvalidRedirect { .. }));

        let err = SiteConfig::from_toml_str("[redirects]\n\"/a/\" = \"/a\"").unwrap_err();
        assert!(err.to_string().contains("redirects to itself"));
    }

    #[test]
    fn absolute_url_joins_without_doubled_slashes() {
        let mut config = SiteConfig::default();
        assert_eq!(
            config.absolute_url("/articles/vectors"),
            "https://timhall.github.io/articles/vectors"
        );
        config.site = "https://example.com/".to_string();
        assert_eq!(config.absolute_url("rss.xml"), "https://example.com/rss.xml");
    }

    #[tokio::test]
    async fn missing_file_falls_back_to_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = SiteConfig::load(dir.path().join("site.toml")).await.unwrap();
        assert_eq!(config.site, DEFAULT_SITE);
    }

    #[tokio::test]
    async fn malformed_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("site.toml");
        std::fs::write(&path, "site = [").unwrap();
        assert!(matches!(
            SiteConfig::load(&path).await,
            Err(ConfigError::Parse(_))
        ));
    }
}
