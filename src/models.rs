use std::path::{Path, PathBuf};

use chrono::{DateTime, NaiveDate};
use gray_matter::{engine::YAML, Matter};
use serde::Deserialize;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum FrontMatterError {
    #[error("{}: no front matter found (field `title` is required)", path.display())]
    Missing { path: PathBuf },

    #[error("{}: {message}", path.display())]
    Invalid { path: PathBuf, message: String },

    #[error("{}: field `{field}` {reason}", path.display())]
    Field {
        path: PathBuf,
        field: &'static str,
        reason: String,
    },
}

/// Header as written in the file, before dates are checked.
#[derive(Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
struct RawFrontMatter {
    title: String,
    #[serde(default)]
    slug: Option<String>,
    #[serde(default)]
    published_at: Option<String>,
    #[serde(default)]
    updated_at: Option<String>,
}

/// Validated article header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrontMatter {
    pub title: String,
    pub slug: Option<String>,
    pub published_at: Option<NaiveDate>,
    pub updated_at: Option<NaiveDate>,
}

#[derive(Debug, Clone)]
pub struct Article {
    /// Path relative to the collection base, without extension.
    pub id: String,
    pub slug: String,
    pub path: PathBuf,
    pub front_matter: FrontMatter,
    pub html: String,
}

impl FrontMatter {
    /// Splits the YAML header off `source` and validates it.
    /// Returns the header and the markdown body.
    pub fn parse(source: &str, path: &Path) -> Result<(Self, String), FrontMatterError> {
        let matter = Matter::<YAML>::new();
        let parsed = matter
            .parse::<RawFrontMatter>(source)
            .map_err(|e| FrontMatterError::Invalid {
                path: path.to_path_buf(),
                message: e.to_string(),
            })?;

        let raw = parsed.data.ok_or_else(|| FrontMatterError::Missing {
            path: path.to_path_buf(),
        })?;

        let front_matter = Self {
            title: raw.title,
            slug: raw.slug,
            published_at: parse_date(path, "publishedAt", raw.published_at.as_deref())?,
            updated_at: parse_date(path, "updatedAt", raw.updated_at.as_deref())?,
        };
        front_matter.validate(path)?;

        Ok((front_matter, parsed.content))
    }

    pub fn validate(&self, path: &Path) -> Result<(), FrontMatterError> {
        let field_error = |field, reason: &str| FrontMatterError::Field {
            path: path.to_path_buf(),
            field,
            reason: reason.to_string(),
        };

        if self.title.trim().is_empty() {
            return Err(field_error("title", "must not be empty"));
        }
        if self
            .slug
            .as_deref()
            .is_some_and(|s| s.trim().trim_matches('/').is_empty())
        {
            return Err(field_error("slug", "must not be empty when set"));
        }
        Ok(())
    }
}

/// Accepts `YYYY-MM-DD` or an RFC 3339 timestamp.
fn parse_date(
    path: &Path,
    field: &'static str,
    value: Option<&str>,
) -> Result<Option<NaiveDate>, FrontMatterError> {
    let Some(value) = value.map(str::trim) else {
        return Ok(None);
    };

    NaiveDate::parse_from_str(value, "%Y-%m-%d")
        .or_else(|_| DateTime::parse_from_rfc3339(value).map(|dt| dt.date_naive()))
        .map(Some)
        .map_err(|_| FrontMatterError::Field {
            path: path.to_path_buf(),
            field,
            reason: format!("has invalid date {value:?}, expected YYYY-MM-DD or RFC 3339"),
        })
}

/// Lowercases, turns whitespace into `-` and drops punctuation.
pub fn slugify(segment: &str) -> String {
    segment
        .trim()
        .to_lowercase()
        .chars()
        .filter_map(|c| match c {
            c if c.is_alphanumeric() || c == '-' || c == '_' => Some(c),
            c if c.is_whitespace() => Some('-'),
            _ => None,
        })
        .collect()
}

/// Slug used when the header does not set one: the entry id, slugified per segment.
pub fn derive_slug(id: &str) -> String {
    id.split('/')
        .map(slugify)
        .filter(|segment| !segment.is_empty())
        .collect::<Vec<_>>()
        .join("/")
}
