//! Content collections: a glob loader over a base directory plus the
//! front-matter schema every matched file must satisfy.

use std::{
    collections::HashMap,
    fs,
    path::{Path, PathBuf},
};

use globset::{GlobBuilder, GlobMatcher};
use thiserror::Error;
use tracing::{debug, info, warn};
use walkdir::{DirEntry, WalkDir};

use crate::config::ContentConfig;
use crate::markdown::MarkdownRenderer;
use crate::models::{derive_slug, Article, FrontMatter, FrontMatterError};

pub const ARTICLES: &str = "articles";

#[derive(Debug, Error)]
pub enum CollectionError {
    #[error("invalid glob pattern {pattern:?}: {source}")]
    Pattern {
        pattern: String,
        #[source]
        source: globset::Error,
    },

    #[error("content directory {} does not exist", .0.display())]
    MissingBase(PathBuf),

    #[error("failed to walk {}: {source}", path.display())]
    Walk {
        path: PathBuf,
        #[source]
        source: walkdir::Error,
    },

    #[error("failed to read {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("collection `{collection}` has invalid entries:{}", list_errors(.errors))]
    Invalid {
        collection: String,
        errors: Vec<EntryError>,
    },
}

/// Why a single entry was rejected.
#[derive(Debug, Error)]
pub enum EntryError {
    #[error(transparent)]
    FrontMatter(#[from] FrontMatterError),

    #[error("{}: slug {slug:?} is already used by {}", path.display(), first.display())]
    DuplicateSlug {
        slug: String,
        path: PathBuf,
        first: PathBuf,
    },

    #[error("{}: no usable slug could be derived from the file name", .0.display())]
    EmptySlug(PathBuf),
}

fn list_errors(errors: &[EntryError]) -> String {
    errors.iter().map(|e| format!("\n  - {e}")).collect()
}

/// A matched file, read but not yet validated.
#[derive(Debug, Clone)]
pub struct Entry {
    /// Path relative to the base, `/`-separated, without extension.
    pub id: String,
    pub path: PathBuf,
    pub source: String,
}

#[derive(Debug, Clone)]
pub struct GlobLoader {
    pattern: String,
    base: PathBuf,
    matcher: GlobMatcher,
}

impl GlobLoader {
    /// `*` stays within one path segment; `**/` spans any number of directories,
    /// including none.
    pub fn new(pattern: &str, base: impl Into<PathBuf>) -> Result<Self, CollectionError> {
        let matcher = GlobBuilder::new(pattern)
            .literal_separator(true)
            .build()
            .map_err(|source| CollectionError::Pattern {
                pattern: pattern.to_string(),
                source,
            })?
            .compile_matcher();

        Ok(Self {
            pattern: pattern.to_string(),
            base: base.into(),
            matcher,
        })
    }

    pub fn pattern(&self) -> &str {
        &self.pattern
    }

    pub fn base(&self) -> &Path {
        &self.base
    }

    pub fn matches(&self, relative: impl AsRef<Path>) -> bool {
        self.matcher.is_match(relative.as_ref())
    }

    /// Reads every matching file under the base, ordered by id.
    pub fn entries(&self) -> Result<Vec<Entry>, CollectionError> {
        if !self.base.is_dir() {
            return Err(CollectionError::MissingBase(self.base.clone()));
        }

        let mut entries = Vec::new();
        let walker = WalkDir::new(&self.base)
            .follow_links(true)
            .into_iter()
            .filter_entry(|e| e.depth() == 0 || !is_hidden(e));
        for item in walker {
            let item = match item {
                Ok(item) => item,
                Err(e) if is_dangling_link(&e) => {
                    debug!(path = ?e.path(), "skipping broken symlink");
                    continue;
                }
                Err(source) => {
                    return Err(CollectionError::Walk {
                        path: self.base.clone(),
                        source,
                    })
                }
            };
            if !item.file_type().is_file() {
                continue;
            }
            let Ok(relative) = item.path().strip_prefix(&self.base) else {
                continue;
            };
            if !self.matches(relative) {
                debug!(path = %item.path().display(), "skipping unmatched file");
                continue;
            }

            let source = fs::read_to_string(item.path()).map_err(|source| CollectionError::Read {
                path: item.path().to_path_buf(),
                source,
            })?;
            entries.push(Entry {
                id: entry_id(relative),
                path: item.path().to_path_buf(),
                source,
            });
        }

        entries.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(entries)
    }
}

/// Dot-prefixed files and directories are not content (drafts, editor lock files).
fn is_hidden(entry: &DirEntry) -> bool {
    entry
        .file_name()
        .to_str()
        .is_some_and(|name| name.starts_with('.'))
}

/// A symlink whose target is gone, such as an Emacs `.#file` lock.
fn is_dangling_link(error: &walkdir::Error) -> bool {
    error.path().is_some_and(|path| path.is_symlink())
        && error
            .io_error()
            .is_some_and(|e| e.kind() == std::io::ErrorKind::NotFound)
}

fn entry_id(relative: &Path) -> String {
    relative
        .with_extension("")
        .components()
        .map(|c| c.as_os_str().to_string_lossy().into_owned())
        .collect::<Vec<_>>()
        .join("/")
}

/// A named, schema-checked set of content files.
#[derive(Debug, Clone)]
pub struct Collection {
    pub name: String,
    pub loader: GlobLoader,
}

impl Collection {
    pub fn articles(content: &ContentConfig) -> Result<Self, CollectionError> {
        Ok(Self {
            name: ARTICLES.to_string(),
            loader: GlobLoader::new(&content.pattern, &content.base)?,
        })
    }

    /// Validates and renders every entry. Fails if any entry is invalid, listing all of them.
    pub fn load(&self, renderer: &MarkdownRenderer) -> Result<Vec<Article>, CollectionError> {
        let entries = self.loader.entries()?;
        info!(
            collection = %self.name,
            base = %self.loader.base().display(),
            pattern = %self.loader.pattern(),
            count = entries.len(),
            "found content files"
        );

        let mut articles = Vec::with_capacity(entries.len());
        let mut errors: Vec<EntryError> = Vec::new();
        let mut seen: HashMap<String, PathBuf> = HashMap::new();

        for entry in entries {
            let (front_matter, body) = match FrontMatter::parse(&entry.source, &entry.path) {
                Ok(parsed) => parsed,
                Err(e) => {
                    warn!(path = %entry.path.display(), error = %e, "invalid front matter");
                    errors.push(e.into());
                    continue;
                }
            };

            let slug = front_matter
                .slug
                .as_deref()
                .map(|s| s.trim().trim_matches('/').to_string())
                .unwrap_or_else(|| derive_slug(&entry.id));

            if slug.is_empty() {
                warn!(path = %entry.path.display(), "empty slug");
                errors.push(EntryError::EmptySlug(entry.path));
                continue;
            }
            if let Some(first) = seen.get(&slug) {
                warn!(path = %entry.path.display(), %slug, "duplicate slug");
                errors.push(EntryError::DuplicateSlug {
                    slug,
                    path: entry.path,
                    first: first.clone(),
                });
                continue;
            }
            seen.insert(slug.clone(), entry.path.clone());

            debug!(id = %entry.id, %slug, "rendering entry");
            articles.push(Article {
                html: renderer.render(&body),
                id: entry.id,
                slug,
                path: entry.path,
                front_matter,
            });
        }

        if !errors.is_empty() {
            return Err(CollectionError::Invalid {
                collection: self.name.clone(),
                errors,
            });
        }

        // Newest first, undated last.
        articles.sort_by(|a, b| {
            b.front_matter
                .published_at
                .cmp(&a.front_matter.published_at)
                .then_with(|| a.front_matter.title.cmp(&b.front_matter.title))
        });
        Ok(articles)
    }
}
