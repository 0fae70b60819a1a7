use std::path::{Path, PathBuf};

use thiserror::Error;
use tokio::fs;
use tracing::{error, info};

use crate::collection::{Collection, CollectionError};
use crate::config::SiteConfig;
use crate::markdown::MarkdownRenderer;
use crate::models::Article;
use crate::state::{AppState, Templates};

#[derive(Debug, Error)]
pub enum LoadError {
    #[error("failed to read template {}: {source}", path.display())]
    Template {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Collection(#[from] CollectionError),

    #[error("content loading task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

pub struct LoadedContent {
    pub templates: Templates,
    pub articles: Vec<Article>,
}

async fn read_template(dir: &Path, name: &str) -> Result<String, LoadError> {
    let path = dir.join(name);
    fs::read_to_string(&path)
        .await
        .map_err(|source| LoadError::Template { path, source })
}

pub async fn load_content(
    config: &SiteConfig,
    renderer: &MarkdownRenderer,
) -> Result<LoadedContent, LoadError> {
    let templates_dir = &config.content.templates;
    let templates = Templates {
        layout: read_template(templates_dir, "layout.html").await?,
        not_found: read_template(templates_dir, "not_found.html").await?,
    };

    // Walking and rendering is blocking work.
    let collection = Collection::articles(&config.content)?;
    let renderer = renderer.clone();
    let articles = tokio::task::spawn_blocking(move || collection.load(&renderer)).await??;

    Ok(LoadedContent { templates, articles })
}

/// Swaps in freshly loaded content. On failure the previous content stays live.
pub async fn reload_content(app_state: &AppState) {
    info!("Reloading application content...");
    match load_content(&app_state.config, &app_state.renderer).await {
        Ok(LoadedContent { templates, articles }) => {
            let count = articles.len();
            *app_state.templates.write().await = templates;
            *app_state.articles.write().await = articles;
            info!(articles = count, "Content successfully reloaded.");
        }
        Err(e) => {
            error!("Failed to reload content, keeping previous version: {}", e);
        }
    }
}
