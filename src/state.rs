use std::sync::Arc;
use tokio::sync::{broadcast, RwLock};

use crate::config::SiteConfig;
use crate::highlight::Highlighter;
use crate::markdown::MarkdownRenderer;
use crate::models::Article;
use crate::redirects::RedirectTable;

pub type RefreshBroadcaster = broadcast::Sender<()>;

#[derive(Debug, Clone)]
pub struct Templates {
    pub layout: String,
    pub not_found: String, // supports {{slug}} placeholder
}

pub struct AppState {
    pub config: SiteConfig,
    pub highlighter: Arc<Highlighter>,
    pub renderer: MarkdownRenderer,
    pub redirects: RedirectTable,
    pub templates: RwLock<Templates>,
    pub articles: RwLock<Vec<Article>>,
    pub is_development: bool,
}

#[derive(Clone)]
pub struct RouterState {
    pub app_state: Arc<AppState>,
    pub broadcaster: RefreshBroadcaster,
}

impl axum::extract::FromRef<RouterState> for Arc<AppState> {
    fn from_ref(state: &RouterState) -> Self {
        state.app_state.clone()
    }
}

impl axum::extract::FromRef<RouterState> for RefreshBroadcaster {
    fn from_ref(state: &RouterState) -> Self {
        state.broadcaster.clone()
    }
}
