mod collection;
mod config;
mod content_loader;
mod highlight;
mod hot_reload;
mod markdown;
mod models;
mod redirects;
mod state;

use std::{net::SocketAddr, process::ExitCode, sync::Arc};

use axum::{
    extract::{Path, Request, State},
    http::{header, StatusCode},
    middleware::{self, Next},
    response::{Html, IntoResponse, Response},
    routing::{get, get_service},
    Router,
};
use thiserror::Error;
use tokio::{net::TcpListener, sync::{broadcast, RwLock}};
use tower_http::services::ServeDir;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use tracing::{debug, error, info};

use crate::config::{ConfigError, SiteConfig, DEFAULT_CONFIG_PATH};
use crate::content_loader::{load_content, LoadError, LoadedContent};
use crate::highlight::{HighlightError, Highlighter};
use crate::hot_reload::{start_content_watcher, ws_handler, HOT_RELOAD_SCRIPT};
use crate::markdown::MarkdownRenderer;
use crate::models::Article;
use crate::redirects::RedirectTable;
use crate::state::{AppState, RouterState};

#[derive(Debug, Error)]
enum StartupError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Highlight(#[from] HighlightError),

    #[error(transparent)]
    Load(#[from] LoadError),

    #[error("server error: {0}")]
    Io(#[from] std::io::Error),
}

struct Page<'a> {
    title: &'a str,
    path: &'a str,
    content: &'a str,
}

fn format_date(date: chrono::NaiveDate) -> String {
    date.format("%B %-d, %Y").to_string()
}

fn render_with_layout(
    layout: &str,
    config: &SiteConfig,
    page: Page<'_>,
    articles: &[Article],
    is_development: bool,
) -> String {
    let mut list_items = String::new();
    for article in articles {
        list_items.push_str(&format!(
            "<li><a href=\"/articles/{}\">{}</a></li>",
            htmlescape::encode_minimal(&article.slug),
            htmlescape::encode_minimal(&article.front_matter.title)
        ));
    }

    let title = htmlescape::encode_minimal(page.title);
    let canonical = htmlescape::encode_minimal(&config.absolute_url(page.path));
    let mut html = fill_placeholders(
        layout,
        &[
            ("{{ title }}", title.as_str()),
            ("{{ canonical }}", canonical.as_str()),
            ("{{ content }}", page.content),
            ("{{ articles }}", list_items.as_str()),
        ],
    );

    if is_development {
        if let Some(at) = html.rfind("</body>") {
            html.insert_str(at, HOT_RELOAD_SCRIPT);
        }
    }

    html
}

/// Substitutes placeholders in one pass, so inserted values are never rescanned.
fn fill_placeholders(template: &str, values: &[(&str, &str)]) -> String {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;
    while let Some(start) = rest.find("{{") {
        out.push_str(&rest[..start]);
        let tail = &rest[start..];
        match values.iter().find(|(key, _)| tail.starts_with(key)) {
            Some((key, value)) => {
                out.push_str(value);
                rest = &tail[key.len()..];
            }
            None => {
                out.push_str("{{");
                rest = &tail[2..];
            }
        }
    }
    out.push_str(rest);
    out
}

fn article_body(article: &Article) -> String {
    let fm = &article.front_matter;
    let mut dates = Vec::new();
    if let Some(published) = fm.published_at {
        dates.push(format!(
            "Published <time datetime=\"{published}\">{}</time>",
            format_date(published)
        ));
    }
    if let Some(updated) = fm.updated_at {
        dates.push(format!(
            "Updated <time datetime=\"{updated}\">{}</time>",
            format_date(updated)
        ));
    }

    let dates = if dates.is_empty() {
        String::new()
    } else {
        format!("<p class=\"dates\">{}</p>", dates.join(" &middot; "))
    };
    format!(
        "<article><h1>{}</h1>{dates}{}</article>",
        htmlescape::encode_minimal(&fm.title),
        article.html
    )
}

async fn homepage(State(state): State<Arc<AppState>>) -> Html<String> {
    let templates = state.templates.read().await;
    let articles = state.articles.read().await;

    let mut content = String::from("<h1>Articles</h1><ul class=\"articles\">");
    for article in articles.iter() {
        let date = article
            .front_matter
            .published_at
            .map(|d| format!(" <time datetime=\"{d}\">{}</time>", format_date(d)))
            .unwrap_or_default();
        content.push_str(&format!(
            "<li><a href=\"/articles/{}\">{}</a>{date}</li>",
            htmlescape::encode_minimal(&article.slug),
            htmlescape::encode_minimal(&article.front_matter.title)
        ));
    }
    content.push_str("</ul>");

    let page = Page {
        title: "Articles",
        path: "/",
        content: &content,
    };
    Html(render_with_layout(
        &templates.layout,
        &state.config,
        page,
        &articles,
        state.is_development,
    ))
}

async fn render_article(
    Path(slug): Path<String>,
    State(state): State<Arc<AppState>>,
) -> Response {
    let slug = slug.trim_end_matches('/');
    let templates = state.templates.read().await;
    let articles = state.articles.read().await;

    let path = format!("/articles/{slug}");
    match articles.iter().find(|a| a.slug == slug) {
        Some(article) => {
            debug!(id = %article.id, path = %article.path.display(), "serving article");
            let body = article_body(article);
            let page = Page {
                title: &article.front_matter.title,
                path: &path,
                content: &body,
            };
            Html(render_with_layout(
                &templates.layout,
                &state.config,
                page,
                &articles,
                state.is_development,
            ))
            .into_response()
        }
        None => {
            debug!(%slug, "article not found");
            let body = templates
                .not_found
                .replace("{{slug}}", &htmlescape::encode_minimal(slug));
            let page = Page {
                title: "Not found",
                path: &path,
                content: &body,
            };
            let html = render_with_layout(
                &templates.layout,
                &state.config,
                page,
                &articles,
                state.is_development,
            );
            (StatusCode::NOT_FOUND, Html(html)).into_response()
        }
    }
}

async fn highlight_css(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    (
        [(header::CONTENT_TYPE, "text/css; charset=utf-8")],
        state.highlighter.stylesheet().to_string(),
    )
}

/// Answers redirect sources before routing.
async fn apply_redirects(
    State(state): State<Arc<AppState>>,
    request: Request,
    next: Next,
) -> Response {
    if let Some(to) = state.redirects.resolve(request.uri().path()) {
        debug!(from = %request.uri().path(), %to, "redirecting");
        return (StatusCode::MOVED_PERMANENTLY, [(header::LOCATION, to.to_string())]).into_response();
    }
    next.run(request).await
}

fn app(router_state: RouterState) -> Router {
    let static_dir = get_service(ServeDir::new(&router_state.app_state.config.content.public));

    Router::new()
        .route("/", get(homepage))
        .route("/articles/{*slug}", get(render_article))
        .route("/highlight.css", get(highlight_css))
        .nest_service("/static", static_dir)
        .route("/ws", get(ws_handler))
        .layer(middleware::from_fn_with_state(
            router_state.clone(),
            apply_redirects,
        ))
        .with_state(router_state)
}

async fn build_state(config: SiteConfig, is_development: bool) -> Result<Arc<AppState>, StartupError> {
    let highlighter = Arc::new(Highlighter::new(config.markdown.themes())?);
    let renderer = MarkdownRenderer::new(&config.markdown, highlighter.clone());
    let redirects = RedirectTable::from_config(&config.redirects);
    for rule in redirects.iter() {
        debug!(from = %rule.from, to = %rule.to, "redirect");
    }

    let LoadedContent { templates, articles } = load_content(&config, &renderer).await?;
    info!(articles = articles.len(), redirects = redirects.len(), "content loaded");

    Ok(Arc::new(AppState {
        config,
        highlighter,
        renderer,
        redirects,
        templates: RwLock::new(templates),
        articles: RwLock::new(articles),
        is_development,
    }))
}

async fn run(is_development: bool) -> Result<(), StartupError> {
    let config_path =
        std::env::var("SITE_CONFIG").unwrap_or_else(|_| DEFAULT_CONFIG_PATH.to_string());
    let config = SiteConfig::load(&config_path).await?;
    info!(
        site = %config.site,
        light = %config.markdown.themes().light,
        dark = %config.markdown.themes().dark,
        math = config.markdown.math_enabled(),
        integrations = ?config.integrations,
        "site configured"
    );

    let state = build_state(config, is_development).await?;
    debug!(themes = ?state.highlighter.themes(), "highlighter ready");

    // Hot-reload setup
    let (tx, _rx) = broadcast::channel(1);
    if is_development {
        info!("Hot reload enabled. Check logs for file change events.");
        start_content_watcher(tx.clone(), state.clone());
    }

    let router_state = RouterState {
        app_state: state,
        broadcaster: tx,
    };

    let port: u16 = std::env::var("PORT")
        .ok()
        .and_then(|p| p.parse().ok())
        .unwrap_or(8080);
    let addr = SocketAddr::from(([0, 0, 0, 0], port));

    info!(%addr, "listening");
    let listener = TcpListener::bind(addr).await?;
    axum::serve(listener, app(router_state)).await?;
    Ok(())
}

#[tokio::main]
async fn main() -> ExitCode {
    let is_development = std::env::var("RUST_ENV")
        .map(|v| v == "development")
        .unwrap_or(false);

    // logging
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("RUST_ENV is set to development: {}", is_development);

    match run(is_development).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{}", e);
            ExitCode::FAILURE
        }
    }
}

#[cfg(test)]
mod tests {
    use std::fs;

    use axum::body::{to_bytes, Body};
    use axum::http::Request;
    use tower::ServiceExt;

    use super::*;

    const LAYOUT: &str = "<html><head><title>{{ title }}</title>\
        <link rel=\"canonical\" href=\"{{ canonical }}\"></head>\
        <body><nav><ul>{{ articles }}</ul></nav><main>{{ content }}</main></body></html>";

    async fn test_app(dir: &std::path::Path) -> Router {
        let templates = dir.join("templates");
        let articles = dir.join("articles");
        fs::create_dir_all(&templates).unwrap();
        fs::create_dir_all(articles.join("freebody")).unwrap();
        fs::write(templates.join("layout.html"), LAYOUT).unwrap();
        fs::write(templates.join("not_found.html"), "<p>No article {{slug}}</p>").unwrap();
        fs::write(
            articles.join("freebody/vectors.md"),
            "---\ntitle: Vectors\nslug: vectors\npublishedAt: 2020-05-01\n---\nMagnitude \\(|v|\\).\n",
        )
        .unwrap();

        let mut config = SiteConfig::default();
        config.content.base = articles;
        config.content.templates = templates;
        config.content.public = dir.join("public");

        let state = build_state(config, false).await.unwrap();
        let (tx, _rx) = broadcast::channel(1);
        app(RouterState {
            app_state: state,
            broadcaster: tx,
        })
    }

    async fn get(app: Router, uri: &str) -> Response {
        app.oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap()
    }

    async fn body_text(response: Response) -> String {
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    #[tokio::test]
    async fn old_vectors_path_redirects_permanently() {
        let dir = tempfile::tempdir().unwrap();
        let response = get(test_app(dir.path()).await, "/articles/freebody/vectors").await;

        assert_eq!(response.status(), StatusCode::MOVED_PERMANENTLY);
        assert_eq!(response.headers()[header::LOCATION], "/articles/vectors");
    }

    #[tokio::test]
    async fn article_page_renders_title_dates_and_canonical_url() {
        let dir = tempfile::tempdir().unwrap();
        let response = get(test_app(dir.path()).await, "/articles/vectors").await;
        assert_eq!(response.status(), StatusCode::OK);

        let html = body_text(response).await;
        assert!(html.contains("<title>Vectors</title>"));
        assert!(html.contains("<h1>Vectors</h1>"));
        assert!(html.contains("datetime=\"2020-05-01\""));
        assert!(html.contains("href=\"https://timhall.github.io/articles/vectors\""));
        assert!(html.contains("katex"));
    }

    #[tokio::test]
    async fn unknown_article_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let response = get(test_app(dir.path()).await, "/articles/nope").await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        assert!(body_text(response).await.contains("No article nope"));
    }

    #[tokio::test]
    async fn homepage_lists_articles() {
        let dir = tempfile::tempdir().unwrap();
        let html = body_text(get(test_app(dir.path()).await, "/").await).await;
        assert!(html.contains("<a href=\"/articles/vectors\">Vectors</a>"));
        assert!(html.contains("May 1, 2020"));
    }

    #[tokio::test]
    async fn highlight_stylesheet_is_served() {
        let dir = tempfile::tempdir().unwrap();
        let response = get(test_app(dir.path()).await, "/highlight.css").await;
        assert_eq!(response.status(), StatusCode::OK);
        assert!(body_text(response).await.contains("prefers-color-scheme: dark"));
    }

    #[test]
    fn inserted_text_is_not_substituted_again() {
        let config = SiteConfig::default();
        let page = Page {
            title: "About {{ content }}",
            path: "/articles/templates",
            content: "<p>Write {{ articles }} in the layout.</p>",
        };
        let html = render_with_layout(LAYOUT, &config, page, &[], false);
        assert!(html.contains("<title>About {{ content }}</title>"));
        assert!(html.contains("<main><p>Write {{ articles }} in the layout.</p></main>"));
    }

    #[test]
    fn unknown_placeholders_are_left_alone() {
        let html = fill_placeholders("{{ x }} {{ title }}", &[("{{ title }}", "T")]);
        assert_eq!(html, "{{ x }} T");
    }

    #[test]
    fn development_layout_gets_reload_script() {
        let config = SiteConfig::default();
        let page = Page {
            title: "T",
            path: "/",
            content: "",
        };
        let html = render_with_layout("<body></body>", &config, page, &[], true);
        assert!(html.contains("new WebSocket"));
    }
}
