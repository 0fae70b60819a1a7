use std::{path::Path, sync::Arc, time::Duration};

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    response::IntoResponse,
};
use notify_debouncer_full::{
    new_debouncer, DebouncedEvent,
    notify::{RecursiveMode, Watcher, Error as NotifyError},
};
use tracing::{debug, error, info};

use crate::content_loader::reload_content;
use crate::state::{AppState, RefreshBroadcaster};

pub const HOT_RELOAD_SCRIPT: &str = r#"
<script>
    const socket = new WebSocket("ws://" + window.location.host + "/ws");
    socket.onmessage = (event) => {
        if (event.data === "reload") {
            window.location.reload();
        }
    };
</script>
"#;

pub async fn ws_handler(
    ws: WebSocketUpgrade,
    State(tx): State<RefreshBroadcaster>,
) -> impl IntoResponse {
    ws.on_upgrade(|socket| handle_socket(socket, tx))
}

async fn handle_socket(mut socket: WebSocket, tx: RefreshBroadcaster) {
    let mut rx = tx.subscribe();

    if rx.recv().await.is_ok()
        && socket.send(Message::Text("reload".into())).await.is_err()
    {
        debug!("Client disconnected before reload message could be sent");
    }
}

/// Editor scratch files (Emacs `.#foo`, `foo~` backups, vim `.swp`).
fn is_temp_file(path: &Path) -> bool {
    path.file_name()
        .and_then(|name| name.to_str())
        .is_some_and(|s| s.starts_with(".#") || s.ends_with('~') || s.ends_with(".swp"))
}

fn is_relevant(event: &DebouncedEvent) -> bool {
    let is_relevant_kind =
        event.kind.is_modify() || event.kind.is_create() || event.kind.is_remove();

    is_relevant_kind && !event.event.paths.iter().any(|path| is_temp_file(path))
}

/// Watches the article base and the templates directory; every debounced change
/// reloads content and tells connected browsers to refresh.
pub fn start_content_watcher(tx: RefreshBroadcaster, app_state: Arc<AppState>) {
    info!("Starting content watcher for hot-reload...");
    tokio::spawn(async move {
        let (watcher_tx, mut watcher_rx) = tokio::sync::mpsc::channel(1);

        let debouncer = new_debouncer(Duration::from_millis(200), None, move |res: Result<Vec<DebouncedEvent>, Vec<NotifyError>>| {
            match res {
                Ok(events) => {
                    let relevant: Vec<&DebouncedEvent> = events.iter().filter(|e| is_relevant(e)).collect();
                    if !relevant.is_empty() {
                        debug!("Relevant file change detected: {:?}", relevant.iter().flat_map(|e| &e.event.paths).map(|p| p.display()).collect::<Vec<_>>());
                        // A full channel already has a reload queued.
                        let _ = watcher_tx.try_send(());
                    }
                }
                Err(errors) => {
                    for e in errors {
                        error!("Watcher error: {}", e);
                    }
                }
            }
        });

        let mut debouncer = match debouncer {
            Ok(debouncer) => debouncer,
            Err(e) => {
                error!("Failed to create debouncer, hot reload disabled: {}", e);
                return;
            }
        };

        let content = &app_state.config.content;
        for dir in [&content.base, &content.templates] {
            if let Err(e) = debouncer.watcher().watch(dir, RecursiveMode::Recursive) {
                error!(dir = %dir.display(), "Failed to watch directory: {}", e);
            }
        }

        // Keep the debouncer alive and wait for events
        while watcher_rx.recv().await.is_some() {
            info!("Content change detected, reloading content and sending signal...");

            reload_content(&app_state).await;

            // Send reload signal to all connected WebSocket clients
            if let Err(e) = tx.send(()) {
                debug!("No clients to notify of reload: {}", e);
            }
        }
    });
}
