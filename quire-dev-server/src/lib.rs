use anyhow::Result;
use axum::{
    Router,
    extract::State,
    extract::ws::{Message, WebSocket, WebSocketUpgrade},
    response::IntoResponse,
    routing::get,
};
use std::{net::SocketAddr, path::PathBuf};
use tokio::sync::broadcast;
use tower_http::services::ServeDir;
use tracing::{debug, info, warn};

pub const LIVERELOAD_PATH: &str = "/__livereload";
const RELOAD: &str = "reload";

/// Configuration for the live development server
#[derive(Debug, Clone)]
pub struct LiveServerConfig {
    /// Address to bind to
    pub addr: SocketAddr,
    /// Directory to serve. It may be replaced wholesale between requests.
    pub root: PathBuf,
    /// Auto-open browser
    pub open: bool,
}

/// Tells connected browsers to reload. Cheap to clone.
#[derive(Clone)]
pub struct Reloader {
    tx: broadcast::Sender<String>,
}

impl Reloader {
    /// Returns how many browsers were notified.
    pub fn reload(&self) -> usize {
        self.tx.send(RELOAD.to_string()).unwrap_or(0)
    }
}

/// A static file server with a websocket that pushes reload messages.
/// It does not watch anything itself; whoever rebuilds the site calls
/// [`Reloader::reload`].
pub struct LiveServer {
    config: LiveServerConfig,
    reload_tx: broadcast::Sender<String>,
}

impl LiveServer {
    pub fn new(config: LiveServerConfig) -> Self {
        let (reload_tx, _) = broadcast::channel::<String>(16);
        Self { config, reload_tx }
    }

    /// URL the page script connects to.
    pub fn livereload_url(&self) -> String {
        format!("ws://{}{LIVERELOAD_PATH}", self.config.addr)
    }

    pub fn reloader(&self) -> Reloader {
        Reloader {
            tx: self.reload_tx.clone(),
        }
    }

    fn router(&self) -> Router {
        let state = AppState {
            reload_tx: self.reload_tx.clone(),
        };
        Router::new()
            .route(LIVERELOAD_PATH, get(websocket_handler))
            .fallback_service(ServeDir::new(&self.config.root))
            .with_state(state)
    }

    /// Serve until the process is stopped.
    pub async fn run(self) -> Result<()> {
        if !self.config.root.exists() {
            return Err(anyhow::anyhow!(
                "Root directory does not exist: {}",
                self.config.root.display()
            ));
        }

        let app = self.router();
        let addr = self.config.addr;
        let listener = tokio::net::TcpListener::bind(addr).await?;

        info!(root = %self.config.root.display(), "serving at http://{addr}");
        println!("Serving at http://{addr}");

        if self.config.open
            && let Err(e) = open::that(format!("http://{addr}"))
        {
            warn!("Failed to open browser: {e}");
        }

        axum::serve(listener, app).await?;
        Ok(())
    }
}

#[derive(Clone)]
struct AppState {
    reload_tx: broadcast::Sender<String>,
}

async fn websocket_handler(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
) -> impl IntoResponse {
    ws.on_upgrade(|socket| websocket_connection(socket, state.reload_tx))
}

async fn websocket_connection(mut socket: WebSocket, reload_tx: broadcast::Sender<String>) {
    let mut rx = reload_tx.subscribe();
    debug!("live reload client connected");

    if socket
        .send(Message::Text("connected".to_string().into()))
        .await
        .is_err()
    {
        return;
    }

    loop {
        tokio::select! {
            msg = rx.recv() => {
                match msg {
                    Ok(reload_msg) => {
                        if socket.send(Message::Text(reload_msg.into())).await.is_err() {
                            break;
                        }
                    }
                    // A slow client missed some messages; the next one still reloads it.
                    Err(broadcast::error::RecvError::Lagged(_)) => continue,
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
            msg = socket.recv() => {
                if msg.is_none() {
                    break;
                }
            }
        }
    }
    debug!("live reload client disconnected");
}

#[cfg(test)]
mod tests {
    use super::*;

    fn server() -> LiveServer {
        LiveServer::new(LiveServerConfig {
            addr: "127.0.0.1:8000".parse().unwrap(),
            root: PathBuf::from("site"),
            open: false,
        })
    }

    #[test]
    fn livereload_url_points_at_the_socket_route() {
        assert_eq!(server().livereload_url(), "ws://127.0.0.1:8000/__livereload");
    }

    #[test]
    fn reloader_reaches_subscribers() {
        let server = server();
        let reloader = server.reloader();
        assert_eq!(reloader.reload(), 0);

        let mut rx = server.reload_tx.subscribe();
        assert_eq!(reloader.reload(), 1);
        assert_eq!(rx.try_recv().unwrap(), "reload");
    }

    #[tokio::test]
    async fn run_requires_the_root_to_exist() {
        let dir = tempfile::tempdir().unwrap();
        let server = LiveServer::new(LiveServerConfig {
            addr: "127.0.0.1:0".parse().unwrap(),
            root: dir.path().join("missing"),
            open: false,
        });
        let err = server.run().await.unwrap_err();
        assert!(err.to_string().contains("does not exist"));
    }
}
