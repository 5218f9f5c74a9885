//! Server construction and execution.

use std::{net::SocketAddr, sync::Arc};

use axum::{Router, routing::get};
use tokio::{net::TcpListener, sync::oneshot, task::JoinHandle};
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use parley_shared::time::now_millis;

use crate::{
    config::ServerConfig,
    handler, http,
    signal::shutdown_signal,
    state::AppState,
};

/// One signaling server instance owning its own room table.
///
/// Instances are fully independent; tests can run several side by side with
/// different configurations and no shared state.
pub struct SignalingServer {
    state: Arc<AppState>,
}

impl SignalingServer {
    pub fn new(config: ServerConfig) -> Self {
        Self {
            state: Arc::new(AppState::new(config)),
        }
    }

    fn router(&self) -> Router {
        Router::new()
            .route("/", get(http::root).options(http::preflight))
            .route("/health", get(http::health).options(http::preflight))
            .route("/ws", get(handler::websocket_handler))
            .layer(CorsLayer::permissive())
            .layer(TraceLayer::new_for_http())
            .with_state(self.state.clone())
    }

    /// Bind and serve in background tasks, returning a handle with the
    /// bound address. Intended for tests (pass port 0 for an OS-assigned
    /// port) and embedding.
    pub async fn bind(self) -> std::io::Result<BoundServer> {
        let listener = TcpListener::bind(self.state.config.bind_addr()).await?;
        let addr = listener.local_addr()?;
        let sweeper = spawn_sweeper(self.state.clone());
        let app = self.router();

        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
        let serve_task = tokio::spawn(async move {
            let serve = axum::serve(listener, app).with_graceful_shutdown(async {
                let _ = shutdown_rx.await;
            });
            if let Err(e) = serve.await {
                tracing::error!("server error: {e}");
            }
        });

        tracing::info!("signaling server listening on {addr}");
        Ok(BoundServer {
            addr,
            sweeper,
            shutdown_tx: Some(shutdown_tx),
            serve_task: Some(serve_task),
        })
    }

    /// Run in the foreground until a termination signal arrives, then stop
    /// accepting connections and drain before exiting.
    pub async fn run(self) -> Result<(), Box<dyn std::error::Error>> {
        let listener = TcpListener::bind(self.state.config.bind_addr()).await?;
        let addr = listener.local_addr()?;
        let sweeper = spawn_sweeper(self.state.clone());

        tracing::info!("signaling server listening on {addr}");
        tracing::info!("connect to: ws://{addr}/ws");
        tracing::info!("health check available at http://{addr}/health");

        axum::serve(listener, self.router())
            .with_graceful_shutdown(shutdown_signal())
            .await?;

        sweeper.abort();
        tracing::info!("server shutdown complete");
        Ok(())
    }
}

/// A server bound via [`SignalingServer::bind`].
pub struct BoundServer {
    addr: SocketAddr,
    sweeper: JoinHandle<()>,
    shutdown_tx: Option<oneshot::Sender<()>>,
    serve_task: Option<JoinHandle<()>>,
}

impl BoundServer {
    pub fn local_addr(&self) -> SocketAddr {
        self.addr
    }

    pub fn ws_url(&self) -> String {
        format!("ws://{}/ws", self.addr)
    }

    pub fn http_url(&self) -> String {
        format!("http://{}", self.addr)
    }

    /// Stop accepting connections and wait for the serve task to finish.
    pub async fn shutdown(mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
        self.sweeper.abort();
        if let Some(task) = self.serve_task.take() {
            let _ = task.await;
        }
    }
}

impl Drop for BoundServer {
    fn drop(&mut self) {
        self.sweeper.abort();
        if let Some(task) = self.serve_task.take() {
            task.abort();
        }
    }
}

/// Second line of defense behind the deferred per-room deletion: a periodic
/// sweep garbage-collecting rooms that stayed empty past the maximum age.
fn spawn_sweeper(state: Arc<AppState>) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(state.config.sweep_interval);
        interval.tick().await; // the first tick completes immediately
        loop {
            interval.tick().await;
            let now = now_millis();
            let max_age = state.config.max_empty_age.as_millis() as i64;
            let mut rooms = state.rooms.lock().await;
            rooms.retain(|room_id, room| {
                let stale =
                    room.is_empty() && room.emptied_at.is_some_and(|t| now - t > max_age);
                if stale {
                    tracing::info!(room = %room_id, "swept stale empty room");
                }
                !stale
            });
        }
    })
}
