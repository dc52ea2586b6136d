//! WebSocket relay server using Axum.
//!
//! Handles HTTP upgrade to WebSocket, fan-out of every inbound frame,
//! a health probe, and (optionally) a static asset directory.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use axum::{
    Router,
    extract::{
        ConnectInfo, State, WebSocketUpgrade,
        ws::{Message, WebSocket},
    },
    http::StatusCode,
    response::{IntoResponse, Json},
    routing::get,
};
use futures_util::{SinkExt, StreamExt};
use serde_json::json;
use tokio::sync::{OwnedSemaphorePermit, Semaphore, mpsc};
use tower_http::cors::CorsLayer;
use tower_http::services::{ServeDir, ServeFile};
use tracing::{debug, info, warn};

use crate::error::RelayError;
use crate::hub::{DEFAULT_PEER_QUEUE_CAPACITY, PeerSet};
use crate::peer::Frame;

const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

/// Relay server configuration.
#[derive(Debug, Clone)]
pub struct RelayConfig {
    /// Port to listen on (0 for OS-assigned)
    pub port: u16,
    /// Hostname to bind to
    pub hostname: String,
    /// Path the WebSocket upgrade is mounted at
    pub ws_path: String,
    /// Directory of static assets served for every other path
    pub static_dir: Option<PathBuf>,
    /// Maximum concurrent peers
    pub max_connections: Option<usize>,
    /// Frames buffered per peer; a peer that falls further behind misses frames
    pub peer_queue_capacity: usize,
    /// Send each frame back to its sender as well
    pub echo_to_sender: bool,
    /// Log every forwarded frame's content
    pub verbose_logging: bool,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            port: 3030,
            hostname: "0.0.0.0".into(),
            ws_path: "/ws".into(),
            static_dir: None,
            max_connections: Some(64),
            peer_queue_capacity: DEFAULT_PEER_QUEUE_CAPACITY,
            echo_to_sender: true,
            verbose_logging: false,
        }
    }
}

/// Shared state for the relay's handlers.
struct AppState {
    config: RelayConfig,
    peers: Arc<PeerSet>,
    /// One permit per connection slot, taken before the upgrade
    slots: Option<Arc<Semaphore>>,
}

/// The relay server. Owns the peer set and the listener task.
pub struct RelayServer {
    peers: Arc<PeerSet>,
    /// Shutdown signal
    shutdown_tx: Option<mpsc::Sender<()>>,
    /// Server task handle
    handle: Option<tokio::task::JoinHandle<()>>,
    /// Actual bound address
    local_addr: SocketAddr,
}

impl RelayServer {
    /// Bind and start serving.
    pub async fn start(config: RelayConfig) -> Result<Self, RelayError> {
        let peers = Arc::new(PeerSet::with_queue_capacity(
            config.echo_to_sender,
            config.peer_queue_capacity,
        ));
        let (shutdown_tx, mut shutdown_rx) = mpsc::channel(1);

        let addr: SocketAddr = format!("{}:{}", config.hostname, config.port).parse()?;
        let listener = tokio::net::TcpListener::bind(addr)
            .await
            .map_err(|source| RelayError::Bind { addr, source })?;
        let local_addr = listener.local_addr()?;

        info!(
            "Relay listening on ws://{}:{}{}",
            config.hostname,
            local_addr.port(),
            config.ws_path
        );
        if let Some(dir) = &config.static_dir {
            info!("Serving static assets from {}", dir.display());
        }

        let app = build_router(config, peers.clone());

        let handle = tokio::spawn(async move {
            axum::serve(
                listener,
                app.into_make_service_with_connect_info::<SocketAddr>(),
            )
            .with_graceful_shutdown(async move {
                let _ = shutdown_rx.recv().await;
            })
            .await
            .ok();
        });

        Ok(Self {
            peers,
            shutdown_tx: Some(shutdown_tx),
            handle: Some(handle),
            local_addr,
        })
    }

    /// Get the actual bound port.
    pub fn port(&self) -> u16 {
        self.local_addr.port()
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Number of currently open peers.
    pub fn peer_count(&self) -> usize {
        self.peers.len()
    }

    /// Gracefully stop the server, closing every open peer.
    pub async fn stop(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(()).await;
        }
        // Dropping the queues ends each connection task
        let closed = self.peers.clear();
        if closed > 0 {
            info!("Closed {closed} peer connections");
        }
        if let Some(mut handle) = self.handle.take() {
            if tokio::time::timeout(SHUTDOWN_GRACE, &mut handle).await.is_err() {
                warn!("Relay did not shut down within {SHUTDOWN_GRACE:?}, aborting");
                handle.abort();
            }
        }
        info!("Relay server stopped");
    }
}

/// Build the relay's router: WebSocket upgrade, health, static fallback.
pub fn build_router(config: RelayConfig, peers: Arc<PeerSet>) -> Router {
    let static_dir = config.static_dir.clone();
    let ws_path = config.ws_path.clone();

    let slots = config
        .max_connections
        .map(|max| Arc::new(Semaphore::new(max.min(Semaphore::MAX_PERMITS))));
    let state = Arc::new(AppState {
        config,
        peers,
        slots,
    });

    let router = Router::new()
        .route(&ws_path, get(ws_upgrade_handler))
        .route("/health", get(health_handler))
        .layer(CorsLayer::permissive())
        .with_state(state);

    match static_dir {
        Some(dir) => {
            let not_found = ServeFile::new(dir.join("404.html"));
            router.fallback_service(
                ServeDir::new(dir)
                    .append_index_html_on_directories(true)
                    .not_found_service(not_found),
            )
        }
        None => router,
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// HTTP Handlers
// ─────────────────────────────────────────────────────────────────────────────

async fn ws_upgrade_handler(
    ws: WebSocketUpgrade,
    ConnectInfo(remote): ConnectInfo<SocketAddr>,
    State(state): State<Arc<AppState>>,
) -> impl IntoResponse {
    // Held by the connection task until it ends
    let permit = match &state.slots {
        Some(slots) => match slots.clone().try_acquire_owned() {
            Ok(permit) => Some(permit),
            Err(_) => {
                warn!(
                    "Connection from {remote} rejected: max connections reached ({})",
                    state.config.max_connections.unwrap_or_default()
                );
                return StatusCode::SERVICE_UNAVAILABLE.into_response();
            }
        },
        None => None,
    };

    ws.on_upgrade(move |socket| handle_ws_connection(socket, remote, state, permit))
        .into_response()
}

async fn health_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(json!({
        "status": "ok",
        "peers": state.peers.len(),
        "echo": state.peers.echo_to_sender(),
    }))
}

// ─────────────────────────────────────────────────────────────────────────────
// WebSocket Connection Handler
// ─────────────────────────────────────────────────────────────────────────────

async fn handle_ws_connection(
    socket: WebSocket,
    remote: SocketAddr,
    state: Arc<AppState>,
    _permit: Option<OwnedSemaphorePermit>,
) {
    let (peer_id, mut outbound_rx) = state.peers.register(Some(remote));
    info!("[+] Peer connected: {peer_id} from {remote} (total: {})", state.peers.len());

    let (mut ws_tx, mut ws_rx) = socket.split();

    loop {
        tokio::select! {
            // Incoming frame from this peer
            msg = ws_rx.next() => {
                let frame = match msg {
                    Some(Ok(Message::Text(text))) => Frame::Text(text),
                    Some(Ok(Message::Binary(data))) => Frame::Binary(data),
                    Some(Ok(Message::Ping(data))) => {
                        if ws_tx.send(Message::Pong(data)).await.is_err() {
                            break;
                        }
                        continue;
                    }
                    Some(Ok(Message::Close(_))) | None => {
                        debug!("Peer closed: {peer_id}");
                        break;
                    }
                    Some(Err(e)) => {
                        warn!("WebSocket error for {peer_id}: {e}");
                        break;
                    }
                    Some(Ok(Message::Pong(_))) => continue,
                };

                if state.config.verbose_logging {
                    if let Frame::Text(text) = &frame {
                        debug!("Received from {peer_id}: {}", text.as_str());
                    }
                }

                let report = state.peers.fan_out(&peer_id, &frame);
                debug!(
                    "Forwarded {} bytes from {peer_id} to {} peers ({} skipped)",
                    frame.len(),
                    report.delivered,
                    report.skipped
                );
            }

            // Frames fanned out to this peer
            frame = outbound_rx.recv() => {
                let Some(frame) = frame else {
                    // Removed from the peer set (server stopping)
                    let _ = ws_tx.send(Message::Close(None)).await;
                    break;
                };
                let message = match frame {
                    Frame::Text(text) => Message::Text(text),
                    Frame::Binary(data) => Message::Binary(data),
                };
                if let Err(e) = ws_tx.send(message).await {
                    debug!("Failed to forward to {peer_id}: {e}");
                    break;
                }
            }
        }
    }

    match state.peers.unregister(&peer_id) {
        Some(peer) => info!(
            "[-] Peer disconnected: {peer_id} after {:.1?} (total: {})",
            peer.connected_at.elapsed(),
            state.peers.len()
        ),
        // Already dropped by `RelayServer::stop`
        None => debug!("[-] Peer {peer_id} closed during shutdown"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::Request;
    use tower::ServiceExt;

    async fn body_string(response: axum::response::Response) -> String {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    #[tokio::test]
    async fn health_reports_peer_count() {
        let peers = Arc::new(PeerSet::new(true));
        let _a = peers.register(None);
        let _b = peers.register(None);
        let app = build_router(RelayConfig::default(), peers);

        let response = app
            .oneshot(Request::get("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let body: serde_json::Value = serde_json::from_str(&body_string(response).await).unwrap();
        assert_eq!(body["status"], "ok");
        assert_eq!(body["peers"], 2);
        assert_eq!(body["echo"], true);
    }

    #[tokio::test]
    async fn serves_static_index_and_404_page() {
        let dir = tempfile::TempDir::new().unwrap();
        std::fs::write(dir.path().join("index.html"), "<h1>vent map</h1>").unwrap();
        std::fs::write(dir.path().join("404.html"), "lost in the vents").unwrap();

        let config = RelayConfig {
            static_dir: Some(dir.path().to_path_buf()),
            ..RelayConfig::default()
        };
        let app = build_router(config, Arc::new(PeerSet::default()));

        let response = app
            .clone()
            .oneshot(Request::get("/").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_string(response).await, "<h1>vent map</h1>");

        let response = app
            .oneshot(Request::get("/missing.js").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        assert_eq!(body_string(response).await, "lost in the vents");
    }

    #[tokio::test]
    async fn no_static_dir_means_plain_404() {
        let app = build_router(RelayConfig::default(), Arc::new(PeerSet::default()));
        let response = app
            .oneshot(Request::get("/index.html").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }
}
