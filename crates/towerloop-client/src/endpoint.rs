//! One physical connection: its status, subscribers, worker and heartbeat.
//!
//! Status machine:
//!
//! ```text
//! DISCONNECTED ──▶ CONNECTING ──▶ CONNECTED
//!      ▲               │              │
//!      │               ▼              ▼
//!      └──────────── ERROR ◀──────────┘   (clean close skips ERROR)
//! ```
//!
//! After every drop back to DISCONNECTED the worker sleeps for the retry
//! interval and starts over at CONNECTING.

use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use parking_lot::{Mutex, ReentrantMutex};
use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async, tungstenite::Message};
use tokio_util::sync::CancellationToken;
use towerloop_protocol::{ConnectionStatus, Event, EventTypes};
use tracing::{debug, info, trace, warn};
use url::Url;

use crate::config::ClientConfig;
use crate::error::ClientError;
use crate::subscriber::{self, Callback, SubscriberId, Subscribers};

type Socket = WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>;

struct EndpointState {
    status: ConnectionStatus,
    subscribers: Subscribers,
    /// Queue into the open socket; present only while CONNECTED
    outbound: Option<mpsc::UnboundedSender<Message>>,
    worker_running: bool,
}

pub(crate) struct Endpoint {
    /// Resolved address, or the raw one if it did not resolve
    pub address: String,
    url: Result<Url, String>,
    state: Mutex<EndpointState>,
    /// Serialises every delivery to this endpoint's subscribers. Reentrant
    /// so a callback may subscribe or publish on the same endpoint.
    dispatch_guard: ReentrantMutex<()>,
    cancel: CancellationToken,
}

impl Endpoint {
    pub fn new(address: String, url: Result<Url, String>, cancel: CancellationToken) -> Self {
        Self {
            address,
            url,
            state: Mutex::new(EndpointState {
                status: ConnectionStatus::Disconnected,
                subscribers: Subscribers::default(),
                outbound: None,
                worker_running: false,
            }),
            dispatch_guard: ReentrantMutex::new(()),
            cancel,
        }
    }

    pub fn status(&self) -> ConnectionStatus {
        self.state.lock().status
    }

    pub fn subscriber_count(&self) -> usize {
        self.state.lock().subscribers.len()
    }

    /// Stop the worker and heartbeat for good.
    pub fn shutdown(&self) {
        self.cancel.cancel();
    }

    /// Register `callback` and hand it the current status before any later
    /// transition can reach it.
    pub fn subscribe(&self, callback: Callback) -> SubscriberId {
        let _guard = self.dispatch_guard.lock();
        let (id, status) = {
            let mut state = self.state.lock();
            (state.subscribers.add(callback.clone()), state.status)
        };
        subscriber::deliver(id, &callback, &Event::status(status), &self.address);
        id
    }

    pub fn unsubscribe(&self, id: SubscriberId) -> bool {
        self.state.lock().subscribers.remove(id)
    }

    /// Queue an event on the open socket.
    pub fn send(&self, event: &Event) -> Result<(), ClientError> {
        if event.kind() == EventTypes::STATUS {
            return Err(ClientError::LocalOnly(event.kind().to_string()));
        }

        let state = self.state.lock();
        let not_connected = || ClientError::NotConnected {
            address: self.address.clone(),
            status: state.status,
        };
        if !state.status.is_connected() {
            return Err(not_connected());
        }
        let outbound = state.outbound.as_ref().ok_or_else(not_connected)?;

        let json = event.to_json()?;
        outbound
            .send(Message::Text(json.into()))
            .map_err(|_| not_connected())
    }

    fn set_status(&self, status: ConnectionStatus) {
        let _guard = self.dispatch_guard.lock();
        let subscribers = {
            let mut state = self.state.lock();
            if state.status == status {
                return;
            }
            state.status = status;
            state.subscribers.snapshot()
        };
        debug!("{} -> {status}", self.address);
        subscriber::dispatch(&subscribers, &Event::status(status), &self.address);
    }

    fn dispatch(&self, event: &Event) {
        let _guard = self.dispatch_guard.lock();
        let subscribers = self.state.lock().subscribers.snapshot();
        subscriber::dispatch(&subscribers, event, &self.address);
    }

    fn attach(&self, outbound: mpsc::UnboundedSender<Message>) {
        self.state.lock().outbound = Some(outbound);
    }

    fn detach(&self) {
        self.state.lock().outbound = None;
    }

    /// Mark a worker as running. Returns false if one already is.
    fn claim_worker(&self) -> bool {
        let mut state = self.state.lock();
        if state.worker_running || self.cancel.is_cancelled() {
            return false;
        }
        state.worker_running = true;
        true
    }

    fn release_worker(&self) {
        self.state.lock().worker_running = false;
    }
}

/// Start the connect/retry worker unless one is already running.
pub(crate) fn ensure_worker(endpoint: &Arc<Endpoint>, config: &ClientConfig) {
    if endpoint.claim_worker() {
        tokio::spawn(run_worker(endpoint.clone(), RetryPolicy::from(config)));
    }
}

pub(crate) fn spawn_heartbeat(endpoint: &Arc<Endpoint>, interval: Duration) {
    tokio::spawn(run_heartbeat(endpoint.clone(), interval));
}

#[derive(Debug, Clone, Copy)]
struct RetryPolicy {
    connect_timeout: Duration,
    retry_interval: Duration,
    max_retries: Option<u32>,
}

impl From<&ClientConfig> for RetryPolicy {
    fn from(config: &ClientConfig) -> Self {
        Self {
            connect_timeout: config.connect_timeout,
            retry_interval: config.retry_interval,
            max_retries: config.max_retries,
        }
    }
}

enum SessionEnd {
    Closed,
    Failed,
    Cancelled,
}

async fn run_worker(endpoint: Arc<Endpoint>, policy: RetryPolicy) {
    let url = match &endpoint.url {
        Ok(url) => url.clone(),
        Err(reason) => {
            warn!("Cannot connect to {}: {reason}", endpoint.address);
            endpoint.set_status(ConnectionStatus::Error);
            endpoint.set_status(ConnectionStatus::Disconnected);
            endpoint.release_worker();
            return;
        }
    };

    let mut failures: u32 = 0;
    let mut just_retried = false;

    loop {
        endpoint.set_status(ConnectionStatus::Connecting);
        debug!("Connecting to {url}...");

        let attempt = tokio::time::timeout(policy.connect_timeout, connect_async(url.as_str()));
        let connected = tokio::select! {
            resp = attempt => resp,
            () = endpoint.cancel.cancelled() => break,
        };

        match connected {
            Ok(Ok((socket, _))) => {
                if just_retried {
                    info!("Reconnected to {url}");
                } else {
                    info!("Connected to {url}");
                }
                failures = 0;

                match run_session(&endpoint, socket).await {
                    SessionEnd::Closed => {
                        info!("Connection to {url} closed");
                        endpoint.set_status(ConnectionStatus::Disconnected);
                    }
                    SessionEnd::Failed => {
                        endpoint.set_status(ConnectionStatus::Error);
                        endpoint.set_status(ConnectionStatus::Disconnected);
                    }
                    SessionEnd::Cancelled => break,
                }
            }
            Ok(Err(e)) => {
                warn!("Failed to connect to {url}: {e}");
                failures += 1;
                endpoint.set_status(ConnectionStatus::Error);
                endpoint.set_status(ConnectionStatus::Disconnected);
            }
            Err(_) => {
                warn!(
                    "Connecting to {url} timed out after {:?}",
                    policy.connect_timeout
                );
                failures += 1;
                endpoint.set_status(ConnectionStatus::Error);
                endpoint.set_status(ConnectionStatus::Disconnected);
            }
        }

        if let Some(max) = policy.max_retries {
            if failures > max {
                warn!("Giving up on {url} after {failures} failed attempts");
                break;
            }
        }

        just_retried = true;
        tokio::select! {
            () = tokio::time::sleep(policy.retry_interval) => {}
            () = endpoint.cancel.cancelled() => break,
        }
    }

    endpoint.detach();
    endpoint.set_status(ConnectionStatus::Disconnected);
    endpoint.release_worker();
    debug!("Worker for {url} stopped");
}

async fn run_session(endpoint: &Endpoint, socket: Socket) -> SessionEnd {
    let (mut write, mut read) = socket.split();
    let (tx, mut rx) = mpsc::unbounded_channel::<Message>();

    endpoint.attach(tx);
    endpoint.set_status(ConnectionStatus::Connected);

    let end = loop {
        tokio::select! {
            msg = read.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        endpoint.dispatch(&Event::from_wire(text.as_str()));
                    }
                    Some(Ok(Message::Binary(data))) => {
                        endpoint.dispatch(&Event::from_wire(&String::from_utf8_lossy(&data)));
                    }
                    Some(Ok(Message::Close(_))) | None => break SessionEnd::Closed,
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        warn!("WebSocket error on {}: {e}", endpoint.address);
                        break SessionEnd::Failed;
                    }
                }
            }

            out = rx.recv() => {
                let Some(message) = out else { break SessionEnd::Closed };
                if let Err(e) = write.send(message).await {
                    warn!("Failed to send on {}: {e}", endpoint.address);
                    break SessionEnd::Failed;
                }
            }

            () = endpoint.cancel.cancelled() => {
                let _ = write.send(Message::Close(None)).await;
                break SessionEnd::Cancelled;
            }
        }
    };

    endpoint.detach();
    end
}

async fn run_heartbeat(endpoint: Arc<Endpoint>, interval: Duration) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    // The first tick completes immediately
    ticker.tick().await;

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                if endpoint.status().is_connected() {
                    trace!("Sending ping to {}", endpoint.address);
                    if let Err(e) = endpoint.send(&Event::Ping) {
                        debug!("Heartbeat skipped: {e}");
                    }
                }
            }
            () = endpoint.cancel.cancelled() => break,
        }
    }
}
