//! The channel client handle shared by all views.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;
use towerloop_protocol::{ConnectionStatus, Event};
use tracing::{debug, info, warn};

use crate::address::resolve_address;
use crate::config::ClientConfig;
use crate::endpoint::{self, Endpoint};
use crate::error::ClientError;
use crate::subscriber::SubscriberId;

struct ClientInner {
    config: ClientConfig,
    /// One entry per physical connection, keyed by resolved address
    endpoints: Mutex<HashMap<String, Arc<Endpoint>>>,
    /// Address `publish` sends to: the most recently requested one
    target: Mutex<Option<String>>,
    cancel: CancellationToken,
}

impl Drop for ClientInner {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

/// Publish/subscribe access to the relay.
///
/// Cheap to clone; every clone shares the same connections and subscribers.
/// Must be used from within a Tokio runtime.
#[derive(Clone)]
pub struct ChannelClient {
    inner: Arc<ClientInner>,
}

impl ChannelClient {
    pub fn new(config: ClientConfig) -> Self {
        Self {
            inner: Arc::new(ClientInner {
                config,
                endpoints: Mutex::new(HashMap::new()),
                target: Mutex::new(None),
                cancel: CancellationToken::new(),
            }),
        }
    }

    pub fn config(&self) -> &ClientConfig {
        &self.inner.config
    }

    /// Register `callback` for every event on `address` (or the default
    /// address), opening the connection if needed.
    ///
    /// The callback is invoked right away with the current status. Dropping
    /// the returned [`Subscription`] unsubscribes; the connection stays open.
    pub fn subscribe<F>(&self, callback: F, address: Option<&str>) -> Subscription
    where
        F: Fn(&Event) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        let address = address.unwrap_or(&self.inner.config.default_address);
        let endpoint = self.connect_endpoint(address);
        let id = endpoint.subscribe(Arc::new(callback));
        debug!(
            "Subscriber {id} added on {} ({} total)",
            endpoint.address,
            endpoint.subscriber_count()
        );
        Subscription {
            endpoint,
            id,
            active: true,
        }
    }

    /// Open (or reuse) the connection for `address` and make it the publish
    /// target. Naming an address that is already open or opening opens
    /// nothing new.
    pub fn connect(&self, address: &str) {
        self.connect_endpoint(address);
    }

    /// Send `event` on the target connection.
    ///
    /// When not connected the event is dropped and an error is returned;
    /// nothing is queued or retried.
    pub fn publish(&self, event: &Event) -> Result<(), ClientError> {
        let Some(endpoint) = self.target_endpoint() else {
            warn!("No connection targeted. Event not sent: {}", event.kind());
            return Err(ClientError::NoTarget);
        };

        endpoint.send(event).inspect_err(|e| {
            warn!("Event `{}` not sent: {e}", event.kind());
        })
    }

    /// Status of `address`, or of the publish target when `None`.
    pub fn status(&self, address: Option<&str>) -> ConnectionStatus {
        let endpoint = match address {
            Some(address) => self.find_endpoint(address),
            None => self.target_endpoint(),
        };
        endpoint
            .map(|e| e.status())
            .unwrap_or(ConnectionStatus::Disconnected)
    }

    /// The address `publish` currently sends to.
    pub fn target(&self) -> Option<String> {
        self.inner.target.lock().clone()
    }

    /// Number of physical connections (open, opening, or waiting to retry).
    pub fn connection_count(&self) -> usize {
        self.inner.endpoints.lock().len()
    }

    /// Close every connection. Subscribers get a final `DISCONNECTED`; no
    /// reconnect is scheduled. Later `subscribe`/`connect` calls start fresh.
    pub fn disconnect(&self) {
        let endpoints: Vec<_> = self.inner.endpoints.lock().drain().map(|(_, e)| e).collect();
        self.inner.target.lock().take();
        for endpoint in endpoints {
            info!("Disconnecting from {}", endpoint.address);
            endpoint.shutdown();
        }
    }

    fn connect_endpoint(&self, address: &str) -> Arc<Endpoint> {
        let resolved = resolve_address(address, self.inner.config.origin.as_ref());
        let key = endpoint_key(address, &resolved);

        let endpoint = {
            let mut endpoints = self.inner.endpoints.lock();
            endpoints
                .entry(key.clone())
                .or_insert_with(|| {
                    let url = resolved.map_err(|e| e.to_string());
                    let endpoint = Arc::new(Endpoint::new(
                        key.clone(),
                        url,
                        self.inner.cancel.child_token(),
                    ));
                    endpoint::spawn_heartbeat(&endpoint, self.inner.config.heartbeat_interval);
                    endpoint
                })
                .clone()
        };

        endpoint::ensure_worker(&endpoint, &self.inner.config);
        *self.inner.target.lock() = Some(key);
        endpoint
    }

    fn find_endpoint(&self, address: &str) -> Option<Arc<Endpoint>> {
        let resolved = resolve_address(address, self.inner.config.origin.as_ref());
        let key = endpoint_key(address, &resolved);
        self.inner.endpoints.lock().get(&key).cloned()
    }

    fn target_endpoint(&self) -> Option<Arc<Endpoint>> {
        let key = self.inner.target.lock().clone()?;
        self.inner.endpoints.lock().get(&key).cloned()
    }
}

fn endpoint_key(address: &str, resolved: &Result<url::Url, ClientError>) -> String {
    match resolved {
        Ok(url) => url.to_string(),
        Err(_) => address.to_string(),
    }
}

/// Handle for one registered callback. Unsubscribes on drop.
#[must_use = "dropping a Subscription unsubscribes immediately"]
pub struct Subscription {
    endpoint: Arc<Endpoint>,
    id: SubscriberId,
    active: bool,
}

impl Subscription {
    pub fn id(&self) -> SubscriberId {
        self.id
    }

    /// Resolved address this subscription listens on.
    pub fn address(&self) -> &str {
        &self.endpoint.address
    }

    /// Remove exactly this callback. Other subscribers and the connection
    /// are unaffected.
    pub fn unsubscribe(mut self) {
        self.remove();
    }

    fn remove(&mut self) {
        if self.active {
            self.active = false;
            if self.endpoint.unsubscribe(self.id) {
                debug!(
                    "Subscriber {} removed from {} ({} left)",
                    self.id,
                    self.endpoint.address,
                    self.endpoint.subscriber_count()
                );
            }
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.remove();
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("id", &self.id)
            .field("address", &self.endpoint.address)
            .finish()
    }
}
