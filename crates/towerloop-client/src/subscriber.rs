//! Subscriber registry and fault-isolated dispatch.

use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;

use towerloop_protocol::Event;
use tracing::error;

/// Identifies one registered callback on one connection.
pub type SubscriberId = u64;

pub(crate) type Callback = Arc<dyn Fn(&Event) -> anyhow::Result<()> + Send + Sync>;

/// Callbacks in registration order.
#[derive(Default)]
pub(crate) struct Subscribers {
    next_id: SubscriberId,
    entries: Vec<(SubscriberId, Callback)>,
}

impl Subscribers {
    pub fn add(&mut self, callback: Callback) -> SubscriberId {
        self.next_id += 1;
        self.entries.push((self.next_id, callback));
        self.next_id
    }

    pub fn remove(&mut self, id: SubscriberId) -> bool {
        let before = self.entries.len();
        self.entries.retain(|(entry, _)| *entry != id);
        self.entries.len() != before
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Copy of the current list. Dispatch runs on the copy, so removals
    /// apply from the next dispatch on.
    pub fn snapshot(&self) -> Vec<(SubscriberId, Callback)> {
        self.entries.clone()
    }
}

/// Invoke every callback in order. A callback that errors or panics is
/// logged and skipped.
pub(crate) fn dispatch(subscribers: &[(SubscriberId, Callback)], event: &Event, address: &str) {
    for (id, callback) in subscribers {
        deliver(*id, callback, event, address);
    }
}

pub(crate) fn deliver(id: SubscriberId, callback: &Callback, event: &Event, address: &str) {
    match catch_unwind(AssertUnwindSafe(|| callback(event))) {
        Ok(Ok(())) => {}
        Ok(Err(e)) => {
            error!("Subscriber {id} on {address} failed handling `{}`: {e:#}", event.kind());
        }
        Err(_) => {
            error!("Subscriber {id} on {address} panicked handling `{}`", event.kind());
        }
    }
}
