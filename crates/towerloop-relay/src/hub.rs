//! The open-peer set and fan-out.
//!
//! Only the connection handlers mutate the set: `register` on upgrade,
//! `unregister` on close or error. Fan-out enqueues onto each peer's own
//! bounded FIFO queue, so frames from one sender reach every peer in receipt
//! order. A peer whose queue is full is not waited on: it misses the frame.

use std::net::SocketAddr;

use dashmap::DashMap;
use tokio::sync::mpsc::{self, error::TrySendError};
use tracing::debug;

use crate::peer::{Frame, PeerHandle, PeerId};

/// Outcome of one fan-out.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FanOutReport {
    /// Peers the frame was queued for
    pub delivered: usize,
    /// Peers that were mid-close or not draining and got nothing
    pub skipped: usize,
}

/// All currently open peers.
#[derive(Debug)]
pub struct PeerSet {
    peers: DashMap<PeerId, PeerHandle>,
    echo_to_sender: bool,
    queue_capacity: usize,
}

/// Frames buffered per peer before further frames are dropped for it.
pub const DEFAULT_PEER_QUEUE_CAPACITY: usize = 256;

impl PeerSet {
    pub fn new(echo_to_sender: bool) -> Self {
        Self::with_queue_capacity(echo_to_sender, DEFAULT_PEER_QUEUE_CAPACITY)
    }

    /// `queue_capacity` is clamped to at least 1.
    pub fn with_queue_capacity(echo_to_sender: bool, queue_capacity: usize) -> Self {
        Self {
            peers: DashMap::new(),
            echo_to_sender,
            queue_capacity: queue_capacity.max(1),
        }
    }

    /// Add a peer. Returns its id and the receiving end of its outbound queue.
    pub fn register(&self, remote: Option<SocketAddr>) -> (PeerId, mpsc::Receiver<Frame>) {
        let id = uuid::Uuid::new_v4().to_string();
        let (tx, rx) = mpsc::channel(self.queue_capacity);
        self.peers.insert(id.clone(), PeerHandle::new(id.clone(), remote, tx));
        (id, rx)
    }

    /// Remove a peer, returning its handle if it was present.
    pub fn unregister(&self, id: &str) -> Option<PeerHandle> {
        self.peers.remove(id).map(|(_, peer)| peer)
    }

    /// Forward `frame` from `from` to every other open peer (and back to
    /// `from` when echo is enabled).
    ///
    /// A peer that cannot take the frame is skipped; it never stops delivery
    /// to the rest.
    pub fn fan_out(&self, from: &str, frame: &Frame) -> FanOutReport {
        let mut report = FanOutReport::default();

        for peer in self.peers.iter() {
            if !self.echo_to_sender && peer.id == from {
                continue;
            }
            if peer.is_closed() {
                report.skipped += 1;
                continue;
            }
            match peer.send(frame.clone()) {
                Ok(()) => report.delivered += 1,
                Err(TrySendError::Full(_)) => {
                    debug!("Dropping frame for {} (queue full)", peer.id);
                    report.skipped += 1;
                }
                Err(TrySendError::Closed(_)) => {
                    debug!("Skipping peer {} (closing)", peer.id);
                    report.skipped += 1;
                }
            }
        }

        report
    }

    /// Drop every peer. Their connection tasks see a closed queue and exit.
    /// Returns how many peers were removed.
    pub fn clear(&self) -> usize {
        let count = self.peers.len();
        self.peers.clear();
        count
    }

    pub fn echo_to_sender(&self) -> bool {
        self.echo_to_sender
    }

    pub fn queue_capacity(&self) -> usize {
        self.queue_capacity
    }

    pub fn contains(&self, id: &str) -> bool {
        self.peers.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.peers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.peers.is_empty()
    }
}

impl Default for PeerSet {
    fn default() -> Self {
        Self::new(true)
    }
}
