//! Per-peer state tracked by the relay.

use std::net::SocketAddr;
use std::time::Instant;

use axum::extract::ws::Utf8Bytes;
use bytes::Bytes;
use tokio::sync::mpsc::{self, error::TrySendError};

/// Opaque peer identity (a UUID v4 string).
pub type PeerId = String;

/// One frame as received from a peer. Forwarded byte-for-byte; both
/// variants are reference-counted, so cloning per peer does not copy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    Text(Utf8Bytes),
    Binary(Bytes),
}

impl Frame {
    pub fn len(&self) -> usize {
        match self {
            Self::Text(text) => text.as_str().len(),
            Self::Binary(data) => data.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// A registered peer and the queue feeding its socket.
#[derive(Debug)]
pub struct PeerHandle {
    /// Unique peer ID
    pub id: PeerId,
    /// Remote socket address, when the transport knows it
    pub remote: Option<SocketAddr>,
    /// When the peer connected
    pub connected_at: Instant,
    outbound: mpsc::Sender<Frame>,
}

impl PeerHandle {
    pub fn new(
        id: PeerId,
        remote: Option<SocketAddr>,
        outbound: mpsc::Sender<Frame>,
    ) -> Self {
        Self {
            id,
            remote,
            connected_at: Instant::now(),
            outbound,
        }
    }

    /// Queue a frame for this peer without waiting.
    ///
    /// Fails with `Full` when the peer has stopped draining its queue and
    /// with `Closed` when its connection task has already gone away.
    pub fn send(&self, frame: Frame) -> Result<(), TrySendError<Frame>> {
        self.outbound.try_send(frame)
    }

    pub fn is_closed(&self) -> bool {
        self.outbound.is_closed()
    }
}
