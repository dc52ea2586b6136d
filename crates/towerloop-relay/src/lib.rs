//! Towerloop broadcast relay.
//!
//! Accepts WebSocket peers and forwards every inbound frame, untouched, to
//! the other open peers. The relay has no topics, no persistence and no
//! notion of payload shape. It handles:
//! - Connection lifecycle (open, message, close)
//! - Fan-out with per-peer failure isolation
//! - A health probe and optional static asset serving
//!
//! Fan-out lives in [`PeerSet`] and is independent of the HTTP server, so it
//! can be driven directly by tests.

pub mod error;
pub mod hub;
pub mod peer;
pub mod server;

pub use error::RelayError;
pub use hub::{DEFAULT_PEER_QUEUE_CAPACITY, FanOutReport, PeerSet};
pub use peer::{Frame, PeerHandle, PeerId};
pub use server::{RelayConfig, RelayServer};
