//! Towerloop protocol types.
//!
//! Every frame on the relay is a UTF-8 JSON object with a `type`
//! discriminator and an optional opaque `payload`. This crate is the single
//! source of truth for event names, the [`Event`] tagged union, and the
//! per-connection [`ConnectionStatus`].

pub mod error;
pub mod event;
pub mod status;
pub mod types;

pub use error::ProtocolError;
pub use event::{Envelope, Event};
pub use status::ConnectionStatus;
pub use types::{EventType, EventTypes};
