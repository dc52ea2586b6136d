//! Towerloop channel client.
//!
//! Multiplexes any number of logical subscribers (views) over at most one
//! physical WebSocket connection per endpoint address. The client:
//! - Tracks a [`ConnectionStatus`] per connection and tells every subscriber
//!   about each transition
//! - Reconnects after a fixed delay whenever a connection is lost
//! - Sends a `ping` event on a fixed heartbeat interval while connected
//! - Never lets one subscriber's failure reach another
//!
//! A [`ChannelClient`] is constructed explicitly by the application root and
//! cloned into each view; clones share the same connections.
//!
//! [`ConnectionStatus`]: towerloop_protocol::ConnectionStatus

pub mod address;
pub mod client;
pub mod config;
pub mod error;

mod endpoint;
mod subscriber;

pub use address::resolve_address;
pub use client::{ChannelClient, Subscription};
pub use config::ClientConfig;
pub use error::ClientError;
pub use subscriber::SubscriberId;
