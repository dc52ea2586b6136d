//! Channel client error types.

use thiserror::Error;
use towerloop_protocol::{ConnectionStatus, ProtocolError};

#[derive(Debug, Error)]
pub enum ClientError {
    /// Publish attempted while the target connection is not open.
    /// The event was dropped.
    #[error("not connected to {address} (status: {status})")]
    NotConnected {
        address: String,
        status: ConnectionStatus,
    },

    /// Publish attempted before any address was connected or subscribed.
    #[error("no target address; call connect or subscribe first")]
    NoTarget,

    #[error("invalid endpoint address `{address}`: {reason}")]
    InvalidAddress { address: String, reason: String },

    /// The event only exists locally and is never sent over the wire.
    #[error("`{0}` events are local-only")]
    LocalOnly(String),

    #[error(transparent)]
    Encode(#[from] ProtocolError),
}

impl ClientError {
    pub fn invalid_address(address: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidAddress {
            address: address.into(),
            reason: reason.into(),
        }
    }
}
