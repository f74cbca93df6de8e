//! Client error types.

use std::time::Duration;

use thiserror::Error;

/// Client error type.
#[derive(Debug, Error)]
pub enum SyncError {
    #[error("relay does not support negentropy sync: {0}")]
    UnsupportedByRelay(String),

    #[error("relay reported an error: {0}")]
    Relay(String),

    #[error("negotiation timed out after {0:?}")]
    Timeout(Duration),

    #[error("protocol error: {0}")]
    Protocol(#[from] nostr_sync::ProtocolError),

    #[error("transport closed before the negotiation finished")]
    TransportClosed,

    #[error("transport error: {0}")]
    Transport(String),

    #[error("sync cancelled")]
    Cancelled,

    #[error("invalid relay URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    #[error("not a websocket URL: {0}")]
    InvalidScheme(String),

    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("event store error: {0}")]
    Store(String),
}

/// Client result type.
pub type Result<T> = std::result::Result<T, SyncError>;
