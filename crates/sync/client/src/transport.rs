//! Transport abstraction for negotiation frames.
//!
//! A [`SyncTransport`] carries JSON control frames between one sync session
//! and one relay. The session layer never touches sockets directly, so any
//! relay connection (or an in-memory peer in tests) can back a session.

use async_trait::async_trait;
use serde_json::Value;

use nostr_sync::{NegClose, NegErr, NegMsg, NegOpen};

use crate::error::Result;

/// An outbound negotiation frame.
#[derive(Debug, Clone)]
pub enum ClientFrame {
    Open(NegOpen),
    Message(NegMsg),
    Close(NegClose),
}

impl ClientFrame {
    pub fn to_json(&self) -> Value {
        match self {
            Self::Open(frame) => frame.to_json(),
            Self::Message(frame) => frame.to_json(),
            Self::Close(frame) => frame.to_json(),
        }
    }

    /// The subscription id the frame belongs to.
    pub fn subscription_id(&self) -> &str {
        match self {
            Self::Open(frame) => &frame.subscription_id,
            Self::Message(frame) => &frame.subscription_id,
            Self::Close(frame) => &frame.subscription_id,
        }
    }
}

/// An inbound relay frame the sync session reacts to.
#[derive(Debug, Clone)]
pub enum RelayFrame {
    Message(NegMsg),
    Error(NegErr),
    Notice(String),
}

impl RelayFrame {
    /// Classify a raw relay frame.
    ///
    /// Returns `None` for frames the sync engine has no business with
    /// (EVENT, EOSE, OK and anything unrecognized); the transport layer is
    /// expected to route those elsewhere or drop them.
    pub fn from_json(value: &Value) -> Option<Self> {
        let tag = value.as_array()?.first()?.as_str()?;
        match tag {
            "NEG-MSG" => NegMsg::from_json(value).ok().map(Self::Message),
            "NEG-ERR" => NegErr::from_json(value).ok().map(Self::Error),
            "NOTICE" => value
                .as_array()?
                .get(1)?
                .as_str()
                .map(|notice| Self::Notice(notice.to_string())),
            _ => None,
        }
    }
}

/// One bidirectional frame channel to a relay.
#[async_trait]
pub trait SyncTransport: Send + Sync {
    /// Send a frame to the relay.
    async fn send(&self, frame: ClientFrame) -> Result<()>;

    /// Wait for the next inbound frame.
    ///
    /// Returns `Ok(None)` once the underlying connection has closed.
    async fn recv(&self) -> Result<Option<RelayFrame>>;
}
