//! Negentropy (NIP-77) range-based set reconciliation primitives.
//!
//! This crate implements the client half of the Negentropy protocol: given a
//! local set of `(timestamp, id)` pairs and a peer holding an overlapping
//! set, it determines exactly which ids each side is missing using
//! logarithmic bandwidth instead of exchanging full id lists.
//!
//! Internal module boundaries:
//! - `error`: shared protocol error and result types
//! - `varint`: varint codec primitives
//! - `bound`: range boundary markers with delta timestamp encoding
//! - `accumulator`: order-independent 256-bit fingerprint accumulation
//! - `storage`: sealed, sorted candidate set with binary-search range lookup
//! - `message`: wire codec for negotiation messages
//! - `reconcile`: initiator-side range refinement
//! - `wire`: JSON control envelopes (NEG-OPEN / NEG-MSG / NEG-ERR / NEG-CLOSE)
//! - `event`: minimal signed-event model for the fetch pipeline
//!
//! # Protocol flow
//!
//! ```text
//! Client                                  Relay
//!   |                                       |
//!   |  NEG-OPEN (filter, initial msg) ---> |
//!   |                                       | (compute fingerprints)
//!   | <--- NEG-MSG (ranges with fps)       |
//!   |                                       |
//!   | (compare fingerprints, subdivide)     |
//!   |  NEG-MSG (refined ranges) ---------> |
//!   |  ...continues until convergence...   |
//!   |                                       |
//!   |  NEG-CLOSE ------------------------> |
//! ```
//!
//! After convergence the client knows which ids the relay holds that it
//! lacks (`need`) and which ids it holds that the relay lacks (`have`).
//! Fetching the needed events, and any upload direction, happen through the
//! ordinary subscription pipeline outside this crate.
//!
//! # References
//!
//! - NIP-77: <https://github.com/nostr-protocol/nips/blob/master/77.md>
//! - Negentropy protocol: <https://github.com/hoytech/negentropy>
//! - RBSR paper: <https://logperiodic.com/rbsr.html>

pub mod accumulator;
pub mod bound;
pub mod error;
pub mod event;
pub mod message;
pub mod reconcile;
pub mod storage;
pub mod varint;
pub mod wire;

pub use accumulator::{Accumulator, fingerprint_of};
pub use bound::{Bound, TIMESTAMP_INFINITY};
pub use error::{ProtocolError, Result};
pub use event::Event;
pub use message::{Message, PROTOCOL_VERSION, Range, RangePayload};
pub use reconcile::{
    DEFAULT_FRAME_SIZE_LIMIT, MIN_FRAME_SIZE_LIMIT, ReconcileConfig, Reconciler,
};
pub use storage::{Item, Storage};
pub use varint::{decode_varint, encode_varint};
pub use wire::{NegClose, NegErr, NegMsg, NegOpen};

/// A 256-bit event id.
pub type EventId = [u8; 32];

/// An order-independent 128-bit digest of a bounded range.
pub type Fingerprint = [u8; 16];

#[cfg(test)]
mod tests;
