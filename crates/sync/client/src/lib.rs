//! Negentropy (NIP-77) sync client.
//!
//! The layers, bottom up:
//! - transport: frame channel abstraction over a relay connection
//! - session: one negotiation state machine with timeout and cancellation
//! - probe: NIP-11 capability checks for relay selection
//! - sync: multi-relay orchestration and post-convergence event fetching
//!
//! The crate never opens sockets itself; callers supply a
//! [`SyncTransport`] per relay (and a [`TransportFactory`] at the
//! orchestration layer), which keeps the protocol logic testable against
//! in-memory peers.

pub mod error;
pub mod probe;
pub mod session;
pub mod sync;
pub mod transport;

pub use error::{Result, SyncError};
pub use probe::{RelayInformation, filter_negentropy_relays, information_url, probe_relay};
pub use session::{
    CancelHandle, NegotiationProgress, ProgressCallback, SessionConfig, SessionOutcome,
    SyncPhase, SyncSession,
};
pub use sync::{
    EventStore, RelayErrorCallback, RelayProgressCallback, SyncOptions, SyncResult,
    TransportFactory, sync_with_relays,
};
pub use transport::{ClientFrame, RelayFrame, SyncTransport};
