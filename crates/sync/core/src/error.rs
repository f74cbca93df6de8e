use thiserror::Error;

/// Protocol-level error for the reconciliation primitives.
///
/// Any decoding violation is fatal for the session that observed it: once an
/// encoding invariant is broken, locally accumulated fingerprint state can no
/// longer be trusted for that peer.
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("invalid protocol version: {0:#04x}")]
    InvalidVersion(u8),

    #[error("invalid range mode: {0}")]
    InvalidMode(u64),

    #[error("invalid hex encoding: {0}")]
    InvalidHex(String),

    #[error("varint decode error: {0}")]
    Varint(String),

    #[error("invalid bound: {0}")]
    InvalidBound(String),

    #[error("invalid range: {0}")]
    InvalidRange(String),

    #[error("range bounds are not strictly ascending")]
    BoundOrdering,

    #[error("invalid frame: {0}")]
    InvalidFrame(String),

    #[error("frame size {size} exceeds limit {limit}")]
    FrameTooLarge { size: usize, limit: usize },

    #[error("frame size limit {0} is below the protocol minimum of {min}", min = crate::reconcile::MIN_FRAME_SIZE_LIMIT)]
    FrameSizeLimitTooSmall(usize),

    #[error("storage is sealed")]
    Sealed,

    #[error("storage is not sealed")]
    NotSealed,
}

pub type Result<T> = std::result::Result<T, ProtocolError>;
