//! Range boundary markers.

use std::cmp::Ordering;

use crate::error::{ProtocolError, Result};
use crate::varint::{decode_varint, encode_varint};

/// Timestamp value standing in for "no upper limit".
pub const TIMESTAMP_INFINITY: u64 = u64::MAX;

/// A partial sort key delimiting a contiguous sub-range of the
/// `(timestamp, id)` space.
///
/// A shorter `id_prefix` sorts before every full id sharing that prefix at
/// the same timestamp, so an empty prefix means "everything at this
/// timestamp is at or above this bound".
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Bound {
    pub timestamp: u64,
    /// 0 to 32 bytes of id prefix.
    pub id_prefix: Vec<u8>,
}

impl Bound {
    pub fn new(timestamp: u64, id_prefix: Vec<u8>) -> Result<Self> {
        if id_prefix.len() > 32 {
            return Err(ProtocolError::InvalidBound(format!(
                "id prefix too long: {} bytes (max 32)",
                id_prefix.len()
            )));
        }
        Ok(Self {
            timestamp,
            id_prefix,
        })
    }

    /// The bound below every item.
    pub fn zero() -> Self {
        Self {
            timestamp: 0,
            id_prefix: vec![],
        }
    }

    /// The bound above every item.
    pub fn infinity() -> Self {
        Self {
            timestamp: TIMESTAMP_INFINITY,
            id_prefix: vec![],
        }
    }

    pub fn is_infinity(&self) -> bool {
        self.timestamp == TIMESTAMP_INFINITY && self.id_prefix.is_empty()
    }

    /// Encode into `out`, delta-compressing the timestamp against the
    /// previous range's bound. Infinity encodes as varint 0.
    pub fn encode_into(&self, out: &mut Vec<u8>, prev_timestamp: u64) {
        let encoded_timestamp = if self.timestamp == TIMESTAMP_INFINITY {
            0
        } else {
            1 + self.timestamp.saturating_sub(prev_timestamp)
        };

        out.extend_from_slice(&encode_varint(encoded_timestamp));
        out.extend_from_slice(&encode_varint(self.id_prefix.len() as u64));
        out.extend_from_slice(&self.id_prefix);
    }

    /// Decode a bound from the front of `data`.
    ///
    /// Returns the bound and the number of bytes consumed.
    pub fn decode(data: &[u8], prev_timestamp: u64) -> Result<(Self, usize)> {
        let (encoded_timestamp, mut offset) = decode_varint(data)?;

        let timestamp = if encoded_timestamp == 0 {
            TIMESTAMP_INFINITY
        } else {
            prev_timestamp
                .checked_add(encoded_timestamp - 1)
                .ok_or_else(|| {
                    ProtocolError::InvalidBound("timestamp delta overflows u64".to_string())
                })?
        };

        let (prefix_len, len_len) = decode_varint(&data[offset..])?;
        offset += len_len;

        if prefix_len > 32 {
            return Err(ProtocolError::InvalidBound(format!(
                "id prefix length too long: {prefix_len}"
            )));
        }
        let prefix_len = prefix_len as usize;
        if offset + prefix_len > data.len() {
            return Err(ProtocolError::InvalidBound(
                "not enough data for id prefix".to_string(),
            ));
        }

        let id_prefix = data[offset..offset + prefix_len].to_vec();
        offset += prefix_len;

        Ok((
            Self {
                timestamp,
                id_prefix,
            },
            offset,
        ))
    }
}

impl Ord for Bound {
    fn cmp(&self, other: &Self) -> Ordering {
        self.timestamp
            .cmp(&other.timestamp)
            .then_with(|| self.id_prefix.cmp(&other.id_prefix))
    }
}

impl PartialOrd for Bound {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}
