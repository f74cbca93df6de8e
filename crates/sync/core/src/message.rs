//! Negotiation message codec.
//!
//! A message is a protocol version byte followed by an ordered sequence of
//! range entries. Each entry carries an exclusive upper bound (the lower
//! bound is the previous entry's upper bound, or zero for the first entry)
//! and one of three payloads: Skip, Fingerprint or IdList. The bounds of a
//! message jointly partition the whole `(timestamp, id)` space.

use crate::bound::Bound;
use crate::error::{ProtocolError, Result};
use crate::varint::{decode_varint, encode_varint};
use crate::{EventId, Fingerprint};

/// Negentropy protocol version 1.
pub const PROTOCOL_VERSION: u8 = 0x61;

const MODE_SKIP: u64 = 0;
const MODE_FINGERPRINT: u64 = 1;
const MODE_ID_LIST: u64 = 2;

/// Payload of a range entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RangePayload {
    /// Nothing to say about this range.
    Skip,
    /// Order-independent digest of the sender's items in this range.
    Fingerprint(Fingerprint),
    /// Full enumeration of the sender's ids in this range.
    IdList(Vec<EventId>),
}

/// One range entry of a message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Range {
    /// Exclusive upper bound.
    pub upper_bound: Bound,
    pub payload: RangePayload,
}

impl Range {
    pub fn skip(upper_bound: Bound) -> Self {
        Self {
            upper_bound,
            payload: RangePayload::Skip,
        }
    }

    pub fn fingerprint(upper_bound: Bound, fingerprint: Fingerprint) -> Self {
        Self {
            upper_bound,
            payload: RangePayload::Fingerprint(fingerprint),
        }
    }

    pub fn id_list(upper_bound: Bound, ids: Vec<EventId>) -> Self {
        Self {
            upper_bound,
            payload: RangePayload::IdList(ids),
        }
    }

    /// Encode into `out`, delta-compressing the bound timestamp against the
    /// previous entry's bound.
    pub fn encode_into(&self, out: &mut Vec<u8>, prev_timestamp: u64) {
        self.upper_bound.encode_into(out, prev_timestamp);

        match &self.payload {
            RangePayload::Skip => {
                out.extend_from_slice(&encode_varint(MODE_SKIP));
            }
            RangePayload::Fingerprint(fingerprint) => {
                out.extend_from_slice(&encode_varint(MODE_FINGERPRINT));
                out.extend_from_slice(fingerprint);
            }
            RangePayload::IdList(ids) => {
                out.extend_from_slice(&encode_varint(MODE_ID_LIST));
                out.extend_from_slice(&encode_varint(ids.len() as u64));
                for id in ids {
                    out.extend_from_slice(id);
                }
            }
        }
    }

    /// Decode one range entry from the front of `data`.
    ///
    /// Returns the entry and the number of bytes consumed.
    pub fn decode(data: &[u8], prev_timestamp: u64) -> Result<(Self, usize)> {
        let (upper_bound, mut offset) = Bound::decode(data, prev_timestamp)?;

        let (mode, mode_len) = decode_varint(&data[offset..])?;
        offset += mode_len;

        let payload = match mode {
            MODE_SKIP => RangePayload::Skip,

            MODE_FINGERPRINT => {
                if offset + 16 > data.len() {
                    return Err(ProtocolError::InvalidRange(
                        "not enough data for fingerprint".to_string(),
                    ));
                }
                let mut fingerprint = [0u8; 16];
                fingerprint.copy_from_slice(&data[offset..offset + 16]);
                offset += 16;
                RangePayload::Fingerprint(fingerprint)
            }

            MODE_ID_LIST => {
                let (id_count, count_len) = decode_varint(&data[offset..])?;
                offset += count_len;

                // Bound the allocation by what the buffer can actually hold.
                if id_count > ((data.len() - offset) / 32) as u64 {
                    return Err(ProtocolError::InvalidRange(format!(
                        "id list of {id_count} entries exceeds remaining data"
                    )));
                }

                let mut ids = Vec::with_capacity(id_count as usize);
                for _ in 0..id_count {
                    let mut id = [0u8; 32];
                    id.copy_from_slice(&data[offset..offset + 32]);
                    offset += 32;
                    ids.push(id);
                }
                RangePayload::IdList(ids)
            }

            other => return Err(ProtocolError::InvalidMode(other)),
        };

        Ok((
            Self {
                upper_bound,
                payload,
            },
            offset,
        ))
    }
}

/// A full negotiation message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub ranges: Vec<Range>,
}

impl Message {
    pub fn new(ranges: Vec<Range>) -> Self {
        Self { ranges }
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut bytes = vec![PROTOCOL_VERSION];
        let mut prev_timestamp = 0;
        for range in &self.ranges {
            range.encode_into(&mut bytes, prev_timestamp);
            prev_timestamp = range.upper_bound.timestamp;
        }
        bytes
    }

    pub fn encode_hex(&self) -> String {
        hex::encode(self.encode())
    }

    /// Decode and validate a message.
    ///
    /// Beyond per-entry integrity this enforces the structural invariants:
    /// bounds strictly ascending, and no entry after an infinity bound.
    pub fn decode(data: &[u8]) -> Result<Self> {
        let Some((&version, mut rest)) = data.split_first() else {
            return Err(ProtocolError::InvalidVersion(0));
        };
        if version != PROTOCOL_VERSION {
            return Err(ProtocolError::InvalidVersion(version));
        }

        let mut ranges = Vec::new();
        let mut prev_bound = Bound::zero();

        while !rest.is_empty() {
            if prev_bound.is_infinity() {
                return Err(ProtocolError::BoundOrdering);
            }
            let (range, consumed) = Range::decode(rest, prev_bound.timestamp)?;
            if range.upper_bound <= prev_bound {
                return Err(ProtocolError::BoundOrdering);
            }
            rest = &rest[consumed..];
            prev_bound = range.upper_bound.clone();
            ranges.push(range);
        }

        Ok(Self { ranges })
    }

    pub fn decode_hex(hex_str: &str) -> Result<Self> {
        let bytes = hex::decode(hex_str).map_err(|e| ProtocolError::InvalidHex(e.to_string()))?;
        Self::decode(&bytes)
    }
}
