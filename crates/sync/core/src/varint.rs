//! Variable-length unsigned integer codec.
//!
//! Varints are base-128 digits, most significant digit first, with the high
//! bit set on every byte except the last. Zero encodes as a single `0x00`.

use crate::error::{ProtocolError, Result};

/// Longest legal encoding of a u64: ceil(64 / 7) bytes.
const MAX_VARINT_LEN: usize = 10;

/// Encode a value as a varint.
pub fn encode_varint(mut value: u64) -> Vec<u8> {
    let mut out = vec![(value & 0x7F) as u8];
    value >>= 7;
    while value > 0 {
        out.push((value & 0x7F) as u8 | 0x80);
        value >>= 7;
    }
    out.reverse();
    out
}

/// Decode a varint from the front of `data`.
///
/// Returns the value and the number of bytes consumed.
pub fn decode_varint(data: &[u8]) -> Result<(u64, usize)> {
    if data.is_empty() {
        return Err(ProtocolError::Varint("empty input".to_string()));
    }

    let mut value: u64 = 0;
    for (index, &byte) in data.iter().enumerate() {
        if index >= MAX_VARINT_LEN {
            return Err(ProtocolError::Varint(format!(
                "varint longer than {MAX_VARINT_LEN} bytes"
            )));
        }
        if value > u64::MAX >> 7 {
            return Err(ProtocolError::Varint("varint overflows u64".to_string()));
        }
        value = (value << 7) | u64::from(byte & 0x7F);
        if byte & 0x80 == 0 {
            return Ok((value, index + 1));
        }
    }

    Err(ProtocolError::Varint("truncated varint".to_string()))
}
