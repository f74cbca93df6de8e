//! Order-independent fingerprint accumulation.

use sha2::{Digest, Sha256};

use crate::varint::encode_varint;
use crate::{EventId, Fingerprint};

/// A running sum of event ids, mod 2^256.
///
/// Addition over the id space is associative and commutative, so the value
/// (and therefore the fingerprint) depends only on the multiset of ids that
/// were folded in, never on insertion order. That is what makes fingerprints
/// computed independently by two peers comparable without agreeing on an
/// enumeration order.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Accumulator {
    /// Little-endian 32-bit limbs.
    limbs: [u32; 8],
}

impl Accumulator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Zero the accumulator.
    pub fn reset(&mut self) {
        self.limbs = [0; 8];
    }

    /// Add a 32-byte id, interpreted as a little-endian 256-bit integer.
    /// Carry out of the top limb is discarded.
    pub fn add(&mut self, id: &EventId) {
        self.add_limbs(&limbs_from_id(id));
    }

    /// Two's complement negation: bitwise complement plus one.
    pub fn negate(&mut self) {
        for limb in &mut self.limbs {
            *limb = !*limb;
        }
        self.add_limbs(&[1, 0, 0, 0, 0, 0, 0, 0]);
    }

    /// Remove a previously added id by adding its negation.
    pub fn subtract(&mut self, id: &EventId) {
        let mut negated = Self {
            limbs: limbs_from_id(id),
        };
        negated.negate();
        self.add_limbs(&negated.limbs);
    }

    /// The digest of the current value and an element count: the first 16
    /// bytes of `SHA-256(sum_le_bytes || varint(count))`.
    pub fn fingerprint(&self, count: u64) -> Fingerprint {
        let mut hasher = Sha256::new();
        hasher.update(self.to_bytes());
        hasher.update(encode_varint(count));
        let digest = hasher.finalize();

        let mut fingerprint = [0u8; 16];
        fingerprint.copy_from_slice(&digest[..16]);
        fingerprint
    }

    pub fn to_bytes(&self) -> [u8; 32] {
        let mut bytes = [0u8; 32];
        for (index, limb) in self.limbs.iter().enumerate() {
            bytes[index * 4..index * 4 + 4].copy_from_slice(&limb.to_le_bytes());
        }
        bytes
    }

    fn add_limbs(&mut self, other: &[u32; 8]) {
        let mut carry = 0u64;
        for (limb, word) in self.limbs.iter_mut().zip(other) {
            let sum = u64::from(*limb) + u64::from(*word) + carry;
            *limb = sum as u32;
            carry = sum >> 32;
        }
    }
}

fn limbs_from_id(id: &EventId) -> [u32; 8] {
    let mut limbs = [0u32; 8];
    for (index, limb) in limbs.iter_mut().enumerate() {
        *limb = u32::from_le_bytes([
            id[index * 4],
            id[index * 4 + 1],
            id[index * 4 + 2],
            id[index * 4 + 3],
        ]);
    }
    limbs
}

/// Fingerprint of a complete id slice in one shot.
pub fn fingerprint_of(ids: &[EventId]) -> Fingerprint {
    let mut accumulator = Accumulator::new();
    for id in ids {
        accumulator.add(id);
    }
    accumulator.fingerprint(ids.len() as u64)
}
