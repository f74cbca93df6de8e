//! Timestamp-sorted candidate set for one sync query.

use std::cmp::Ordering;

use crate::accumulator::Accumulator;
use crate::bound::Bound;
use crate::error::{ProtocolError, Result};
use crate::{EventId, Fingerprint};

/// A candidate event descriptor: creation time plus content hash.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct Item {
    pub timestamp: u64,
    pub id: EventId,
}

impl Item {
    pub fn new(timestamp: u64, id: EventId) -> Self {
        Self { timestamp, id }
    }
}

/// The local side of a negotiation: an append-then-seal collection of items
/// ordered by `(timestamp, id)`.
///
/// Two lifecycle states: while *open* items may be inserted but not queried;
/// once *sealed* the set is sorted, deduplicated and read-only. Sealing twice
/// is a no-op.
#[derive(Debug, Clone, Default)]
pub struct Storage {
    items: Vec<Item>,
    sealed: bool,
}

impl Storage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a sealed storage directly from an item collection.
    pub fn sealed_from(items: impl IntoIterator<Item = Item>) -> Self {
        let mut storage = Self {
            items: items.into_iter().collect(),
            sealed: false,
        };
        storage.seal();
        storage
    }

    /// Append an item. Errors once the storage has been sealed.
    pub fn insert(&mut self, item: Item) -> Result<()> {
        if self.sealed {
            return Err(ProtocolError::Sealed);
        }
        self.items.push(item);
        Ok(())
    }

    /// Sort by `(timestamp, id)`, drop exact duplicates and freeze.
    pub fn seal(&mut self) {
        if self.sealed {
            return;
        }
        self.items.sort_unstable();
        self.items.dedup();
        self.sealed = true;
    }

    pub fn is_sealed(&self) -> bool {
        self.sealed
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// All items in sorted order. Errors while the storage is still open.
    pub fn items(&self) -> Result<&[Item]> {
        if !self.sealed {
            return Err(ProtocolError::NotSealed);
        }
        Ok(&self.items)
    }

    /// Items whose `(timestamp, id)` falls in `[lower, upper)`.
    ///
    /// Binary search on both edges, so the cost is `O(log n)` plus the size
    /// of the returned slice.
    pub fn range_items(&self, lower: &Bound, upper: &Bound) -> Result<&[Item]> {
        let (start, end) = self.range_indices(lower, upper)?;
        Ok(&self.items[start..end])
    }

    /// Fingerprint and item count for `[lower, upper)`.
    pub fn range_fingerprint(&self, lower: &Bound, upper: &Bound) -> Result<(Fingerprint, u64)> {
        let slice = self.range_items(lower, upper)?;
        let mut accumulator = Accumulator::new();
        for item in slice {
            accumulator.add(&item.id);
        }
        let count = slice.len() as u64;
        Ok((accumulator.fingerprint(count), count))
    }

    fn range_indices(&self, lower: &Bound, upper: &Bound) -> Result<(usize, usize)> {
        if !self.sealed {
            return Err(ProtocolError::NotSealed);
        }
        let start = self.items.partition_point(|item| item_precedes(item, lower));
        let end = self.items.partition_point(|item| item_precedes(item, upper));
        Ok((start, end.max(start)))
    }
}

/// True when the item sorts strictly below the bound.
///
/// At equal timestamps only the bound's prefix length of the id is compared,
/// so an empty prefix sorts before every id at that timestamp.
fn item_precedes(item: &Item, bound: &Bound) -> bool {
    match item.timestamp.cmp(&bound.timestamp) {
        Ordering::Less => true,
        Ordering::Greater => false,
        Ordering::Equal => {
            let prefix = bound.id_prefix.as_slice();
            item.id[..prefix.len().min(32)] < *prefix
        }
    }
}
