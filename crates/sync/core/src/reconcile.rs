//! Initiator-side range reconciliation.
//!
//! The reconciler drives one side of a negotiation: it diffs a peer message
//! against the local sealed storage, answers matched ranges with skips,
//! subdivides mismatched fingerprint ranges, and absorbs peer id lists into
//! the accumulated need/have sets. It performs no I/O; a session layer feeds
//! it inbound messages and sends whatever it produces.

use std::collections::HashSet;

use crate::accumulator::Accumulator;
use crate::bound::Bound;
use crate::error::{ProtocolError, Result};
use crate::message::{Message, Range, RangePayload};
use crate::storage::{Item, Storage};
use crate::{EventId, Fingerprint};

/// Default cap on the encoded size of one outgoing message.
pub const DEFAULT_FRAME_SIZE_LIMIT: usize = 50_000;

/// Smallest frame size limit the refinement logic can operate under.
/// Below this a single subdivided range may not fit in a frame at all.
pub const MIN_FRAME_SIZE_LIMIT: usize = 4_096;

/// Headroom kept free when filling a frame, so a deferral range always fits.
const FRAME_RESERVE: usize = 200;

/// Protocol tuning constants.
///
/// `branching` and `idlist_threshold` follow the published reference
/// implementation of the protocol; diverging from them would not break
/// correctness but changes bandwidth behavior against deployed relays.
#[derive(Debug, Clone)]
pub struct ReconcileConfig {
    /// Number of sub-ranges a mismatched fingerprint range is split into.
    pub branching: usize,
    /// At or below this many local items, answer a mismatch with an id list
    /// instead of subdividing further.
    pub idlist_threshold: usize,
    /// Cap on the encoded size of one outgoing message. Zero disables the
    /// cap; non-zero values below [`MIN_FRAME_SIZE_LIMIT`] are rejected.
    pub frame_size_limit: usize,
}

impl Default for ReconcileConfig {
    fn default() -> Self {
        Self {
            branching: 16,
            idlist_threshold: 32,
            frame_size_limit: DEFAULT_FRAME_SIZE_LIMIT,
        }
    }
}

/// One negotiation's worth of reconciliation state.
pub struct Reconciler {
    storage: Storage,
    config: ReconcileConfig,
    /// Ids the peer has and we lack.
    need: HashSet<EventId>,
    /// Ids we have and the peer lacks.
    have: HashSet<EventId>,
}

impl Reconciler {
    /// Wrap a sealed storage. Errors if the storage is still open or the
    /// frame size limit is unusably small.
    pub fn new(storage: Storage, config: ReconcileConfig) -> Result<Self> {
        if !storage.is_sealed() {
            return Err(ProtocolError::NotSealed);
        }
        if config.frame_size_limit != 0 && config.frame_size_limit < MIN_FRAME_SIZE_LIMIT {
            return Err(ProtocolError::FrameSizeLimitTooSmall(config.frame_size_limit));
        }
        Ok(Self {
            storage,
            config,
            need: HashSet::new(),
            have: HashSet::new(),
        })
    }

    pub fn storage(&self) -> &Storage {
        &self.storage
    }

    pub fn need(&self) -> &HashSet<EventId> {
        &self.need
    }

    pub fn have(&self) -> &HashSet<EventId> {
        &self.have
    }

    /// Consume the reconciler, yielding `(need, have)`.
    pub fn into_sets(self) -> (HashSet<EventId>, HashSet<EventId>) {
        (self.need, self.have)
    }

    /// The opening message: the whole space as one fingerprint range, or an
    /// empty id list when we hold nothing (inviting the peer to enumerate
    /// its side, which a bare skip would not).
    pub fn initial_message(&self) -> Result<Message> {
        if self.storage.is_empty() {
            return Ok(Message::new(vec![Range::id_list(Bound::infinity(), vec![])]));
        }
        let (fingerprint, _) = self
            .storage
            .range_fingerprint(&Bound::zero(), &Bound::infinity())?;
        Ok(Message::new(vec![Range::fingerprint(
            Bound::infinity(),
            fingerprint,
        )]))
    }

    /// Process one inbound peer message and build the reply.
    ///
    /// Returns `Ok(None)` when the reply would contain nothing but skips,
    /// which means every range has been settled and the negotiation is done.
    pub fn reconcile(&mut self, incoming: &Message) -> Result<Option<Message>> {
        match incoming.ranges.last() {
            Some(last) if last.upper_bound.is_infinity() => {}
            _ => {
                return Err(ProtocolError::InvalidRange(
                    "message does not cover the full range".to_string(),
                ));
            }
        }

        let mut builder = MessageBuilder::new(self.config.frame_size_limit);
        let mut lower = Bound::zero();

        for range in &incoming.ranges {
            let upper = &range.upper_bound;

            match &range.payload {
                RangePayload::Skip => {
                    builder.skip(upper.clone());
                }

                RangePayload::Fingerprint(theirs) => {
                    let (ours, _) = self.storage.range_fingerprint(&lower, upper)?;
                    if ours == *theirs {
                        builder.skip(upper.clone());
                    } else if self.split_range(&lower, upper, &mut builder)? {
                        // Frame budget spent partway through this range: park
                        // everything past it behind one fingerprint entry to
                        // infinity and refine it next round.
                        if !upper.is_infinity() {
                            let (fingerprint, _) = self
                                .storage
                                .range_fingerprint(upper, &Bound::infinity())?;
                            builder.push(Range::fingerprint(Bound::infinity(), fingerprint));
                        }
                        return Ok(builder.finish());
                    }
                }

                RangePayload::IdList(their_ids) => {
                    let our_items = self.storage.range_items(&lower, upper)?;
                    let theirs: HashSet<EventId> = their_ids.iter().copied().collect();
                    let ours: HashSet<EventId> =
                        our_items.iter().map(|item| item.id).collect();

                    for id in theirs.difference(&ours) {
                        self.need.insert(*id);
                    }
                    for id in ours.difference(&theirs) {
                        self.have.insert(*id);
                    }

                    builder.skip(upper.clone());
                }
            }

            lower = range.upper_bound.clone();
        }

        Ok(builder.finish())
    }

    /// Subdivide a mismatched range: small ranges become id lists, larger
    /// ones split into `branching` near-equal-count fingerprint buckets.
    ///
    /// Returns `true` when the frame budget ran out partway, in which case
    /// the unsent remainder was deferred behind a fingerprint entry ending
    /// at `upper`.
    fn split_range(
        &self,
        lower: &Bound,
        upper: &Bound,
        builder: &mut MessageBuilder,
    ) -> Result<bool> {
        let items = self.storage.range_items(lower, upper)?;

        if items.len() <= self.config.idlist_threshold {
            let ids = items.iter().map(|item| item.id).collect();
            if builder.try_push(Range::id_list(upper.clone(), ids)) {
                return Ok(false);
            }
            builder.push(Range::fingerprint(upper.clone(), fingerprint_of_items(items)));
            return Ok(true);
        }

        let buckets = self.config.branching.max(2);
        let per_bucket = items.len() / buckets;
        let extra = items.len() % buckets;

        let mut accumulator = Accumulator::new();
        let mut start = 0usize;
        for bucket in 0..buckets {
            let len = per_bucket + usize::from(bucket < extra);
            let end = start + len;
            let slice = &items[start..end];

            accumulator.reset();
            for item in slice {
                accumulator.add(&item.id);
            }
            let fingerprint = accumulator.fingerprint(slice.len() as u64);

            let bound = if end == items.len() {
                upper.clone()
            } else {
                minimal_bound(&items[end - 1], &items[end])?
            };

            if !builder.try_push(Range::fingerprint(bound, fingerprint)) {
                // The rest of this range rides on one fingerprint entry.
                builder.push(Range::fingerprint(
                    upper.clone(),
                    fingerprint_of_items(&items[start..]),
                ));
                return Ok(true);
            }
            start = end;
        }

        Ok(false)
    }
}

fn fingerprint_of_items(items: &[Item]) -> Fingerprint {
    let mut accumulator = Accumulator::new();
    for item in items {
        accumulator.add(&item.id);
    }
    accumulator.fingerprint(items.len() as u64)
}

/// The shortest bound that separates two adjacent sorted items: either the
/// next item's bare timestamp, or (at equal timestamps) one byte past their
/// longest shared id prefix.
fn minimal_bound(prev: &Item, next: &Item) -> Result<Bound> {
    if next.timestamp != prev.timestamp {
        return Bound::new(next.timestamp, vec![]);
    }
    let shared = prev
        .id
        .iter()
        .zip(next.id.iter())
        .take_while(|(a, b)| a == b)
        .count();
    let prefix_len = (shared + 1).min(32);
    Bound::new(next.timestamp, next.id[..prefix_len].to_vec())
}

/// Accumulates outgoing ranges, coalescing runs of skips and tracking the
/// exact encoded size against the frame limit.
struct MessageBuilder {
    ranges: Vec<Range>,
    encoded_len: usize,
    prev_timestamp: u64,
    pending_skip: Option<Bound>,
    payload_ranges: usize,
    limit: usize,
}

impl MessageBuilder {
    fn new(limit: usize) -> Self {
        Self {
            ranges: Vec::new(),
            // version byte
            encoded_len: 1,
            prev_timestamp: 0,
            pending_skip: None,
            payload_ranges: 0,
            limit,
        }
    }

    /// Note a settled range. Consecutive skips collapse into one entry with
    /// the last bound.
    fn skip(&mut self, upper_bound: Bound) {
        self.pending_skip = Some(upper_bound);
    }

    fn push(&mut self, range: Range) {
        if let Some(bound) = self.pending_skip.take() {
            self.push_raw(Range::skip(bound));
        }
        self.push_raw(range);
    }

    /// Append a range unless its encoded form (plus any pending skip) would
    /// push the frame past its budget. The reserve keeps room for deferral
    /// entries, which go through [`push`](Self::push) unconditionally.
    fn try_push(&mut self, range: Range) -> bool {
        if self.limit != 0 {
            let mut scratch = Vec::new();
            let mut prev_timestamp = self.prev_timestamp;
            if let Some(bound) = &self.pending_skip {
                Range::skip(bound.clone()).encode_into(&mut scratch, prev_timestamp);
                prev_timestamp = bound.timestamp;
            }
            range.encode_into(&mut scratch, prev_timestamp);
            if self.encoded_len + scratch.len() + FRAME_RESERVE > self.limit {
                return false;
            }
        }
        self.push(range);
        true
    }

    fn push_raw(&mut self, range: Range) {
        let mut scratch = Vec::new();
        range.encode_into(&mut scratch, self.prev_timestamp);
        self.encoded_len += scratch.len();
        self.prev_timestamp = range.upper_bound.timestamp;
        if !matches!(range.payload, RangePayload::Skip) {
            self.payload_ranges += 1;
        }
        self.ranges.push(range);
    }

    /// Finish the message, or `None` when nothing but skips accumulated
    /// (full convergence: there is no point sending pure agreement).
    fn finish(mut self) -> Option<Message> {
        if self.payload_ranges == 0 {
            return None;
        }
        if let Some(bound) = self.pending_skip.take() {
            self.push_raw(Range::skip(bound));
        }
        Some(Message::new(self.ranges))
    }
}
