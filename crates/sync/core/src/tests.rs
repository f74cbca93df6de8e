use std::collections::HashSet;

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};

use super::accumulator::{Accumulator, fingerprint_of};
use super::bound::{Bound, TIMESTAMP_INFINITY};
use super::error::ProtocolError;
use super::event::Event;
use super::message::{Message, PROTOCOL_VERSION, Range, RangePayload};
use super::reconcile::{ReconcileConfig, Reconciler};
use super::storage::{Item, Storage};
use super::varint::{decode_varint, encode_varint};
use super::wire::{NegClose, NegErr, NegMsg, NegOpen};
use super::EventId;

fn id(byte: u8) -> EventId {
    [byte; 32]
}

// === Varint ===

#[test]
fn test_varint_known_encodings() {
    let cases = vec![
        (0u64, vec![0x00]),
        (1u64, vec![0x01]),
        (127u64, vec![0x7F]),
        (128u64, vec![0x81, 0x00]),
        (255u64, vec![0x81, 0x7F]),
        (300u64, vec![0x82, 0x2C]),
        (16383u64, vec![0xFF, 0x7F]),
        (16384u64, vec![0x81, 0x80, 0x00]),
    ];

    for (value, expected) in cases {
        let encoded = encode_varint(value);
        assert_eq!(encoded, expected, "encoding mismatch for {value}");
        let (decoded, len) = decode_varint(&encoded).unwrap();
        assert_eq!(decoded, value);
        assert_eq!(len, expected.len());
    }
}

#[test]
fn test_varint_roundtrip() {
    let values = vec![
        0,
        1,
        127,
        128,
        255,
        256,
        16383,
        16384,
        65535,
        2097151,
        2097152,
        u64::from(u32::MAX),
        u64::MAX / 2,
        u64::MAX - 1,
        u64::MAX,
    ];
    for value in values {
        let encoded = encode_varint(value);
        let (decoded, len) = decode_varint(&encoded).unwrap();
        assert_eq!(decoded, value, "roundtrip failed for {value}");
        assert_eq!(len, encoded.len());
        assert_eq!(
            encoded[encoded.len() - 1] & 0x80,
            0,
            "last byte must not have the continuation bit"
        );
    }
}

#[test]
fn test_varint_max_length() {
    assert_eq!(encode_varint(u64::MAX).len(), 10);
}

#[test]
fn test_varint_decode_errors() {
    assert!(matches!(
        decode_varint(&[]),
        Err(ProtocolError::Varint(_))
    ));
    // continuation bit set on the last byte
    assert!(decode_varint(&[0x80]).is_err());
    assert!(decode_varint(&[0x81, 0x80]).is_err());
    // longer than any u64 encoding
    assert!(decode_varint(&[0x80; 11]).is_err());
    // 11 significant digits overflow u64
    let overflow = vec![0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0x7F];
    assert!(decode_varint(&overflow).is_err());
}

#[test]
fn test_varint_decode_partial_buffer() {
    // two varints back to back: 128 then 127
    let buffer = vec![0x81, 0x00, 0x7F];
    let (first, len) = decode_varint(&buffer).unwrap();
    assert_eq!((first, len), (128, 2));
    let (second, len) = decode_varint(&buffer[2..]).unwrap();
    assert_eq!((second, len), (127, 1));
}

// === Bound ===

#[test]
fn test_bound_roundtrip_with_delta() {
    let bound = Bound::new(12345, vec![0xAB, 0xCD]).unwrap();
    for prev in [0u64, 100, 12345] {
        let mut encoded = Vec::new();
        bound.encode_into(&mut encoded, prev);
        let (decoded, consumed) = Bound::decode(&encoded, prev).unwrap();
        assert_eq!(decoded, bound);
        assert_eq!(consumed, encoded.len());
    }
}

#[test]
fn test_bound_infinity_roundtrip() {
    let bound = Bound::infinity();
    let mut encoded = Vec::new();
    bound.encode_into(&mut encoded, 9999);
    let (decoded, _) = Bound::decode(&encoded, 9999).unwrap();
    assert_eq!(decoded.timestamp, TIMESTAMP_INFINITY);
    assert!(decoded.is_infinity());
}

#[test]
fn test_bound_prefix_too_long() {
    assert!(Bound::new(0, vec![0; 33]).is_err());
}

#[test]
fn test_bound_ordering() {
    let a = Bound::new(10, vec![]).unwrap();
    let b = Bound::new(10, vec![0x01]).unwrap();
    let c = Bound::new(11, vec![]).unwrap();
    assert!(a < b);
    assert!(b < c);
    assert!(a < Bound::infinity());
    assert!(Bound::zero() < a);
}

// === Accumulator ===

#[test]
fn test_accumulator_order_independence() {
    let mut rng = StdRng::seed_from_u64(7);
    let mut ids: Vec<EventId> = (0..64).map(|_| rng.random()).collect();
    let reference = fingerprint_of(&ids);

    for _ in 0..16 {
        ids.shuffle(&mut rng);
        assert_eq!(fingerprint_of(&ids), reference);
    }
}

#[test]
fn test_accumulator_additive_invertibility() {
    let mut rng = StdRng::seed_from_u64(11);
    let mut accumulator = Accumulator::new();
    for _ in 0..8 {
        accumulator.add(&rng.random());
    }
    let before = accumulator;

    for _ in 0..32 {
        let x: EventId = rng.random();
        accumulator.add(&x);
        accumulator.subtract(&x);
        assert_eq!(accumulator, before);
    }
}

#[test]
fn test_accumulator_negate_is_twos_complement() {
    let mut accumulator = Accumulator::new();
    accumulator.add(&id(0x01));
    let mut negated = accumulator;
    negated.negate();
    // x + (-x) == 0
    let mut sum = accumulator;
    sum.add(&negated.to_bytes());
    assert_eq!(sum.to_bytes(), [0u8; 32]);
}

#[test]
fn test_fingerprint_count_sensitivity() {
    // same sum, different counts, different fingerprints
    let one = fingerprint_of(&[id(0x01)]);
    let two = fingerprint_of(&[id(0x01), id(0x01)]);
    assert_ne!(one, two);
}

#[test]
fn test_accumulator_reset() {
    let mut accumulator = Accumulator::new();
    accumulator.add(&id(0xFF));
    accumulator.reset();
    assert_eq!(accumulator, Accumulator::new());
}

#[test]
fn test_accumulator_carry_propagation() {
    // 0xFF..FF + 1 wraps to zero mod 2^256
    let mut accumulator = Accumulator::new();
    accumulator.add(&[0xFF; 32]);
    accumulator.add(&{
        let mut one = [0u8; 32];
        one[0] = 1;
        one
    });
    assert_eq!(accumulator.to_bytes(), [0u8; 32]);
}

// === Storage ===

fn items(pairs: &[(u64, u8)]) -> Vec<Item> {
    pairs.iter().map(|&(ts, b)| Item::new(ts, id(b))).collect()
}

#[test]
fn test_storage_lifecycle() {
    let mut storage = Storage::new();
    storage.insert(Item::new(10, id(1))).unwrap();

    // queries before sealing are rejected
    assert!(matches!(
        storage.range_items(&Bound::zero(), &Bound::infinity()),
        Err(ProtocolError::NotSealed)
    ));

    storage.seal();
    assert!(storage.is_sealed());

    // inserts after sealing are rejected
    assert!(matches!(
        storage.insert(Item::new(20, id(2))),
        Err(ProtocolError::Sealed)
    ));
}

#[test]
fn test_storage_seal_idempotent() {
    let mut storage = Storage::new();
    for item in items(&[(30, 3), (10, 1), (20, 2)]) {
        storage.insert(item).unwrap();
    }
    storage.seal();
    let first = storage.items().unwrap().to_vec();
    storage.seal();
    assert_eq!(storage.items().unwrap(), first.as_slice());
    assert_eq!(storage.len(), 3);
}

#[test]
fn test_storage_sorts_and_dedups() {
    let storage = Storage::sealed_from(items(&[(20, 2), (10, 1), (20, 2), (10, 9)]));
    let sorted = storage.items().unwrap();
    assert_eq!(sorted.len(), 3);
    assert_eq!(sorted[0], Item::new(10, id(1)));
    assert_eq!(sorted[1], Item::new(10, id(9)));
    assert_eq!(sorted[2], Item::new(20, id(2)));
}

#[test]
fn test_storage_range_lookup() {
    let storage = Storage::sealed_from(items(&[(100, 1), (200, 2), (300, 3), (400, 4)]));

    let all = storage
        .range_items(&Bound::zero(), &Bound::infinity())
        .unwrap();
    assert_eq!(all.len(), 4);

    // [200, 400) catches the middle two
    let middle = storage
        .range_items(
            &Bound::new(200, vec![]).unwrap(),
            &Bound::new(400, vec![]).unwrap(),
        )
        .unwrap();
    assert_eq!(middle.len(), 2);
    assert_eq!(middle[0].timestamp, 200);
    assert_eq!(middle[1].timestamp, 300);

    // empty gap
    let gap = storage
        .range_items(
            &Bound::new(150, vec![]).unwrap(),
            &Bound::new(180, vec![]).unwrap(),
        )
        .unwrap();
    assert!(gap.is_empty());
}

#[test]
fn test_storage_range_with_id_prefix_bounds() {
    let mut a = [0u8; 32];
    let mut b = [0u8; 32];
    let mut c = [0u8; 32];
    a[0] = 0x10;
    b[0] = 0x20;
    c[0] = 0x30;
    let storage = Storage::sealed_from(vec![
        Item::new(100, a),
        Item::new(100, b),
        Item::new(100, c),
    ]);

    let slice = storage
        .range_items(
            &Bound::new(100, vec![0x15]).unwrap(),
            &Bound::new(100, vec![0x25]).unwrap(),
        )
        .unwrap();
    assert_eq!(slice.len(), 1);
    assert_eq!(slice[0].id, b);

    // an empty-prefix upper bound excludes everything at its timestamp
    let below = storage
        .range_items(&Bound::zero(), &Bound::new(100, vec![]).unwrap())
        .unwrap();
    assert!(below.is_empty());
}

#[test]
fn test_storage_range_partition_consistency() {
    let mut rng = StdRng::seed_from_u64(23);
    let pool: Vec<Item> = (0..200)
        .map(|_| Item::new(rng.random_range(0..500), rng.random()))
        .collect();
    let storage = Storage::sealed_from(pool);

    let mut cuts: Vec<u64> = (0..3).map(|_| rng.random_range(0..500)).collect();
    cuts.sort_unstable();
    let mut bounds = vec![Bound::zero()];
    for cut in cuts {
        bounds.push(Bound::new(cut, vec![]).unwrap());
    }
    bounds.push(Bound::infinity());

    let (full_fingerprint, full_count) = storage
        .range_fingerprint(&Bound::zero(), &Bound::infinity())
        .unwrap();

    let mut accumulator = Accumulator::new();
    let mut total = 0u64;
    for window in bounds.windows(2) {
        let (_, count) = storage.range_fingerprint(&window[0], &window[1]).unwrap();
        for item in storage.range_items(&window[0], &window[1]).unwrap() {
            accumulator.add(&item.id);
        }
        total += count;
    }

    assert_eq!(total, full_count);
    assert_eq!(accumulator.fingerprint(total), full_fingerprint);
}

// === Message codec ===

#[test]
fn test_message_roundtrip() {
    let message = Message::new(vec![
        Range::skip(Bound::new(100, vec![]).unwrap()),
        Range::fingerprint(Bound::new(200, vec![0x01]).unwrap(), [0xAB; 16]),
        Range::id_list(Bound::infinity(), vec![id(0x01), id(0x02)]),
    ]);
    let hex = message.encode_hex();
    let decoded = Message::decode_hex(&hex).unwrap();
    assert_eq!(decoded, message);
}

#[test]
fn test_message_version_byte() {
    let encoded = Message::new(vec![]).encode();
    assert_eq!(encoded, vec![PROTOCOL_VERSION]);
    assert!(Message::decode(&encoded).unwrap().ranges.is_empty());
}

#[test]
fn test_message_decode_malformed() {
    struct Case {
        name: &'static str,
        bytes: Vec<u8>,
    }

    let descending = {
        // two ranges with the same upper bound
        let bound = Bound::new(100, vec![]).unwrap();
        let mut message = Message::new(vec![Range::skip(bound.clone())]).encode();
        let mut second = Vec::new();
        Range::skip(bound).encode_into(&mut second, 100);
        message.extend_from_slice(&second);
        message
    };

    let after_infinity = {
        let mut message = Message::new(vec![Range::skip(Bound::infinity())]).encode();
        let mut trailing = Vec::new();
        Range::skip(Bound::new(u64::MAX, vec![0x01]).unwrap()).encode_into(&mut trailing, 0);
        message.extend_from_slice(&trailing);
        message
    };

    let cases = vec![
        Case {
            name: "empty input",
            bytes: vec![],
        },
        Case {
            name: "wrong version",
            bytes: vec![0x60],
        },
        Case {
            name: "truncated fingerprint",
            bytes: {
                let mut bytes = vec![PROTOCOL_VERSION];
                Bound::new(10, vec![]).unwrap().encode_into(&mut bytes, 0);
                bytes.push(0x01); // fingerprint mode, no payload
                bytes
            },
        },
        Case {
            name: "id list longer than buffer",
            bytes: {
                let mut bytes = vec![PROTOCOL_VERSION];
                Bound::new(10, vec![]).unwrap().encode_into(&mut bytes, 0);
                bytes.push(0x02); // id list mode
                bytes.extend_from_slice(&encode_varint(1000));
                bytes.extend_from_slice(&[0u8; 32]);
                bytes
            },
        },
        Case {
            name: "unknown mode",
            bytes: {
                let mut bytes = vec![PROTOCOL_VERSION];
                Bound::new(10, vec![]).unwrap().encode_into(&mut bytes, 0);
                bytes.push(0x07);
                bytes
            },
        },
        Case {
            name: "bounds not ascending",
            bytes: descending,
        },
        Case {
            name: "range after infinity",
            bytes: after_infinity,
        },
    ];

    for case in cases {
        assert!(
            Message::decode(&case.bytes).is_err(),
            "{}: expected a decode error",
            case.name
        );
    }
}

#[test]
fn test_message_decode_bad_hex() {
    assert!(matches!(
        Message::decode_hex("zz"),
        Err(ProtocolError::InvalidHex(_))
    ));
}

// === Wire envelopes ===

#[test]
fn test_neg_open_roundtrip() {
    let open = NegOpen::new(
        "sub1".to_string(),
        serde_json::json!({"kinds": [1]}),
        &Message::new(vec![]),
    );
    let parsed = NegOpen::from_json(&open.to_json()).unwrap();
    assert_eq!(parsed.subscription_id, "sub1");
    assert_eq!(parsed.initial_message, open.initial_message);
    assert_eq!(parsed.filter, open.filter);
}

#[test]
fn test_neg_msg_roundtrip() {
    let message = Message::new(vec![Range::skip(Bound::infinity())]);
    let frame = NegMsg::new("sub2".to_string(), &message);
    let parsed = NegMsg::from_json(&frame.to_json()).unwrap();
    assert_eq!(parsed.decode_message().unwrap(), message);
}

#[test]
fn test_neg_err_and_close_roundtrip() {
    let err = NegErr::new("sub3".to_string(), "blocked: rate limit".to_string());
    let parsed = NegErr::from_json(&err.to_json()).unwrap();
    assert_eq!(parsed.reason, "blocked: rate limit");

    let close = NegClose::new("sub3".to_string());
    let parsed = NegClose::from_json(&close.to_json()).unwrap();
    assert_eq!(parsed.subscription_id, "sub3");
}

#[test]
fn test_wire_malformed_frames() {
    struct Case {
        name: &'static str,
        value: serde_json::Value,
    }

    let cases = vec![
        Case {
            name: "not an array",
            value: serde_json::json!({"tag": "NEG-MSG"}),
        },
        Case {
            name: "wrong tag",
            value: serde_json::json!(["NEG-CLOSE", "sub", "aa"]),
        },
        Case {
            name: "too short",
            value: serde_json::json!(["NEG-MSG", "sub"]),
        },
        Case {
            name: "subscription id not a string",
            value: serde_json::json!(["NEG-MSG", 42, "aa"]),
        },
    ];

    for case in cases {
        assert!(
            NegMsg::from_json(&case.value).is_err(),
            "{}: expected a frame error",
            case.name
        );
    }
}

// === Event ===

#[test]
fn test_event_id_bytes() {
    let event = Event {
        id: hex::encode([0x5A; 32]),
        pubkey: "pk".to_string(),
        created_at: 42,
        kind: 1,
        tags: vec![],
        content: "hello".to_string(),
        sig: "sig".to_string(),
    };
    assert_eq!(event.id_bytes().unwrap(), [0x5A; 32]);
    assert_eq!(event.item().unwrap(), Item::new(42, [0x5A; 32]));

    let short = Event {
        id: "abcd".to_string(),
        ..event
    };
    assert!(short.id_bytes().is_err());
}

// === Reconciliation ===

/// Minimal non-initiating peer for driving the reconciler to convergence:
/// answers fingerprint mismatches with splits of its own set and id lists
/// with its own id lists.
fn respond(storage: &Storage, incoming: &Message, config: &ReconcileConfig) -> Message {
    let mut ranges = Vec::new();
    let mut lower = Bound::zero();

    for range in &incoming.ranges {
        let upper = &range.upper_bound;
        match &range.payload {
            RangePayload::Skip => ranges.push(Range::skip(upper.clone())),

            RangePayload::Fingerprint(theirs) => {
                let (ours, _) = storage.range_fingerprint(&lower, upper).unwrap();
                if ours == *theirs {
                    ranges.push(Range::skip(upper.clone()));
                } else {
                    split_for_peer(storage, &lower, upper, config, &mut ranges);
                }
            }

            RangePayload::IdList(_) => {
                let ids = storage
                    .range_items(&lower, upper)
                    .unwrap()
                    .iter()
                    .map(|item| item.id)
                    .collect();
                ranges.push(Range::id_list(upper.clone(), ids));
            }
        }
        lower = range.upper_bound.clone();
    }

    Message::new(ranges)
}

fn split_for_peer(
    storage: &Storage,
    lower: &Bound,
    upper: &Bound,
    config: &ReconcileConfig,
    out: &mut Vec<Range>,
) {
    let items = storage.range_items(lower, upper).unwrap();
    if items.len() <= config.idlist_threshold {
        out.push(Range::id_list(
            upper.clone(),
            items.iter().map(|item| item.id).collect(),
        ));
        return;
    }

    let buckets = config.branching;
    let per_bucket = items.len() / buckets;
    let extra = items.len() % buckets;
    let mut start = 0;
    for bucket in 0..buckets {
        let end = start + per_bucket + usize::from(bucket < extra);
        let slice = &items[start..end];
        let mut accumulator = Accumulator::new();
        for item in slice {
            accumulator.add(&item.id);
        }
        let bound = if end == items.len() {
            upper.clone()
        } else {
            Bound::new(items[end].timestamp, items[end].id.to_vec()).unwrap()
        };
        out.push(Range::fingerprint(bound, accumulator.fingerprint(slice.len() as u64)));
        start = end;
    }
}

/// Drive a full negotiation between two item sets and return
/// `(need, have, outgoing frame sizes)`.
fn run_sync(
    local: Vec<Item>,
    remote: Vec<Item>,
    config: ReconcileConfig,
) -> (HashSet<EventId>, HashSet<EventId>, Vec<usize>) {
    let mut reconciler =
        Reconciler::new(Storage::sealed_from(local), config.clone()).unwrap();
    let peer = Storage::sealed_from(remote);

    let mut outgoing = reconciler.initial_message().unwrap();
    let mut sizes = vec![outgoing.encode().len()];

    for _ in 0..64 {
        let reply = respond(&peer, &outgoing, &config);
        match reconciler.reconcile(&reply).unwrap() {
            Some(next) => {
                sizes.push(next.encode().len());
                outgoing = next;
            }
            None => {
                let (need, have) = reconciler.into_sets();
                return (need, have, sizes);
            }
        }
    }
    panic!("negotiation did not converge");
}

fn expected_diff(local: &[Item], remote: &[Item]) -> (HashSet<EventId>, HashSet<EventId>) {
    let local_ids: HashSet<EventId> = local.iter().map(|item| item.id).collect();
    let remote_ids: HashSet<EventId> = remote.iter().map(|item| item.id).collect();
    let need = remote_ids.difference(&local_ids).copied().collect();
    let have = local_ids.difference(&remote_ids).copied().collect();
    (need, have)
}

#[test]
fn test_reconciler_requires_sealed_storage() {
    let storage = Storage::new();
    assert!(matches!(
        Reconciler::new(storage, ReconcileConfig::default()),
        Err(ProtocolError::NotSealed)
    ));
}

#[test]
fn test_reconciler_rejects_tiny_frame_limit() {
    let storage = Storage::sealed_from(vec![]);
    let config = ReconcileConfig {
        frame_size_limit: 100,
        ..Default::default()
    };
    assert!(matches!(
        Reconciler::new(storage, config),
        Err(ProtocolError::FrameSizeLimitTooSmall(100))
    ));
}

#[test]
fn test_initial_message_forms() {
    let empty = Reconciler::new(Storage::sealed_from(vec![]), ReconcileConfig::default()).unwrap();
    let message = empty.initial_message().unwrap();
    assert_eq!(message.ranges.len(), 1);
    assert!(matches!(
        &message.ranges[0].payload,
        RangePayload::IdList(ids) if ids.is_empty()
    ));

    let populated = Reconciler::new(
        Storage::sealed_from(items(&[(10, 1), (20, 2)])),
        ReconcileConfig::default(),
    )
    .unwrap();
    let message = populated.initial_message().unwrap();
    assert_eq!(message.ranges.len(), 1);
    assert!(message.ranges[0].upper_bound.is_infinity());
    assert!(matches!(
        message.ranges[0].payload,
        RangePayload::Fingerprint(_)
    ));
}

#[test]
fn test_reconcile_rejects_partial_coverage() {
    let mut reconciler =
        Reconciler::new(Storage::sealed_from(vec![]), ReconcileConfig::default()).unwrap();
    let partial = Message::new(vec![Range::skip(Bound::new(100, vec![]).unwrap())]);
    assert!(reconciler.reconcile(&partial).is_err());
}

#[test]
fn test_convergence_identical_sets() {
    let set = items(&[(10, 1), (20, 2), (30, 3)]);
    let (need, have, sizes) = run_sync(set.clone(), set, ReconcileConfig::default());
    assert!(need.is_empty());
    assert!(have.is_empty());
    // one fingerprint exchange settles everything
    assert_eq!(sizes.len(), 1);
}

#[test]
fn test_convergence_scenario() {
    // A = {1,2,3} @ {10,20,30}; B = {2,3,4} @ {20,30,40}
    let local = items(&[(10, 1), (20, 2), (30, 3)]);
    let remote = items(&[(20, 2), (30, 3), (40, 4)]);

    let (need, have, _) = run_sync(local, remote, ReconcileConfig::default());

    assert_eq!(need, HashSet::from([id(4)]));
    assert_eq!(have, HashSet::from([id(1)]));
}

#[test]
fn test_convergence_empty_local() {
    let remote = items(&[(10, 1), (20, 2), (30, 3)]);
    let (need, have, _) = run_sync(vec![], remote.clone(), ReconcileConfig::default());
    let (expected_need, expected_have) = expected_diff(&[], &remote);
    assert_eq!(need, expected_need);
    assert!(have.is_empty());
    assert_eq!(have, expected_have);
}

#[test]
fn test_convergence_empty_remote() {
    let local = items(&[(10, 1), (20, 2)]);
    let (need, have, _) = run_sync(local.clone(), vec![], ReconcileConfig::default());
    assert!(need.is_empty());
    assert_eq!(have, local.iter().map(|item| item.id).collect());
}

#[test]
fn test_convergence_both_empty() {
    let (need, have, _) = run_sync(vec![], vec![], ReconcileConfig::default());
    assert!(need.is_empty());
    assert!(have.is_empty());
}

#[test]
fn test_convergence_disjoint_sets() {
    let mut rng = StdRng::seed_from_u64(31);
    let local: Vec<Item> = (0..100)
        .map(|_| Item::new(rng.random_range(0..1000), rng.random()))
        .collect();
    let remote: Vec<Item> = (0..100)
        .map(|_| Item::new(rng.random_range(0..1000), rng.random()))
        .collect();

    let (need, have, _) = run_sync(local.clone(), remote.clone(), ReconcileConfig::default());
    let (expected_need, expected_have) = expected_diff(&local, &remote);
    assert_eq!(need, expected_need);
    assert_eq!(have, expected_have);
}

#[test]
fn test_convergence_randomized_overlap() {
    let mut rng = StdRng::seed_from_u64(43);

    for round in 0..8 {
        let pool: Vec<Item> = (0..400)
            .map(|_| Item::new(rng.random_range(0..2000), rng.random()))
            .collect();

        let local: Vec<Item> = pool
            .iter()
            .filter(|_| rng.random_bool(0.7))
            .copied()
            .collect();
        let remote: Vec<Item> = pool
            .iter()
            .filter(|_| rng.random_bool(0.7))
            .copied()
            .collect();

        let (need, have, _) =
            run_sync(local.clone(), remote.clone(), ReconcileConfig::default());
        let (expected_need, expected_have) = expected_diff(&local, &remote);
        assert_eq!(need, expected_need, "need mismatch in round {round}");
        assert_eq!(have, expected_have, "have mismatch in round {round}");
    }
}

#[test]
fn test_convergence_same_timestamp_items() {
    // forces id-prefix bounds during splitting
    let mut rng = StdRng::seed_from_u64(59);
    let local: Vec<Item> = (0..120).map(|_| Item::new(500, rng.random())).collect();
    let mut remote = local[..60].to_vec();
    remote.extend((0..60).map(|_| Item::new(500, rng.random::<EventId>())));

    let (need, have, _) = run_sync(local.clone(), remote.clone(), ReconcileConfig::default());
    let (expected_need, expected_have) = expected_diff(&local, &remote);
    assert_eq!(need, expected_need);
    assert_eq!(have, expected_have);
}

#[test]
fn test_frame_size_cap_is_respected() {
    let mut rng = StdRng::seed_from_u64(71);
    let local: Vec<Item> = (0..1200)
        .map(|_| Item::new(rng.random_range(0..100_000), rng.random()))
        .collect();
    let remote: Vec<Item> = (0..1200)
        .map(|_| Item::new(rng.random_range(0..100_000), rng.random()))
        .collect();

    let config = ReconcileConfig {
        frame_size_limit: super::MIN_FRAME_SIZE_LIMIT,
        ..Default::default()
    };
    let (need, have, sizes) = run_sync(local.clone(), remote.clone(), config);

    for (round, size) in sizes.iter().enumerate() {
        assert!(
            *size <= super::MIN_FRAME_SIZE_LIMIT,
            "round {round} frame of {size} bytes exceeds the cap"
        );
    }

    let (expected_need, expected_have) = expected_diff(&local, &remote);
    assert_eq!(need, expected_need);
    assert_eq!(have, expected_have);
}
