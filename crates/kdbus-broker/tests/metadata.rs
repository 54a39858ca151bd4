// Copyright © 2025 Lukas Bower
// SPDX-License-Identifier: Apache-2.0
// Purpose: Validate metadata collection classes, idempotence, and namespace pinning.
// Author: Lukas Bower
#![forbid(unsafe_code)]

mod support;

use kdbus_broker::{AttachFlags, Metadata};
use kdbus_wire::{ItemIter, ItemType};
use support::{FakeProcess, FixedClock};

fn record_types(meta: &Metadata) -> Vec<u64> {
    ItemIter::new(meta.buffer())
        .map(|item| item.expect("valid stream").type_raw())
        .collect()
}

#[test]
fn requested_classes_emit_their_record_counts() {
    let clock = FixedClock::new(111, 222);
    let process = FakeProcess::with_uid(1000);
    let mut meta = Metadata::new(&process);

    let mask = AttachFlags::TIMESTAMP
        .with(AttachFlags::CREDS)
        .with(AttachFlags::COMM);
    meta.append(mask, &clock, &process, None, 7).expect("collected");

    // timestamp: 1 record, creds: 1, comm: 2.
    assert_eq!(
        record_types(&meta),
        vec![
            ItemType::Timestamp as u64,
            ItemType::Creds as u64,
            ItemType::TidComm as u64,
            ItemType::PidComm as u64,
        ]
    );
    assert!(meta.attached().contains(mask));
}

#[test]
fn repeating_a_mask_appends_no_new_bytes() {
    let clock = FixedClock::new(111, 222);
    let process = FakeProcess::with_uid(1000);
    let mut meta = Metadata::new(&process);

    let mask = AttachFlags::TIMESTAMP
        .with(AttachFlags::CREDS)
        .with(AttachFlags::COMM);
    meta.append(mask, &clock, &process, None, 7).expect("collected");
    let snapshot = meta.buffer().to_vec();

    meta.append(mask, &clock, &process, None, 7).expect("no-op");
    assert_eq!(meta.buffer(), snapshot.as_slice());
}

#[test]
fn later_masks_append_only_the_missing_classes() {
    let clock = FixedClock::new(111, 222);
    let process = FakeProcess::with_uid(1000);
    let mut meta = Metadata::new(&process);

    meta.append(
        AttachFlags::TIMESTAMP.with(AttachFlags::CREDS).with(AttachFlags::COMM),
        &clock,
        &process,
        None,
        7,
    )
    .expect("collected");
    meta.append(
        AttachFlags::TIMESTAMP.with(AttachFlags::EXE),
        &clock,
        &process,
        None,
        7,
    )
    .expect("collected");

    let types = record_types(&meta);
    assert_eq!(types.last().copied(), Some(ItemType::Exe as u64));
    assert_eq!(
        types
            .iter()
            .filter(|ty| **ty == ItemType::Timestamp as u64)
            .count(),
        1
    );
}

#[test]
fn timestamp_record_carries_clock_and_sequence() {
    let clock = FixedClock::new(111, 222);
    let process = FakeProcess::with_uid(1000);
    let mut meta = Metadata::new(&process);
    meta.append(AttachFlags::TIMESTAMP, &clock, &process, None, 9)
        .expect("collected");

    let item = ItemIter::new(meta.buffer())
        .next()
        .expect("one record")
        .expect("valid");
    let payload = item.payload();
    let seq = u64::from_le_bytes(payload[..8].try_into().expect("seq field"));
    let monotonic = u64::from_le_bytes(payload[8..16].try_into().expect("monotonic field"));
    let realtime = u64::from_le_bytes(payload[16..24].try_into().expect("realtime field"));
    assert_eq!((seq, monotonic, realtime), (9, 111, 222));
}

#[test]
fn creds_record_reflects_the_caller() {
    let clock = FixedClock::new(111, 222);
    let process = FakeProcess::with_uid(1000);
    let mut meta = Metadata::new(&process);
    meta.append(AttachFlags::CREDS, &clock, &process, None, 0)
        .expect("collected");

    let item = ItemIter::new(meta.buffer())
        .next()
        .expect("one record")
        .expect("valid");
    let payload = item.payload();
    assert_eq!(payload.len(), 40);
    let uid = u64::from_le_bytes(payload[..8].try_into().expect("uid field"));
    assert_eq!(uid, 1000);
}

#[test]
fn caps_record_masks_unused_high_bits() {
    let clock = FixedClock::new(111, 222);
    let mut process = FakeProcess::with_uid(1000);
    process.caps.permitted = u64::MAX;
    process.last_cap = 7;
    let mut meta = Metadata::new(&process);
    meta.append(AttachFlags::CAPS, &clock, &process, None, 0)
        .expect("collected");

    let item = ItemIter::new(meta.buffer())
        .next()
        .expect("one record")
        .expect("valid");
    let payload = item.payload();
    assert_eq!(payload.len(), 32);
    let permitted = u64::from_le_bytes(payload[8..16].try_into().expect("permitted field"));
    assert_eq!(permitted, 0xff);
}

#[test]
fn transient_failure_leaves_the_class_retryable() {
    let clock = FixedClock::new(111, 222);
    let process = FakeProcess::with_uid(1000);
    process.set_exe_fails(true);
    let mut meta = Metadata::new(&process);

    meta.append(AttachFlags::EXE, &clock, &process, None, 0)
        .expect_err("address space unavailable");
    assert!(!meta.attached().contains(AttachFlags::EXE));

    process.set_exe_fails(false);
    meta.append(AttachFlags::EXE, &clock, &process, None, 0)
        .expect("retry succeeds");
    assert!(meta.attached().contains(AttachFlags::EXE));
    assert_eq!(record_types(&meta), vec![ItemType::Exe as u64]);
}

#[test]
fn absent_facilities_are_skipped_without_error() {
    let clock = FixedClock::new(111, 222);
    let mut process = FakeProcess::with_uid(1000);
    process.cgroup = None;
    process.audit = None;
    process.seclabel = None;
    let mut meta = Metadata::new(&process);

    let mask = AttachFlags::CGROUP
        .with(AttachFlags::AUDIT)
        .with(AttachFlags::SECLABEL);
    meta.append(mask, &clock, &process, None, 0)
        .expect("absence is not an error");
    assert!(meta.buffer().is_empty());
    assert!(!meta.attached().contains(AttachFlags::CGROUP));
    assert!(!meta.attached().contains(AttachFlags::AUDIT));
    assert!(!meta.attached().contains(AttachFlags::SECLABEL));
}

#[test]
fn auxgroups_record_lists_translated_gids() {
    let clock = FixedClock::new(111, 222);
    let mut process = FakeProcess::with_uid(1000);
    process.auxgroups = vec![10, 20, 30];
    let mut meta = Metadata::new(&process);
    meta.append(AttachFlags::AUXGROUPS, &clock, &process, None, 0)
        .expect("collected");

    let item = ItemIter::new(meta.buffer())
        .next()
        .expect("one record")
        .expect("valid");
    let payload = item.payload();
    assert_eq!(payload.len(), 24);
    let gids: Vec<u64> = payload
        .chunks_exact(8)
        .map(|chunk| u64::from_le_bytes(chunk.try_into().expect("gid field")))
        .collect();
    assert_eq!(gids, vec![10, 20, 30]);
}

#[test]
fn namespace_pinning_gates_comparability() {
    let process_a = FakeProcess::with_uid(1000);
    let mut process_b = FakeProcess::with_uid(1000);
    process_b.user_ns = 2;

    let meta_a = Metadata::new(&process_a);
    let meta_b = Metadata::new(&process_b);
    let meta_c = Metadata::new(&process_a);

    assert!(!meta_a.ns_eq(&meta_b));
    assert!(meta_a.ns_eq(&meta_c));
}

#[test]
fn cmdline_capture_is_bounded_to_one_page() {
    let clock = FixedClock::new(111, 222);
    let mut process = FakeProcess::with_uid(1000);
    process.cmdline = Some(vec![b'a'; 8192]);
    let mut meta = Metadata::new(&process);
    meta.append(AttachFlags::CMDLINE, &clock, &process, None, 0)
        .expect("collected");

    let item = ItemIter::new(meta.buffer())
        .next()
        .expect("one record")
        .expect("valid");
    assert_eq!(item.payload().len(), 4096);
}
