// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Borrow, return and close scenarios driven through the public API.

use std::collections::HashSet;
use std::sync::Arc;

use pagepool::testing::{FakeMemoryManager, ManagerOp, TestSegment};
use pagepool::{ErrorKind, MemoryManager, Owner, Pool};
use recoverable::{Recovery, RecoveryKind};
use tracing_test::traced_test;

const MIB: usize = 1024 * 1024;

/// Pages of 4 MiB make the default 16 MiB batch exactly four pages.
fn four_page_batch_manager() -> FakeMemoryManager {
    FakeMemoryManager::with_page_size(4 * MIB)
}

#[test]
fn first_borrow_requests_one_batch() {
    let manager = four_page_batch_manager();
    let mut pool = Pool::new(Owner::new(1), &manager, 10);
    assert_eq!(pool.per_request_pages(), 4);

    let segment = pool.next_segment().expect("no contract violation").expect("pool has capacity");

    assert_eq!(segment.owner(), Owner::new(1));
    assert_eq!(pool.used_pages(), 1);
    assert_eq!(pool.cached_pages(), 3);
    assert_eq!(
        manager.operations(),
        vec![ManagerOp::Allocate {
            owner: Owner::new(1),
            count: 4
        }]
    );

    pool.return_page(segment).expect("page was borrowed");
}

#[test]
fn over_return_is_reported_and_not_clamped() {
    let manager = four_page_batch_manager();
    let mut pool = Pool::new(Owner::new(1), &manager, 10);
    let mut other = Pool::new(Owner::new(2), &manager, 10);

    let ours = pool.next_segment().unwrap().unwrap();
    let theirs = other.next_segment().unwrap().unwrap();
    assert_eq!(pool.used_pages(), 1);

    let error = pool.return_all(vec![ours, theirs]).expect_err("two returned, one borrowed");

    assert_eq!(error.kind(), ErrorKind::OverReturn);
    assert_eq!(error.recovery().kind(), RecoveryKind::Never);
    assert_eq!(pool.used_pages(), 1);
    assert_eq!(pool.free_pages(), 9);
}

#[test]
fn insufficient_capacity_leaves_pool_untouched() {
    let manager = four_page_batch_manager();
    let mut pool = Pool::new(Owner::new(1), &manager, 10);
    let held = pool.allocate_segments(7).unwrap().expect("seven of ten pages are free");
    assert_eq!(pool.free_pages(), 3);
    let cached = pool.cached_pages();
    let operations = manager.operations();

    let result = pool.allocate_segments(5).expect("capacity exhaustion is not an error");

    assert!(result.is_none());
    assert_eq!(pool.used_pages(), 7);
    assert_eq!(pool.cached_pages(), cached);
    assert_eq!(manager.operations(), operations);

    pool.return_all(held).unwrap();
}

#[test]
fn full_pool_signals_exhaustion_not_error() {
    let manager = four_page_batch_manager();
    let mut pool = Pool::new(Owner::new(1), &manager, 6);

    let mut held = Vec::new();
    while let Some(segment) = pool.next_segment().expect("no contract violation") {
        held.push(segment);
    }

    assert_eq!(held.len(), 6);
    assert_eq!(pool.used_pages(), pool.max_pages());
    assert!(pool.next_segment().unwrap().is_none());
    assert!(pool.allocate_segments(1).unwrap().is_none());

    pool.return_all(held).unwrap();
    pool.close().unwrap();
}

#[test]
fn allocate_segments_hands_out_distinct_fresh_pages() {
    let manager = FakeMemoryManager::new();
    let mut pool = Pool::builder(Owner::new(1), &manager, 20)
        .batch_bytes(3 * manager.page_size().get())
        .build();

    let first = pool.allocate_segments(5).unwrap().unwrap();
    let second = pool.allocate_segments(8).unwrap().unwrap();

    let first_ids: HashSet<u64> = first.iter().map(TestSegment::id).collect();
    let second_ids: HashSet<u64> = second.iter().map(TestSegment::id).collect();
    assert_eq!(first_ids.len(), 5);
    assert_eq!(second_ids.len(), 8);
    assert!(first_ids.is_disjoint(&second_ids));
    assert_eq!(pool.used_pages(), 13);

    pool.return_all(first).unwrap();
    pool.return_all(second).unwrap();
}

#[test]
fn cached_pages_are_reused_before_asking_manager() {
    let manager = four_page_batch_manager();
    let mut pool = Pool::new(Owner::new(1), &manager, 10);

    let segments = pool.allocate_segments(4).unwrap().unwrap();
    assert_eq!(manager.allocate_calls(), 1);
    let ids: HashSet<u64> = segments.iter().map(TestSegment::id).collect();

    pool.return_all(segments).unwrap();
    let again = pool.allocate_segments(4).unwrap().unwrap();

    assert_eq!(manager.allocate_calls(), 1);
    assert_eq!(again.iter().map(TestSegment::id).collect::<HashSet<_>>(), ids);

    pool.return_all(again).unwrap();
}

#[test]
fn close_releases_every_cached_page_exactly_once() {
    let manager = four_page_batch_manager();
    let mut pool = Pool::new(Owner::new(1), &manager, 10);
    let segments = pool.allocate_segments(9).unwrap().unwrap();
    pool.return_all(segments).unwrap();
    // Batches of 4, 4 and then 2, clipped to the remaining capacity.
    assert_eq!(manager.outstanding_pages(), 10);

    pool.close().expect("nothing is borrowed");

    assert_eq!(manager.outstanding_pages(), 0);
    assert_eq!(manager.released_pages(), 10);
    assert_eq!(manager.operations().last(), Some(&ManagerOp::Release { count: 10 }));
}

#[test]
#[traced_test]
fn close_with_outstanding_pages_is_a_leak() {
    let manager = four_page_batch_manager();
    let mut pool = Pool::new(Owner::new(1), &manager, 10);
    let held = pool.allocate_segments(2).unwrap().unwrap();

    let error = pool.close().expect_err("two pages are still borrowed");

    assert_eq!(error.kind(), ErrorKind::LeakOnClose);
    assert!(logs_contain("pool closed with borrowed pages"));
    assert_eq!(manager.outstanding_pages(), held.len());
}

#[test]
fn pools_can_share_a_manager_through_arc() {
    let manager = Arc::new(FakeMemoryManager::new().page_limit(8));
    let mut left = Pool::builder(Owner::new(1), Arc::clone(&manager), 8).batch_bytes(0).build();
    let mut right = Pool::builder(Owner::new(2), Arc::clone(&manager), 8).batch_bytes(0).build();

    let left_pages = left.allocate_segments(5).unwrap().unwrap();
    let right_pages = right.allocate_segments(3).unwrap().unwrap();

    // The manager is out of pages even though each pool believes it has room.
    let error = right.next_segment().expect_err("manager limit reached");
    assert_eq!(error.kind(), ErrorKind::AllocationFailure);
    assert_eq!(right.used_pages(), 3);

    left.return_all(left_pages).unwrap();
    right.return_all(right_pages).unwrap();
    left.close().unwrap();
    right.close().unwrap();

    assert_eq!(manager.outstanding_pages(), 0);
    assert!(
        manager
            .operations()
            .iter()
            .any(|op| op == &ManagerOp::Allocate { owner: Owner::new(2), count: 1 })
    );
}
