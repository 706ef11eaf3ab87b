// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Random borrow/return walks that check the pool accounting after every step.

use std::collections::HashSet;

use pagepool::testing::{FakeMemoryManager, TestSegment};
use pagepool::{MemoryManager, Owner, Pool};

const STEPS: usize = 2_000;

fn check_invariants(pool: &Pool<&FakeMemoryManager>, manager: &FakeMemoryManager, held: &[TestSegment]) {
    assert!(pool.used_pages() <= pool.max_pages());
    assert_eq!(pool.free_pages() + pool.used_pages(), pool.max_pages());
    assert_eq!(pool.used_pages(), held.len());
    assert_eq!(manager.outstanding_pages(), held.len() + pool.cached_pages());

    let ids: HashSet<u64> = held.iter().map(TestSegment::id).collect();
    assert_eq!(ids.len(), held.len(), "a page is borrowed twice");
}

fn random_walk(seed: u64, max_pages: usize, batch_pages: usize) {
    let mut rng = fastrand::Rng::with_seed(seed);
    let manager = FakeMemoryManager::new();
    let mut pool = Pool::builder(Owner::new(seed), &manager, max_pages)
        .batch_bytes(batch_pages * manager.page_size().get())
        .build();
    let mut held: Vec<TestSegment> = Vec::new();

    for _ in 0..STEPS {
        match rng.u8(0..5) {
            0 => {
                let was_full = pool.free_pages() == 0;
                match pool.next_segment().expect("no contract violation") {
                    Some(segment) => held.push(segment),
                    None => assert!(was_full),
                }
            }
            1 => {
                let required = rng.usize(0..=max_pages + 2);
                let free_before = pool.free_pages();
                let used_before = pool.used_pages();
                match pool.allocate_segments(required).expect("no contract violation") {
                    Some(segments) => {
                        assert_eq!(segments.len(), required);
                        held.extend(segments);
                    }
                    None => {
                        assert!(required > free_before);
                        assert_eq!(pool.used_pages(), used_before);
                    }
                }
            }
            2 if !held.is_empty() => {
                let count = rng.usize(1..=held.len());
                let returned = held.split_off(held.len() - count);
                pool.return_all(returned).expect("all pages were borrowed");
            }
            3 if !held.is_empty() => {
                let index = rng.usize(0..held.len());
                pool.return_page(held.swap_remove(index)).expect("page was borrowed");
            }
            4 => pool.clean_cache(),
            _ => {}
        }

        check_invariants(&pool, &manager, &held);
    }

    pool.return_all(held).expect("all pages were borrowed");
    pool.close().expect("nothing is borrowed");
    assert_eq!(manager.outstanding_pages(), 0);
}

#[test]
fn small_pool_large_batches() {
    random_walk(1, 4, 16);
}

#[test]
fn large_pool_small_batches() {
    random_walk(2, 64, 3);
}

#[test]
fn single_page_pool() {
    random_walk(3, 1, 1);
}

#[test]
fn many_seeds() {
    for seed in 10..30 {
        random_walk(seed, 1 + usize::try_from(seed % 17).expect("small number"), 1 + usize::try_from(seed % 5).expect("small number"));
    }
}
