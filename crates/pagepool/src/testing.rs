// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Memory manager test double.
//!
//! This module provides [`FakeMemoryManager`], a deterministic in-process memory manager that
//! records every request it receives and supports failure injection, for testing code that
//! drives a [`Pool`][crate::Pool].

use std::fmt;
use std::num::NonZero;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::{MemoryManager, Owner};

/// Page size used by [`FakeMemoryManager::new()`].
pub const DEFAULT_PAGE_SIZE: usize = 32 * 1024;

/// A page handed out by [`FakeMemoryManager`].
///
/// Test segments carry no memory. Each one has an identifier that is unique within the manager
/// that created it, which lets tests check which page they got back.
#[derive(Debug, PartialEq, Eq, Hash)]
pub struct TestSegment {
    id: u64,
    owner: Owner,
}

impl TestSegment {
    /// Identifier of the page, unique within the manager that allocated it.
    #[must_use]
    pub fn id(&self) -> u64 {
        self.id
    }

    /// The owner tag of the request that allocated this page.
    #[must_use]
    pub fn owner(&self) -> Owner {
        self.owner
    }
}

/// A request received by [`FakeMemoryManager`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ManagerOp {
    /// Pages were requested.
    Allocate {
        /// The owner tag attached to the request.
        owner: Owner,
        /// The number of pages requested.
        count: usize,
    },
    /// Pages were handed back.
    Release {
        /// The number of pages handed back.
        count: usize,
    },
}

/// The error returned by [`FakeMemoryManager`] when it refuses an allocation.
#[ohno::error]
#[display("fake memory manager cannot allocate {requested} pages")]
pub struct FakeAllocationError {
    requested: usize,
}

type FailPredicate = Box<dyn Fn(&ManagerOp) -> bool + Send + Sync>;

/// A deterministic memory manager for tests.
///
/// Clones share state, so a test can keep one handle for inspection while a pool owns another.
///
/// # Examples
///
/// ```
/// use pagepool::testing::{FakeMemoryManager, ManagerOp};
/// use pagepool::{Owner, Pool};
///
/// let manager = FakeMemoryManager::new().page_limit(16);
/// let mut pool = Pool::new(Owner::new(5), manager.clone(), 4);
///
/// let segment = pool.next_segment().unwrap().unwrap();
/// assert_eq!(manager.operations(), vec![ManagerOp::Allocate { owner: Owner::new(5), count: 4 }]);
/// assert_eq!(manager.outstanding_pages(), 4);
/// # pool.return_page(segment).unwrap();
/// ```
///
/// # Failure injection
///
/// ```
/// use pagepool::testing::{FakeMemoryManager, ManagerOp};
/// use pagepool::{ErrorKind, Owner, Pool};
///
/// let manager = FakeMemoryManager::new();
/// manager.fail_when(|op| matches!(op, ManagerOp::Allocate { count, .. } if *count > 2));
///
/// let mut pool = Pool::new(Owner::new(5), &manager, 4);
/// assert_eq!(pool.next_segment().unwrap_err().kind(), ErrorKind::AllocationFailure);
/// ```
pub struct FakeMemoryManager {
    page_size: NonZero<usize>,
    state: Arc<Mutex<State>>,
}

#[derive(Default)]
struct State {
    page_limit: Option<usize>,
    deliver_at_most: Option<usize>,
    outstanding: usize,
    released: usize,
    next_id: u64,
    operations: Vec<ManagerOp>,
    fail_when: Option<FailPredicate>,
}

impl FakeMemoryManager {
    /// Creates a manager with pages of [`DEFAULT_PAGE_SIZE`] bytes and no page limit.
    #[must_use]
    pub fn new() -> Self {
        Self::with_page_size(DEFAULT_PAGE_SIZE)
    }

    /// Creates a manager with pages of `bytes` bytes and no page limit.
    ///
    /// # Panics
    ///
    /// Panics if `bytes` is zero.
    #[must_use]
    pub fn with_page_size(bytes: usize) -> Self {
        Self {
            page_size: NonZero::new(bytes).expect("page size must be non-zero"),
            state: Arc::new(Mutex::new(State::default())),
        }
    }

    /// Limits the number of pages that may be allocated and not yet released at any one time.
    ///
    /// A request that would exceed the limit fails without delivering any pages.
    #[must_use]
    pub fn page_limit(self, pages: usize) -> Self {
        self.state.lock().page_limit = Some(pages);
        self
    }

    /// Makes successful allocation requests deliver at most `pages` pages, no matter how many
    /// were requested. This breaks the manager contract on purpose.
    ///
    /// `None` restores normal behavior.
    pub fn deliver_at_most(&self, pages: Option<usize>) {
        self.state.lock().deliver_at_most = pages;
    }

    /// Sets a predicate that decides which allocation requests fail.
    ///
    /// The predicate is evaluated while the manager's internal lock is held, so it must not call
    /// back into the manager. Release requests are recorded but never fail.
    pub fn fail_when<F>(&self, predicate: F)
    where
        F: Fn(&ManagerOp) -> bool + Send + Sync + 'static,
    {
        self.state.lock().fail_when = Some(Box::new(predicate));
    }

    /// Clears the failure predicate.
    pub fn clear_failures(&self) {
        self.state.lock().fail_when = None;
    }

    /// Returns a copy of every request received so far, in order.
    #[must_use]
    pub fn operations(&self) -> Vec<ManagerOp> {
        self.state.lock().operations.clone()
    }

    /// Forgets all recorded requests.
    pub fn clear_operations(&self) {
        self.state.lock().operations.clear();
    }

    /// Number of allocation requests received so far, including failed ones.
    #[must_use]
    pub fn allocate_calls(&self) -> usize {
        self.state
            .lock()
            .operations
            .iter()
            .filter(|op| matches!(op, ManagerOp::Allocate { .. }))
            .count()
    }

    /// Number of pages allocated and not yet released.
    #[must_use]
    pub fn outstanding_pages(&self) -> usize {
        self.state.lock().outstanding
    }

    /// Total number of pages released so far.
    #[must_use]
    pub fn released_pages(&self) -> usize {
        self.state.lock().released
    }
}

impl MemoryManager for FakeMemoryManager {
    type Segment = TestSegment;
    type Error = FakeAllocationError;

    fn page_size(&self) -> NonZero<usize> {
        self.page_size
    }

    fn allocate_pages(&self, owner: Owner, target: &mut Vec<TestSegment>, count: usize) -> Result<(), FakeAllocationError> {
        let op = ManagerOp::Allocate { owner, count };

        let mut state = self.state.lock();
        let should_fail = state.fail_when.as_ref().is_some_and(|predicate| predicate(&op));
        state.operations.push(op);

        let over_limit = state.page_limit.is_some_and(|limit| state.outstanding + count > limit);
        if should_fail || over_limit {
            return Err(FakeAllocationError::new(count));
        }

        let delivered = state.deliver_at_most.map_or(count, |at_most| at_most.min(count));
        target.extend((state.next_id..).take(delivered).map(|id| TestSegment { id, owner }));

        state.next_id += delivered as u64;
        state.outstanding += delivered;
        Ok(())
    }

    fn release(&self, segments: Vec<TestSegment>) {
        let mut state = self.state.lock();
        state.operations.push(ManagerOp::Release { count: segments.len() });
        state.outstanding = state.outstanding.saturating_sub(segments.len());
        state.released += segments.len();
    }
}

impl Clone for FakeMemoryManager {
    fn clone(&self) -> Self {
        Self {
            page_size: self.page_size,
            state: Arc::clone(&self.state),
        }
    }
}

impl Default for FakeMemoryManager {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for FakeMemoryManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.lock();
        f.debug_struct("FakeMemoryManager")
            .field("page_size", &self.page_size)
            .field("page_limit", &state.page_limit)
            .field("outstanding", &state.outstanding)
            .field("operations", &state.operations)
            .field("fail_when", &state.fail_when.is_some())
            .finish_non_exhaustive()
    }
}
