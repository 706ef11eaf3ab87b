// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

/// Opaque identity that a [`Pool`][crate::Pool] attaches to every page request it makes.
///
/// The pool never interprets the owner; it only forwards it to the
/// [`MemoryManager`][crate::MemoryManager], which may use it to attribute allocations to the
/// component that made them.
///
/// ```
/// use pagepool::Owner;
///
/// let first = Owner::unique();
/// let second = Owner::unique();
/// assert_ne!(first, second);
///
/// assert_eq!(Owner::new(42).id(), 42);
/// ```
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Owner(u64);

impl Owner {
    /// Creates an owner tag from a caller-chosen identifier.
    #[must_use]
    pub const fn new(id: u64) -> Self {
        Self(id)
    }

    /// Creates an owner tag that is distinct from every other tag created by this function
    /// in the current process.
    ///
    /// Tags created via [`new()`][Self::new] are not tracked, so a caller mixing both may still
    /// produce collisions.
    #[must_use]
    pub fn unique() -> Self {
        Self(NEXT_UNIQUE_ID.fetch_add(1, Ordering::Relaxed))
    }

    /// Returns the raw identifier.
    #[must_use]
    pub const fn id(self) -> u64 {
        self.0
    }
}

impl fmt::Display for Owner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "owner#{}", self.0)
    }
}

// Starts halfway up the range so that generated ids stay clear of small hand-picked ones.
static NEXT_UNIQUE_ID: AtomicU64 = AtomicU64::new(u64::MAX / 2);
