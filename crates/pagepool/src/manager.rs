// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use std::num::NonZero;
use std::sync::Arc;

use crate::Owner;

/// The upstream source of fixed-size memory pages that a [`Pool`][crate::Pool] draws from.
///
/// A memory manager is typically shared by many pools, so all operations take `&self` and any
/// bookkeeping must use interior mutability. A pool holds the manager by value; pass a reference
/// or an [`Arc`] to share one manager between several pools.
///
/// # Segments
///
/// [`Segment`][Self::Segment] is the manager's handle to one page of memory. The pool never
/// inspects segments; it only moves them between its cache, its caller and the manager. A
/// segment is owned by exactly one party at a time.
pub trait MemoryManager {
    /// One page of memory handed out by this manager.
    type Segment;

    /// The reason an allocation request could not be satisfied.
    type Error: std::error::Error + Send + Sync + 'static;

    /// Returns the size in bytes of every page handed out by this manager.
    ///
    /// The value must not change over the lifetime of the manager.
    fn page_size(&self) -> NonZero<usize>;

    /// Allocates `count` pages on behalf of `owner` and appends them to `target`.
    ///
    /// # Errors
    ///
    /// Returns an error if fewer than `count` pages are available. An implementation should leave
    /// `target` unchanged on failure; the pool releases anything it finds there regardless.
    fn allocate_pages(&self, owner: Owner, target: &mut Vec<Self::Segment>, count: usize) -> Result<(), Self::Error>;

    /// Takes back a batch of pages.
    ///
    /// Releasing always succeeds from the point of view of the caller. Any failure to reclaim the
    /// memory is the manager's own concern.
    fn release(&self, segments: Vec<Self::Segment>);
}

impl<M: MemoryManager + ?Sized> MemoryManager for &M {
    type Segment = M::Segment;
    type Error = M::Error;

    #[inline]
    fn page_size(&self) -> NonZero<usize> {
        (*self).page_size()
    }

    #[inline]
    fn allocate_pages(&self, owner: Owner, target: &mut Vec<Self::Segment>, count: usize) -> Result<(), Self::Error> {
        (*self).allocate_pages(owner, target, count)
    }

    #[inline]
    fn release(&self, segments: Vec<Self::Segment>) {
        (*self).release(segments);
    }
}

impl<M: MemoryManager + ?Sized> MemoryManager for Arc<M> {
    type Segment = M::Segment;
    type Error = M::Error;

    #[inline]
    fn page_size(&self) -> NonZero<usize> {
        self.as_ref().page_size()
    }

    #[inline]
    fn allocate_pages(&self, owner: Owner, target: &mut Vec<Self::Segment>, count: usize) -> Result<(), Self::Error> {
        self.as_ref().allocate_pages(owner, target, count)
    }

    #[inline]
    fn release(&self, segments: Vec<Self::Segment>) {
        self.as_ref().release(segments);
    }
}
