// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use crate::{MemoryManager, Owner, Pool};

/// Default number of bytes a pool asks its memory manager for in one request.
pub const DEFAULT_BATCH_BYTES: usize = 16 * 1024 * 1024;

/// Configures and creates a [`Pool`].
///
/// Created via [`Pool::builder()`].
#[derive(Debug)]
#[must_use]
pub struct PoolBuilder<M> {
    owner: Owner,
    memory_manager: M,
    max_pages: usize,
    batch_bytes: usize,
}

impl<M: MemoryManager> PoolBuilder<M> {
    pub(crate) fn new(owner: Owner, memory_manager: M, max_pages: usize) -> Self {
        Self {
            owner,
            memory_manager,
            max_pages,
            batch_bytes: DEFAULT_BATCH_BYTES,
        }
    }

    /// Sets how many bytes of pages the pool requests from the memory manager when its cache
    /// runs dry.
    ///
    /// The resulting batch is always at least one page, even if `bytes` is smaller than the
    /// page size, and is further limited by the free capacity of the pool at the time of the
    /// request.
    ///
    /// Defaults to [`DEFAULT_BATCH_BYTES`].
    pub fn batch_bytes(mut self, bytes: usize) -> Self {
        self.batch_bytes = bytes;
        self
    }

    /// Creates the pool.
    ///
    /// No pages are requested from the memory manager until the first borrow.
    #[must_use]
    pub fn build(self) -> Pool<M> {
        let per_request_pages = (self.batch_bytes / self.memory_manager.page_size()).max(1);

        Pool::from_parts(self.owner, self.memory_manager, self.max_pages, per_request_pages)
    }
}
