// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use std::fmt;
use std::mem;
use std::num::NonZero;

use nm::{Event, Magnitude};
use tracing::{Level, event};

use crate::{Error, ErrorKind, MemoryManager, Owner, PoolBuilder, Result};

/// A bounded pool of fixed-size pages that lazily draws its memory from a [`MemoryManager`].
///
/// The pool lets its owner borrow up to `max_pages` pages at a time. Pages are requested from
/// the memory manager in batches the first time they are needed, and pages returned to the pool
/// are cached for reuse instead of going back to the manager. The cache is only handed back to
/// the manager by [`clean_cache()`][Self::clean_cache], [`close()`][Self::close] or when the
/// pool is dropped.
///
/// # Running out of capacity
///
/// When the pool has no free capacity left, [`next_segment()`][Self::next_segment] and
/// [`allocate_segments()`][Self::allocate_segments] return `Ok(None)`. This is an expected
/// outcome and the caller should back off until it has returned some pages. Errors are reserved
/// for violations of the pool's accounting contract, see [`ErrorKind`].
///
/// # Thread safety
///
/// A pool has a single owner. All mutating operations take `&mut self` and the pool performs no
/// locking of its own.
///
/// # Example
///
/// ```
/// # #[cfg(feature = "test-util")]
/// # fn main() -> pagepool::Result<()> {
/// use pagepool::testing::FakeMemoryManager;
/// use pagepool::{Owner, Pool};
///
/// let manager = FakeMemoryManager::with_page_size(4096);
/// let mut pool = Pool::new(Owner::unique(), &manager, 8);
///
/// let segments = pool.allocate_segments(3)?.expect("pool has room for three pages");
/// assert_eq!(pool.free_pages(), 5);
///
/// pool.return_all(segments)?;
/// pool.close()?;
/// # Ok(())
/// # }
/// # #[cfg(not(feature = "test-util"))]
/// # fn main() {}
/// ```
pub struct Pool<M: MemoryManager> {
    owner: Owner,
    memory_manager: M,
    max_pages: usize,
    per_request_pages: usize,
    page_usage: usize,

    // LIFO. Nothing in here is counted in `page_usage`.
    cache: Vec<M::Segment>,
}

impl<M: MemoryManager> Pool<M> {
    /// Creates a pool that lets `owner` borrow at most `max_pages` pages from `memory_manager`
    /// at any one time, using the default batch size.
    ///
    /// Use [`builder()`][Self::builder] to customize the batch size.
    #[must_use]
    pub fn new(owner: Owner, memory_manager: M, max_pages: usize) -> Self {
        Self::builder(owner, memory_manager, max_pages).build()
    }

    /// Starts configuring a pool that lets `owner` borrow at most `max_pages` pages from
    /// `memory_manager` at any one time.
    pub fn builder(owner: Owner, memory_manager: M, max_pages: usize) -> PoolBuilder<M> {
        PoolBuilder::new(owner, memory_manager, max_pages)
    }

    pub(crate) fn from_parts(owner: Owner, memory_manager: M, max_pages: usize, per_request_pages: usize) -> Self {
        Self {
            owner,
            memory_manager,
            max_pages,
            per_request_pages,
            page_usage: 0,
            cache: Vec::new(),
        }
    }

    /// The owner tag forwarded to the memory manager with every allocation request.
    #[must_use]
    pub fn owner(&self) -> Owner {
        self.owner
    }

    /// The memory manager the pool draws its pages from.
    #[must_use]
    pub fn memory_manager(&self) -> &M {
        &self.memory_manager
    }

    /// Size in bytes of each page in the pool.
    #[cfg_attr(test, mutants::skip)] // Trivial forwarder.
    #[must_use]
    pub fn page_size(&self) -> NonZero<usize> {
        self.memory_manager.page_size()
    }

    /// The most pages that can be borrowed from the pool at the same time.
    #[must_use]
    pub fn max_pages(&self) -> usize {
        self.max_pages
    }

    /// Number of pages currently borrowed from the pool.
    #[must_use]
    pub fn used_pages(&self) -> usize {
        self.page_usage
    }

    /// Number of pages that can still be borrowed before the pool runs out of capacity.
    #[must_use]
    pub fn free_pages(&self) -> usize {
        self.max_pages - self.page_usage
    }

    /// Number of pages held in the cache, ready to be borrowed without contacting the
    /// memory manager.
    #[must_use]
    pub fn cached_pages(&self) -> usize {
        self.cache.len()
    }

    /// Number of pages requested from the memory manager whenever the cache runs dry,
    /// before limiting the request to the free capacity of the pool.
    #[must_use]
    pub fn per_request_pages(&self) -> usize {
        self.per_request_pages
    }

    /// Borrows one page from the pool.
    ///
    /// Returns `Ok(None)` if all `max_pages` pages are already borrowed. Otherwise, the most
    /// recently cached page is handed out. If the cache is empty, a batch of pages is first
    /// requested from the memory manager.
    ///
    /// # Errors
    ///
    /// Returns [`ErrorKind::AllocationFailure`] if the memory manager cannot provide the whole
    /// batch, including when it reports success but delivers fewer pages than requested. Any
    /// pages it did deliver are released back to it and the pool does not retry the request.
    pub fn next_segment(&mut self) -> Result<Option<M::Segment>> {
        let free_pages = self.free_pages();
        if free_pages == 0 {
            CAPACITY_EXHAUSTED.with(|e| e.observe(1));
            event!(Level::TRACE, message = "pool capacity exhausted", owner = %self.owner, max_pages = self.max_pages);
            return Ok(None);
        }

        let segment = match self.cache.pop() {
            Some(segment) => segment,
            None => self.refill(free_pages.min(self.per_request_pages))?,
        };

        self.page_usage += 1;
        Ok(Some(segment))
    }

    /// Borrows exactly `required` pages from the pool as one unit.
    ///
    /// Returns `Ok(None)` without borrowing anything if fewer than `required` pages are free.
    ///
    /// # Errors
    ///
    /// Returns [`ErrorKind::AllocationFailure`] if the memory manager cannot provide pages that
    /// the pool believed to be available. Any pages borrowed by this call before the failure are
    /// returned to the pool first, so [`used_pages()`][Self::used_pages] is left as it was before
    /// the call.
    pub fn allocate_segments(&mut self, required: usize) -> Result<Option<Vec<M::Segment>>> {
        if self.free_pages() < required {
            CAPACITY_EXHAUSTED.with(|e| e.observe(1));
            event!(
                Level::TRACE,
                message = "not enough free pages",
                owner = %self.owner,
                required,
                free_pages = self.free_pages(),
            );
            return Ok(None);
        }

        let mut segments = Vec::with_capacity(required.min(MAX_PREALLOCATED_PAGES));
        while segments.len() < required {
            let error = match self.next_segment() {
                Ok(Some(segment)) => {
                    segments.push(segment);
                    continue;
                }
                Ok(None) => Error::caused_by(
                    ErrorKind::AllocationFailure,
                    format!("pool ran out of capacity after {} of {required} certified pages", segments.len()),
                ),
                Err(error) => error,
            };

            // Everything borrowed by this call so far is still counted in `page_usage`,
            // so handing it back cannot over-return.
            self.return_all(segments)?;
            return Err(error);
        }

        Ok(Some(segments))
    }

    /// Returns borrowed pages to the pool, making them available for reuse.
    ///
    /// The pages are cached rather than handed back to the memory manager.
    ///
    /// # Errors
    ///
    /// Returns [`ErrorKind::OverReturn`] if more pages are returned than are currently borrowed.
    /// The pool state is left unchanged and every segment passed in is dropped, including any
    /// that were genuinely borrowed from this pool. Those pages stay counted in
    /// [`used_pages()`][Self::used_pages] and are never released to the memory manager, so a
    /// later [`close()`][Self::close] fails with [`ErrorKind::LeakOnClose`].
    pub fn return_all(&mut self, segments: Vec<M::Segment>) -> Result<()> {
        let Some(page_usage) = self.page_usage.checked_sub(segments.len()) else {
            event!(
                Level::ERROR,
                message = "more pages returned than borrowed",
                owner = %self.owner,
                returned = segments.len(),
                borrowed = self.page_usage,
            );
            return Err(Error::caused_by(
                ErrorKind::OverReturn,
                format!("returned {} pages but only {} were borrowed", segments.len(), self.page_usage),
            ));
        };

        event!(Level::TRACE, message = "pages returned", owner = %self.owner, count = segments.len());

        self.page_usage = page_usage;
        self.cache.extend(segments);
        Ok(())
    }

    /// Returns a single borrowed page to the pool.
    ///
    /// # Errors
    ///
    /// Returns [`ErrorKind::OverReturn`] if no pages are currently borrowed. The segment is
    /// dropped in that case.
    pub fn return_page(&mut self, segment: M::Segment) -> Result<()> {
        self.return_all(vec![segment])
    }

    /// Hands every cached page back to the memory manager.
    ///
    /// Borrowed pages are not affected and may still be returned to the pool afterwards.
    pub fn clean_cache(&mut self) {
        if self.cache.is_empty() {
            return;
        }

        let segments = mem::take(&mut self.cache);

        RELEASED_PAGES.with(|e| e.observe(segments.len()));
        event!(Level::DEBUG, message = "releasing cached pages", owner = %self.owner, count = segments.len());

        self.memory_manager.release(segments);
    }

    /// Closes the pool, handing every cached page back to the memory manager.
    ///
    /// # Errors
    ///
    /// Returns [`ErrorKind::LeakOnClose`] if any pages are still borrowed. The pool is consumed
    /// either way and its cached pages are released to the memory manager when it is dropped.
    pub fn close(mut self) -> Result<()> {
        if self.page_usage != 0 {
            // Reported here, so the drop that follows must not report it again.
            let borrowed = mem::take(&mut self.page_usage);

            event!(
                Level::ERROR,
                message = "pool closed with borrowed pages",
                owner = %self.owner,
                borrowed,
            );
            return Err(Error::caused_by(
                ErrorKind::LeakOnClose,
                format!("{borrowed} pages are still borrowed"),
            ));
        }

        self.clean_cache();
        event!(Level::DEBUG, message = "pool closed", owner = %self.owner);
        Ok(())
    }

    /// Requests a batch of `count` pages, hands out one of them and caches the rest.
    ///
    /// The batch is all or nothing: whatever the manager delivered is released again if it
    /// fails or comes up short.
    fn refill(&mut self, count: usize) -> Result<M::Segment> {
        BATCH_PAGES.with(|e| e.observe(count));
        event!(Level::DEBUG, message = "requesting pages", owner = %self.owner, count);

        let mut batch = Vec::with_capacity(count.min(MAX_PREALLOCATED_PAGES));
        if let Err(cause) = self.memory_manager.allocate_pages(self.owner, &mut batch, count) {
            event!(
                Level::ERROR,
                message = "memory manager failed to allocate pages",
                owner = %self.owner,
                count,
                error = %cause,
            );

            self.release_batch(batch);
            return Err(Error::caused_by(ErrorKind::AllocationFailure, cause));
        }

        let delivered = batch.len();
        match batch.pop() {
            Some(segment) if delivered >= count => {
                self.cache.append(&mut batch);
                Ok(segment)
            }
            last => {
                event!(
                    Level::ERROR,
                    message = "memory manager delivered fewer pages than requested",
                    owner = %self.owner,
                    count,
                    delivered,
                );

                batch.extend(last);
                self.release_batch(batch);
                Err(Error::caused_by(
                    ErrorKind::AllocationFailure,
                    format!("memory manager reported success but delivered {delivered} of {count} pages"),
                ))
            }
        }
    }

    fn release_batch(&self, batch: Vec<M::Segment>) {
        if !batch.is_empty() {
            self.memory_manager.release(batch);
        }
    }
}

impl<M: MemoryManager> Drop for Pool<M> {
    fn drop(&mut self) {
        if self.page_usage != 0 {
            event!(
                Level::WARN,
                message = "pool dropped with borrowed pages",
                owner = %self.owner,
                borrowed = self.page_usage,
            );
        }

        self.clean_cache();
    }
}

impl<M: MemoryManager> fmt::Debug for Pool<M> {
    #[cfg_attr(test, mutants::skip)] // No API contract to test.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Pool")
            .field("owner", &self.owner)
            .field("max_pages", &self.max_pages)
            .field("per_request_pages", &self.per_request_pages)
            .field("page_usage", &self.page_usage)
            .field("cached_pages", &self.cache.len())
            .finish_non_exhaustive()
    }
}

// Upper bound on up-front `Vec` capacity; larger requests grow as pages arrive.
const MAX_PREALLOCATED_PAGES: usize = 1024;

const BATCH_PAGES_BUCKETS: &[Magnitude] = &[1, 4, 16, 64, 256, 1024];

thread_local! {
    static BATCH_PAGES: Event = Event::builder()
        .name("pagepool_batch_pages")
        .histogram(BATCH_PAGES_BUCKETS)
        .build();

    static RELEASED_PAGES: Event = Event::builder()
        .name("pagepool_released_pages")
        .histogram(BATCH_PAGES_BUCKETS)
        .build();

    static CAPACITY_EXHAUSTED: Event = Event::builder()
        .name("pagepool_capacity_exhausted")
        .build();
}
