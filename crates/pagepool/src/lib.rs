// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

#![cfg_attr(coverage_nightly, feature(coverage_attribute))]
#![cfg_attr(docsrs, feature(doc_cfg))]

//! Bounded pools of fixed-size memory pages.
//!
//! A [`Pool`] lets a memory-bounded component, such as an operator that buffers rows, borrow
//! and return memory one page at a time without contacting the shared memory manager on every
//! request, while never holding more than its assigned number of pages.
//!
//! The pool draws pages lazily from a [`MemoryManager`] in batches of roughly
//! [`DEFAULT_BATCH_BYTES`] and caches pages returned to it for reuse. Cached pages go back to
//! the memory manager when the pool is cleaned, closed or dropped.
//!
//! # Borrowing and returning
//!
//! * [`Pool::next_segment()`] borrows one page.
//! * [`Pool::allocate_segments()`] borrows a fixed number of pages as one unit, or none at all.
//! * [`Pool::return_page()`] and [`Pool::return_all()`] give pages back to the pool.
//! * [`Pool::close()`] hands the cache back to the memory manager after checking that nothing
//!   is still borrowed.
//!
//! # Capacity exhaustion versus errors
//!
//! The two borrowing methods return `Ok(None)` when the pool does not have enough free capacity.
//! That is normal back-pressure and the caller is expected to wait for pages to be returned.
//!
//! An [`Error`] is only returned for violations of the pool's accounting contract: returning
//! more pages than were borrowed, closing a pool that still has pages out, or a memory manager
//! that cannot deliver pages the pool is entitled to. None of these are worth retrying.
//!
//! # Implementing a memory manager
//!
//! ```
//! use std::num::NonZero;
//!
//! use pagepool::{MemoryManager, Owner, Pool};
//!
//! #[derive(Debug)]
//! struct HeapPages;
//!
//! impl MemoryManager for HeapPages {
//!     type Segment = Box<[u8]>;
//!     type Error = std::convert::Infallible;
//!
//!     fn page_size(&self) -> NonZero<usize> {
//!         NonZero::new(4096).unwrap()
//!     }
//!
//!     fn allocate_pages(&self, _owner: Owner, target: &mut Vec<Box<[u8]>>, count: usize) -> Result<(), Self::Error> {
//!         target.extend((0..count).map(|_| vec![0; 4096].into_boxed_slice()));
//!         Ok(())
//!     }
//!
//!     fn release(&self, _segments: Vec<Box<[u8]>>) {}
//! }
//!
//! let mut pool = Pool::builder(Owner::unique(), HeapPages, 64)
//!     .batch_bytes(16 * 4096)
//!     .build();
//!
//! let mut page = pool.next_segment()?.expect("pool has free pages");
//! page[0] = 42;
//! pool.return_page(page)?;
//! pool.close()?;
//! # Ok::<(), pagepool::Error>(())
//! ```

mod builder;
mod error;
mod manager;
mod owner;
mod pool;

#[cfg(any(test, feature = "test-util"))]
#[cfg_attr(docsrs, doc(cfg(feature = "test-util")))]
pub mod testing;

pub use builder::{DEFAULT_BATCH_BYTES, PoolBuilder};
pub use error::{Error, ErrorKind, Result};
pub use manager::MemoryManager;
pub use owner::Owner;
pub use pool::Pool;
