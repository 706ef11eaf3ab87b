// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Error types for pool operations.

use std::fmt;

use recoverable::{Recovery, RecoveryInfo};

/// A contract violation detected by a [`Pool`][crate::Pool].
///
/// Running out of capacity is not an error: borrowing operations report it by returning
/// `Ok(None)`. An `Error` always means that the pool, its caller or its memory manager broke
/// the accounting contract, so the operation is never worth retrying. Use [`kind()`][Self::kind]
/// to find out what went wrong.
///
/// # Example
///
/// ```
/// use pagepool::{Error, ErrorKind};
///
/// fn blame(error: &Error) -> &'static str {
///     match error.kind() {
///         ErrorKind::OverReturn | ErrorKind::LeakOnClose => "caller",
///         _ => "memory manager",
///     }
/// }
/// ```
#[ohno::error]
#[display("{kind}")]
pub struct Error {
    kind: ErrorKind,
}

impl Error {
    /// Returns the kind of contract violation this error represents.
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        self.kind
    }
}

impl Recovery for Error {
    #[cfg_attr(test, mutants::skip)] // Constant classification.
    fn recovery(&self) -> RecoveryInfo {
        RecoveryInfo::never()
    }
}

/// Classifies the contract violations reported through [`Error`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[non_exhaustive]
pub enum ErrorKind {
    /// The memory manager could not deliver pages that the pool had already certified as
    /// available. Indicates an accounting mismatch between the pool and its manager.
    AllocationFailure,

    /// More segments were returned than are currently borrowed from the pool.
    OverReturn,

    /// The pool was closed while some of its pages were still borrowed.
    LeakOnClose,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::AllocationFailure => f.write_str("memory manager failed to allocate pages within the pool capacity"),
            Self::OverReturn => f.write_str("more segments returned than were borrowed from the pool"),
            Self::LeakOnClose => f.write_str("pool closed while pages were still borrowed"),
        }
    }
}

/// A specialized [`Result`] type for pool operations.
pub type Result<T> = std::result::Result<T, Error>;
