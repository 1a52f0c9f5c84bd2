//! Errors reported by ring operations.

use displaydoc::Display;
use thiserror::Error;

/// Error returned by [`ByteRing`](crate::ByteRing) operations.
///
/// Rejected writes are also charged to the add-loss counter, so callers that
/// only care about loss accounting can ignore the error value.
#[derive(Display, Error, Debug, Copy, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Error {
    /// Storage must hold at least one byte.
    EmptyStorage,
    /// Invalid reader count {0}, must be between 1 and 64.
    InvalidReaderCount(usize),
    /// Read handle is not registered with this ring.
    InvalidHandle,
    /// Ring was created without read handle support.
    HandlesUnsupported,
    /// All read handle slots are taken.
    NoFreeHandle,
    /// Read handle is locked.
    HandleLocked,
    /// Allocation of the read handle table failed.
    NoMemory,
    /// Write of {len} bytes exceeds ring capacity of {capacity} bytes.
    TooLarge { len: usize, capacity: usize },
    /// Write of {len} bytes rejected, {free} bytes free.
    NoSpace { len: usize, free: usize },
    /// Parser list is empty.
    NoParsers,
}
