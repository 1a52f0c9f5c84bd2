//! Multi-reader byte ring buffer for no-std embedded targets.
//!
//! # Highlights
//! - One producer, any number of independently positioned readers over caller-owned storage.
//! - Designed to decouple an interrupt- or DMA-fed byte stream (UART, I2C) from its consumers.
//! - `add` never loses buffered data; `force_add` trades completeness for freshness and
//!   accounts for every skipped byte per reader.
//! - Readers can lock their unread bytes against forced overwrites.
//! - Protocol parsers run directly over buffered bytes without copying them out.
//!
//! # Quick start
//! ```
//! use ph_bytering::{ByteRing, Error};
//!
//! let mut storage = [0u8; 8];
//! let ring = ByteRing::new(&mut storage).unwrap();
//!
//! ring.add(b"ABCDEFG").unwrap();
//! assert_eq!(ring.add(b"X"), Err(Error::NoSpace { len: 1, free: 0 }));
//! assert_eq!(ring.stat_add_loss(), 1);
//!
//! let mut buf = [0u8; 3];
//! assert_eq!(ring.read(&mut buf), 3);
//! assert_eq!(&buf, b"ABC");
//! ```
//!
//! # Read handles
//! ```
//! use ph_bytering::ByteRing;
//!
//! let mut storage = [0u8; 64];
//! let ring = ByteRing::with_read_handles(&mut storage, 2).unwrap();
//! ring.set_read_requires_handle(true);
//!
//! let parser = ring.take_read_handle().unwrap();
//! let raw = ring.take_read_handle().unwrap();
//! ring.add(b"hello").unwrap();
//!
//! let mut buf = [0u8; 2];
//! assert_eq!(ring.read_handle(parser, &mut buf), Ok(2));
//! assert_eq!(ring.data_size_handle(parser), Ok(3));
//! assert_eq!(ring.data_size_handle(raw), Ok(5));
//! ```
//!
//! # No-std
//! The crate is `#![no_std]` and needs `alloc` only for the read handle table.
//! Tests require `std`.
//!
//! # Locking
//! All state sits behind a [`critical-section`](https://github.com/rust-embedded/critical-section)
//! mutex. You must link a `critical-section` implementation suitable for the target,
//! e.g. `cortex-m` with `critical-section-single-core`, or `critical-section/std` on a host.
//! Construction and drop are not synchronized and must happen before/after shared use.
//!
//! `critical-section` is one process-wide lock, not one per ring. On single-core targets
//! every ring call masks interrupts while it runs, so keep `run_parsers` scans short.
//!
//! # Logging
//! With the `defmt` feature, rejected writes, forced overwrites and handle
//! changes are logged through `defmt`.
#![no_std]

extern crate alloc;

pub mod byte_ring;
pub mod error;
pub mod parse;
mod trace_macro;

pub use byte_ring::{ByteRing, MAX_READ_HANDLES, ReadHandle, RingStats};
pub use error::Error;
pub use parse::{ParseCursor, ParseOutcome, ParseStatus, Parser};

#[cfg(test)]
extern crate std;
