//! Multi-reader byte ring over caller-owned storage.
//!
//! # Overview
//! - One producer (`add`/`force_add`), any number of independently positioned readers.
//! - The normal reader is always present; further readers register as read handles.
//! - One byte of storage stays unused to tell "full" from "empty", so a ring over
//!   `N` bytes holds at most `N - 1`.
//! - `add` never overwrites unread data. It fails if any active reader lacks room.
//! - `force_add` skips unlocked readers forward as needed and charges the skipped
//!   bytes to their read-loss counter. Locked handles are never skipped; a forced
//!   add that would need to fails instead.
//! - A newly taken read handle sees only data written after it was taken.
//!
//! # Locking
//! Every method runs inside `critical_section::with`, so one producer and any
//! number of consumers may share a `&ByteRing` across threads or interrupts.
//! Handle locks are short-lived by contract: while every reader is locked,
//! `force_add` cannot make room.
//!
//! # Notes
//! - The normal reader is inactive while `read_requires_handle` is set. It then
//!   reads nothing and does not hold back the producer.
//! - Loss counters are cumulative and saturate. `flush`/`reset` leave them alone.

use alloc::boxed::Box;
use alloc::vec::Vec;
use core::cell::RefCell;

use critical_section::Mutex;

use crate::error::Error;
use crate::parse::{self, ParseOutcome, Parser};
use crate::trace_macro::{ring_debug, ring_trace, ring_warn};

/// Upper bound for `max_readers`: one lock bit per handle.
pub const MAX_READ_HANDLES: usize = u64::BITS as usize;

/// Identifies a registered reader of one [`ByteRing`].
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct ReadHandle(u8);

impl ReadHandle {
    /// Handle id, `1..=max_readers`.
    #[inline]
    pub const fn id(self) -> u8 {
        self.0
    }

    #[inline]
    const fn index(self) -> usize {
        self.0 as usize - 1
    }

    #[inline]
    const fn bit(self) -> u64 {
        1 << self.index()
    }
}

/// Snapshot of the ring's diagnostic counters, taken under one lock.
#[must_use]
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct RingStats {
    /// Bytes rejected by `add`/`force_add`.
    pub add_loss: usize,
    /// Bytes skipped from under the normal reader by `force_add`.
    pub read_loss: usize,
    /// Unread bytes of the most-behind active reader.
    pub data_size_max: usize,
    /// What `add` would accept right now.
    pub available: usize,
}

#[derive(Default)]
struct Reader {
    cursor: usize,
    read_loss: usize,
}

impl Reader {
    /// Moves the cursor past `skipped` unread bytes and records them as lost.
    fn skip(&mut self, skipped: usize, size: usize) {
        self.cursor = (self.cursor + skipped) % size;
        self.read_loss = self.read_loss.saturating_add(skipped);
    }
}

#[derive(Default)]
struct Slot {
    reader: Reader,
    taken: bool,
}

enum Handles {
    /// Created with [`ByteRing::new`]: only the normal reader exists.
    None,
    /// Created with [`ByteRing::with_read_handles`].
    Slots {
        slots: Box<[Slot]>,
        locked: u64,
        requires_handle: bool,
    },
}

#[derive(Copy, Clone)]
enum Which {
    Normal,
    Handle(ReadHandle),
}

struct State<'a> {
    buf: &'a mut [u8],
    write: usize,
    normal: Reader,
    handles: Handles,
    add_loss: usize,
}

impl State<'_> {
    #[inline]
    fn size(&self) -> usize {
        self.buf.len()
    }

    #[inline]
    fn unread(&self, cursor: usize) -> usize {
        (self.write + self.size() - cursor) % self.size()
    }

    #[inline]
    fn normal_active(&self) -> bool {
        !matches!(
            self.handles,
            Handles::Slots {
                requires_handle: true,
                ..
            }
        )
    }

    #[inline]
    fn locked(&self) -> u64 {
        match self.handles {
            Handles::Slots { locked, .. } => locked,
            Handles::None => 0,
        }
    }

    fn slots(&self) -> &[Slot] {
        match &self.handles {
            Handles::Slots { slots, .. } => slots,
            Handles::None => &[],
        }
    }

    fn slots_mut(&mut self) -> &mut [Slot] {
        match &mut self.handles {
            Handles::Slots { slots, .. } => slots,
            Handles::None => &mut [],
        }
    }

    fn reader(&self, which: Which) -> Result<&Reader, Error> {
        match which {
            Which::Normal => Ok(&self.normal),
            Which::Handle(handle) => self
                .slots()
                .get(handle.index())
                .filter(|slot| slot.taken)
                .map(|slot| &slot.reader)
                .ok_or(Error::InvalidHandle),
        }
    }

    fn reader_mut(&mut self, which: Which) -> Result<&mut Reader, Error> {
        match which {
            Which::Normal => Ok(&mut self.normal),
            Which::Handle(handle) => self
                .slots_mut()
                .get_mut(handle.index())
                .filter(|slot| slot.taken)
                .map(|slot| &mut slot.reader)
                .ok_or(Error::InvalidHandle),
        }
    }

    /// Unread byte counts of all active readers, paired with their lock state.
    fn active(&self) -> impl Iterator<Item = (usize, bool)> + '_ {
        let locked = self.locked();
        let normal = self
            .normal_active()
            .then(|| (self.unread(self.normal.cursor), false));
        let handles = self
            .slots()
            .iter()
            .enumerate()
            .filter(|(_, slot)| slot.taken)
            .map(move |(i, slot)| (self.unread(slot.reader.cursor), locked & (1 << i) != 0));
        normal.into_iter().chain(handles)
    }

    fn data_size_max(&self) -> usize {
        self.active().map(|(unread, _)| unread).max().unwrap_or(0)
    }

    fn available_size(&self) -> usize {
        self.size() - 1 - self.data_size_max()
    }

    fn available_size_max(&self) -> usize {
        let held = self
            .active()
            .filter(|&(_, locked)| locked)
            .map(|(unread, _)| unread)
            .max()
            .unwrap_or(0);
        self.size() - 1 - held
    }

    /// The unread bytes of `cursor` as two contiguous parts.
    fn region(&self, cursor: usize) -> (&[u8], &[u8]) {
        let len = self.unread(cursor);
        let first = len.min(self.size() - cursor);
        (&self.buf[cursor..cursor + first], &self.buf[..len - first])
    }

    fn copy_out(&self, cursor: usize, offset: usize, out: &mut [u8]) {
        let from = (cursor + offset) % self.size();
        let first = out.len().min(self.size() - from);
        let (head, tail) = out.split_at_mut(first);
        head.copy_from_slice(&self.buf[from..from + first]);
        tail.copy_from_slice(&self.buf[..tail.len()]);
    }

    fn copy_in(&mut self, data: &[u8]) {
        let write = self.write;
        let first = data.len().min(self.size() - write);
        let (head, tail) = data.split_at(first);
        self.buf[write..write + first].copy_from_slice(head);
        self.buf[..tail.len()].copy_from_slice(tail);
        self.write = (write + data.len()) % self.size();
    }

    fn reject(&mut self, len: usize) {
        self.add_loss = self.add_loss.saturating_add(len);
    }

    fn add(&mut self, data: &[u8], force: bool) -> Result<(), Error> {
        let len = data.len();
        let capacity = self.size() - 1;
        if len > capacity {
            self.reject(len);
            ring_warn!("add of {} bytes exceeds capacity {}", len, capacity);
            return Err(Error::TooLarge { len, capacity });
        }

        let free = if force {
            self.available_size_max()
        } else {
            self.available_size()
        };
        if len > free {
            self.reject(len);
            ring_debug!("add of {} bytes rejected, {} free", len, free);
            return Err(Error::NoSpace { len, free });
        }

        if force {
            self.skip_unlocked(len);
        }
        self.copy_in(data);
        Ok(())
    }

    /// Skips every unlocked reader that would be overrun by `len` more bytes.
    fn skip_unlocked(&mut self, len: usize) {
        let size = self.size();
        let write = self.write;
        let overrun = |reader: &Reader| {
            let unread = (write + size - reader.cursor) % size;
            (unread + len).saturating_sub(size - 1)
        };

        if self.normal_active() {
            let skipped = overrun(&self.normal);
            if skipped > 0 {
                ring_debug!("forced add skipped {} bytes of normal reader", skipped);
                self.normal.skip(skipped, size);
            }
        }

        if let Handles::Slots { slots, locked, .. } = &mut self.handles {
            for (i, slot) in slots.iter_mut().enumerate() {
                if !slot.taken || *locked & (1 << i) != 0 {
                    continue;
                }
                let skipped = overrun(&slot.reader);
                if skipped > 0 {
                    ring_debug!("forced add skipped {} bytes of handle {}", skipped, i + 1);
                    slot.reader.skip(skipped, size);
                }
            }
        }
    }

    /// Copies into `out` (or skips, without `out`) up to `max` bytes and advances.
    fn consume(&mut self, which: Which, out: Option<&mut [u8]>, max: usize) -> Result<usize, Error> {
        let cursor = self.reader(which)?.cursor;
        let n = self.unread(cursor).min(max);
        if let Some(out) = out {
            self.copy_out(cursor, 0, &mut out[..n]);
        }
        let size = self.size();
        self.reader_mut(which)?.cursor = (cursor + n) % size;
        Ok(n)
    }

    fn peek(&self, which: Which, out: &mut [u8], offset: usize) -> Result<usize, Error> {
        let cursor = self.reader(which)?.cursor;
        let n = self.unread(cursor).saturating_sub(offset).min(out.len());
        if n > 0 {
            self.copy_out(cursor, offset, &mut out[..n]);
        }
        Ok(n)
    }

    fn data_size(&self, which: Which) -> Result<usize, Error> {
        let cursor = self.reader(which)?.cursor;
        Ok(self.unread(cursor))
    }

    fn flush(&mut self, which: Which) -> Result<(), Error> {
        let write = self.write;
        self.reader_mut(which)?.cursor = write;
        Ok(())
    }

    fn set_locked(&mut self, handle: ReadHandle, on: bool) -> Result<(), Error> {
        self.reader(Which::Handle(handle))?;
        if let Handles::Slots { locked, .. } = &mut self.handles {
            if on {
                *locked |= handle.bit();
            } else {
                *locked &= !handle.bit();
            }
        }
        Ok(())
    }
}

/// Byte ring buffer with one producer and any number of readers.
///
/// The storage is borrowed for the ring's lifetime and handed back by
/// [`release`](Self::release); the ring never frees it. Dropping the ring frees
/// only the read handle table. Construction and drop must not race with use.
pub struct ByteRing<'a> {
    capacity: usize,
    state: Mutex<RefCell<State<'a>>>,
}

impl<'a> ByteRing<'a> {
    /// Ring with only the normal reader. Holds up to `storage.len() - 1` bytes.
    pub fn new(storage: &'a mut [u8]) -> Result<Self, Error> {
        Self::build(storage, Handles::None)
    }

    /// Ring with the normal reader plus up to `max_readers` read handles.
    ///
    /// # Errors
    /// - [`Error::EmptyStorage`] if `storage` is empty.
    /// - [`Error::InvalidReaderCount`] unless `1 <= max_readers <= MAX_READ_HANDLES`.
    /// - [`Error::NoMemory`] if the handle table cannot be allocated.
    pub fn with_read_handles(storage: &'a mut [u8], max_readers: usize) -> Result<Self, Error> {
        if storage.is_empty() {
            return Err(Error::EmptyStorage);
        }
        if max_readers == 0 || max_readers > MAX_READ_HANDLES {
            return Err(Error::InvalidReaderCount(max_readers));
        }

        let mut slots = Vec::new();
        slots
            .try_reserve_exact(max_readers)
            .map_err(|_| Error::NoMemory)?;
        slots.resize_with(max_readers, Slot::default);

        Self::build(
            storage,
            Handles::Slots {
                slots: slots.into_boxed_slice(),
                locked: 0,
                requires_handle: false,
            },
        )
    }

    fn build(storage: &'a mut [u8], handles: Handles) -> Result<Self, Error> {
        if storage.is_empty() {
            return Err(Error::EmptyStorage);
        }
        Ok(Self {
            capacity: storage.len() - 1,
            state: Mutex::new(RefCell::new(State {
                buf: storage,
                write: 0,
                normal: Reader::default(),
                handles,
                add_loss: 0,
            })),
        })
    }

    /// Consumes the ring and returns the storage it was built over.
    pub fn release(self) -> &'a mut [u8] {
        self.state.into_inner().into_inner().buf
    }

    #[inline]
    fn with<R>(&self, f: impl FnOnce(&mut State<'a>) -> R) -> R {
        critical_section::with(|cs| f(&mut self.state.borrow_ref_mut(cs)))
    }

    /// Most bytes the ring can hold.
    #[inline]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Appends `data` if every active reader has room for it; otherwise writes
    /// nothing and charges `data.len()` to the add-loss counter.
    pub fn add(&self, data: &[u8]) -> Result<(), Error> {
        self.with(|s| s.add(data, false))
    }

    /// Appends `data`, skipping unlocked readers forward to make room.
    ///
    /// Fails, writing nothing and charging the add-loss counter, if `data` is
    /// larger than [`capacity`](Self::capacity) or a locked handle lacks room.
    pub fn force_add(&self, data: &[u8]) -> Result<(), Error> {
        self.with(|s| s.add(data, true))
    }

    /// Reads into `out` from the normal reader. Returns the byte count, `0`
    /// while `read_requires_handle` is set.
    pub fn read(&self, out: &mut [u8]) -> usize {
        let max = out.len();
        self.with(|s| {
            if !s.normal_active() {
                return 0;
            }
            s.consume(Which::Normal, Some(out), max).unwrap_or(0)
        })
    }

    /// Skips up to `len` bytes of the normal reader without copying them.
    pub fn discard(&self, len: usize) -> usize {
        self.with(|s| {
            if !s.normal_active() {
                return 0;
            }
            s.consume(Which::Normal, None, len).unwrap_or(0)
        })
    }

    /// Copies normal-reader bytes starting `offset` past its cursor, without advancing.
    pub fn peek(&self, out: &mut [u8], offset: usize) -> usize {
        self.with(|s| {
            if !s.normal_active() {
                return 0;
            }
            s.peek(Which::Normal, out, offset).unwrap_or(0)
        })
    }

    /// Unread bytes of the normal reader.
    pub fn data_size(&self) -> usize {
        self.with(|s| {
            if !s.normal_active() {
                return 0;
            }
            s.data_size(Which::Normal).unwrap_or(0)
        })
    }

    /// Drops everything the normal reader has not read yet.
    pub fn flush(&self) {
        self.with(|s| {
            let write = s.write;
            s.normal.cursor = write;
        })
    }

    pub fn read_handle(&self, handle: ReadHandle, out: &mut [u8]) -> Result<usize, Error> {
        let max = out.len();
        self.with(|s| s.consume(Which::Handle(handle), Some(out), max))
    }

    pub fn discard_handle(&self, handle: ReadHandle, len: usize) -> Result<usize, Error> {
        self.with(|s| s.consume(Which::Handle(handle), None, len))
    }

    /// Copies bytes starting `offset` past the handle's cursor, without advancing.
    ///
    /// Returns `0` if `offset` is at or beyond the handle's unread data.
    pub fn peek_handle(&self, handle: ReadHandle, out: &mut [u8], offset: usize) -> Result<usize, Error> {
        self.with(|s| s.peek(Which::Handle(handle), out, offset))
    }

    pub fn data_size_handle(&self, handle: ReadHandle) -> Result<usize, Error> {
        self.with(|s| s.data_size(Which::Handle(handle)))
    }

    /// Drops everything `handle` has not read yet. Other readers are untouched.
    pub fn flush_handle(&self, handle: ReadHandle) -> Result<(), Error> {
        self.with(|s| s.flush(Which::Handle(handle)))
    }

    /// Unread bytes of the most-behind active reader.
    pub fn data_size_max(&self) -> usize {
        self.with(|s| s.data_size_max())
    }

    /// What [`add`](Self::add) would accept right now.
    pub fn available_size(&self) -> usize {
        self.with(|s| s.available_size())
    }

    /// What [`force_add`](Self::force_add) would accept right now.
    pub fn available_size_max(&self) -> usize {
        self.with(|s| s.available_size_max())
    }

    /// Registers a new reader positioned at the current write position.
    ///
    /// # Errors
    /// [`Error::HandlesUnsupported`] on a ring built with [`new`](Self::new),
    /// [`Error::NoFreeHandle`] when every slot is taken.
    pub fn take_read_handle(&self) -> Result<ReadHandle, Error> {
        self.with(|s| {
            let write = s.write;
            let Handles::Slots { slots, .. } = &mut s.handles else {
                return Err(Error::HandlesUnsupported);
            };
            let (index, slot) = slots
                .iter_mut()
                .enumerate()
                .find(|(_, slot)| !slot.taken)
                .ok_or(Error::NoFreeHandle)?;
            slot.taken = true;
            slot.reader = Reader {
                cursor: write,
                read_loss: 0,
            };

            // index < MAX_READ_HANDLES
            let handle = ReadHandle(index as u8 + 1);
            ring_trace!("read handle {} taken", handle.id());
            Ok(handle)
        })
    }

    /// Unregisters `handle`. Its read-loss counter stays queryable until the
    /// slot is taken again.
    ///
    /// # Errors
    /// [`Error::HandleLocked`] if the handle is still locked.
    pub fn give_read_handle(&self, handle: ReadHandle) -> Result<(), Error> {
        self.with(|s| {
            s.reader(Which::Handle(handle))?;
            if s.locked() & handle.bit() != 0 {
                ring_warn!("read handle {} given back while locked", handle.id());
                return Err(Error::HandleLocked);
            }
            s.slots_mut()[handle.index()].taken = false;
            ring_trace!("read handle {} given", handle.id());
            Ok(())
        })
    }

    /// Protects the handle's unread bytes from [`force_add`](Self::force_add)
    /// and returns how many there are.
    ///
    /// Keep locks short: a fully locked ring rejects forced adds.
    pub fn lock_read_handle(&self, handle: ReadHandle) -> Result<usize, Error> {
        self.with(|s| {
            s.set_locked(handle, true)?;
            ring_trace!("read handle {} locked", handle.id());
            s.data_size(Which::Handle(handle))
        })
    }

    pub fn unlock_read_handle(&self, handle: ReadHandle) -> Result<(), Error> {
        self.with(|s| {
            s.set_locked(handle, false)?;
            ring_trace!("read handle {} unlocked", handle.id());
            Ok(())
        })
    }

    pub fn read_handle_is_locked(&self, handle: ReadHandle) -> Result<bool, Error> {
        self.with(|s| {
            s.reader(Which::Handle(handle))?;
            Ok(s.locked() & handle.bit() != 0)
        })
    }

    /// Disables (`true`) or re-enables the normal reader. No-op on rings
    /// without read handles.
    ///
    /// A re-enabled normal reader starts at the current write position.
    pub fn set_read_requires_handle(&self, on: bool) {
        self.with(|s| {
            let write = s.write;
            if let Handles::Slots {
                requires_handle, ..
            } = &mut s.handles
            {
                if *requires_handle && !on {
                    s.normal.cursor = write;
                }
                *requires_handle = on;
            }
        })
    }

    pub fn read_requires_handle(&self) -> bool {
        self.with(|s| !s.normal_active())
    }

    /// Empties the ring for every reader. Loss counters and locks are kept.
    pub fn reset(&self) {
        self.with(|s| {
            s.write = 0;
            s.normal.cursor = 0;
            for slot in s.slots_mut() {
                slot.reader.cursor = 0;
            }
        })
    }

    /// Bytes rejected by `add`/`force_add` since creation.
    pub fn stat_add_loss(&self) -> usize {
        self.with(|s| s.add_loss)
    }

    /// Bytes skipped from under the normal reader by `force_add` since creation.
    pub fn stat_read_loss(&self) -> usize {
        self.with(|s| s.normal.read_loss)
    }

    /// Bytes skipped from under `handle` by `force_add`.
    ///
    /// A handle that has been given back still answers with its final count
    /// until its slot is taken again; a newly taken handle starts at zero.
    pub fn stat_read_loss_handle(&self, handle: ReadHandle) -> Result<usize, Error> {
        self.with(|s| {
            s.slots()
                .get(handle.index())
                .map(|slot| slot.reader.read_loss)
                .ok_or(Error::InvalidHandle)
        })
    }

    pub fn stats(&self) -> RingStats {
        self.with(|s| RingStats {
            add_loss: s.add_loss,
            read_loss: s.normal.read_loss,
            data_size_max: s.data_size_max(),
            available: s.available_size(),
        })
    }

    /// Runs `parsers` over the handle's unread bytes without copying them.
    ///
    /// Unrecognized leading bytes and a found token are consumed from the
    /// handle; see [`parse`](crate::parse) for the scan rules. The ring stays
    /// locked for the whole scan, so parsers must be quick and must not touch
    /// this ring.
    ///
    /// The lock is the process-wide `critical-section`, not one per ring. On
    /// single-core targets it masks interrupts for the whole scan, which also
    /// holds off the producer's ISR and every other ring.
    pub fn run_parsers<U: ?Sized>(
        &self,
        handle: ReadHandle,
        parsers: &mut [&mut dyn Parser<U>],
        user: &mut U,
    ) -> Result<ParseOutcome, Error> {
        if parsers.is_empty() {
            return Err(Error::NoParsers);
        }
        self.with(|s| {
            let cursor = s.reader(Which::Handle(handle))?.cursor;
            let (head, tail) = s.region(cursor);
            let outcome = parse::scan(head, tail, parsers, user);
            if outcome.discarded() > 0 {
                ring_debug!(
                    "parsers discarded {} bytes on handle {}",
                    outcome.discarded(),
                    handle.id()
                );
            }

            let size = s.size();
            s.reader_mut(Which::Handle(handle))?.cursor = (cursor + outcome.consumed()) % size;
            Ok(outcome)
        })
    }
}
