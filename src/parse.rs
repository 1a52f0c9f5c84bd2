//! Protocol scanning directly over buffered bytes.
//!
//! [`ByteRing::run_parsers`](crate::ByteRing::run_parsers) hands each [`Parser`] a
//! [`ParseCursor`] over a read handle's unread bytes. The cursor only exists for the
//! duration of one parser call, inside the ring's critical section, so its byte
//! accessors need no locking of their own.
//!
//! # Scan rules
//! - Parsers are tried in list order, each from the same start position.
//! - The first parser returning [`ParseStatus::Found`] wins; the token length is the
//!   number of bytes it pulled with [`ParseCursor::next_byte`].
//! - If none found a token but one asked for more data, the scan stops there.
//! - If every parser returned [`ParseStatus::NotFound`], the first byte is discarded
//!   and the scan repeats one byte further on.

/// Verdict of a single parser call.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ParseStatus {
    /// The data may be a token but is incomplete; retry once more bytes arrive.
    NeedMore,
    /// The data is not a token this parser recognizes.
    NotFound,
    /// A complete token ends at the cursor position.
    Found,
}

/// Result of [`ByteRing::run_parsers`](crate::ByteRing::run_parsers).
///
/// Discarded bytes and a found token have both been consumed from the read handle.
#[must_use]
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ParseOutcome {
    /// Parser at index `parser` recognized a token of `length` bytes after
    /// `discarded` unrecognized bytes.
    Found {
        parser: usize,
        discarded: usize,
        length: usize,
    },
    /// No complete token is buffered yet.
    NeedMore { discarded: usize },
}

impl ParseOutcome {
    /// Unrecognized bytes skipped ahead of the token (or ahead of the incomplete data).
    #[inline]
    pub fn discarded(&self) -> usize {
        match *self {
            ParseOutcome::Found { discarded, .. } | ParseOutcome::NeedMore { discarded } => {
                discarded
            }
        }
    }

    /// Total bytes the read handle advanced by.
    #[inline]
    pub(crate) fn consumed(&self) -> usize {
        match *self {
            ParseOutcome::Found {
                discarded, length, ..
            } => discarded + length,
            ParseOutcome::NeedMore { discarded } => discarded,
        }
    }
}

/// Stateful token recognizer run by [`ByteRing::run_parsers`](crate::ByteRing::run_parsers).
///
/// `user` is shared by every parser in one run, e.g. to collect decoded tokens.
/// Closures and functions with the matching signature implement this trait.
///
/// A parser must not call back into the ring it is running on; the ring is
/// borrowed for the duration of the scan and doing so panics.
pub trait Parser<U: ?Sized> {
    fn parse(&mut self, cursor: &mut ParseCursor<'_>, user: &mut U) -> ParseStatus;
}

impl<U: ?Sized, F> Parser<U> for F
where
    F: FnMut(&mut ParseCursor<'_>, &mut U) -> ParseStatus,
{
    #[inline]
    fn parse(&mut self, cursor: &mut ParseCursor<'_>, user: &mut U) -> ParseStatus {
        self(cursor, user)
    }
}

/// Read-only view of the unread bytes handed to a [`Parser`].
///
/// The bytes may wrap around the end of the ring storage; `head` and `tail`
/// are the two contiguous parts in order.
pub struct ParseCursor<'a> {
    head: &'a [u8],
    tail: &'a [u8],
    pos: usize,
    discarded: usize,
}

impl<'a> ParseCursor<'a> {
    #[inline]
    fn new(head: &'a [u8], tail: &'a [u8], discarded: usize) -> Self {
        Self {
            head,
            tail,
            pos: 0,
            discarded,
        }
    }

    /// Next unexamined byte, or `None` when the buffered data is exhausted.
    #[inline]
    pub fn next_byte(&mut self) -> Option<u8> {
        let byte = self.peek_byte()?;
        self.pos += 1;
        Some(byte)
    }

    /// Next unexamined byte without moving past it.
    #[inline]
    pub fn peek_byte(&self) -> Option<u8> {
        match self.head.get(self.pos) {
            Some(&byte) => Some(byte),
            None => self.tail.get(self.pos - self.head.len()).copied(),
        }
    }

    /// Bytes not yet pulled with [`next_byte`](Self::next_byte).
    #[inline]
    pub fn available(&self) -> usize {
        self.head.len() + self.tail.len() - self.pos
    }

    /// Bytes pulled so far in this call; the token length on [`ParseStatus::Found`].
    #[inline]
    pub fn position(&self) -> usize {
        self.pos
    }

    /// Unrecognized bytes skipped by this scan before the current start position.
    #[inline]
    pub fn discarded(&self) -> usize {
        self.discarded
    }
}

/// Runs the scan rules over `head` followed by `tail`.
pub(crate) fn scan<'a, U: ?Sized>(
    mut head: &'a [u8],
    mut tail: &'a [u8],
    parsers: &mut [&mut dyn Parser<U>],
    user: &mut U,
) -> ParseOutcome {
    if head.is_empty() {
        head = core::mem::take(&mut tail);
    }

    let mut discarded = 0usize;
    while !head.is_empty() {
        let mut need_more = false;

        for (index, parser) in parsers.iter_mut().enumerate() {
            let mut cursor = ParseCursor::new(head, tail, discarded);
            match parser.parse(&mut cursor, &mut *user) {
                // A zero-length token would never move the reader forward.
                ParseStatus::Found if cursor.pos > 0 => {
                    return ParseOutcome::Found {
                        parser: index,
                        discarded,
                        length: cursor.pos,
                    };
                }
                ParseStatus::NeedMore => need_more = true,
                _ => {}
            }
        }

        if need_more {
            break;
        }

        head = &head[1..];
        if head.is_empty() {
            head = core::mem::take(&mut tail);
        }
        discarded += 1;
    }

    ParseOutcome::NeedMore { discarded }
}
