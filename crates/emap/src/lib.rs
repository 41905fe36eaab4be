//! Persistent extent map.
//!
//! An extent map ("emap") maps `(prefix, offset)` pairs to 64-bit values.  A
//! prefix is a 128-bit name for an object; each object's address space
//! `[0, EXTENT_END)` is partitioned into contiguous, non-overlapping
//! segments, and every offset in a segment maps to that segment's value.  A
//! segment may also carry checksum bytes for the data it covers.
//!
//! Segments of all objects live in one [`OrderedStore`](emap_storage::OrderedStore).
//! A segment `[A, B)` is stored under the key `(prefix, B)` with `A` inside
//! its record, so the segment containing `X` is the one under the least key
//! not less than `(prefix, X + 1)`.  See [`format`] for the byte layout.
//!
//! The entry point is [`Emap`].  [`Emap::lookup`] returns a [`Cursor`] on the
//! segment containing an offset; cursors step through an object's segments
//! and perform the mutating operations: [`Cursor::paste`] overlays a new
//! extent, [`Cursor::split`] replaces one segment by several, and
//! [`Cursor::merge`] hands part of a segment to its successor.  A [`Caret`]
//! walks the map byte by byte on top of a cursor.
//!
//! One writer and many readers share a map.  Mutations take the map's lock
//! exclusively and bump its version; a cursor that notices a new version on
//! its next step re-locates itself instead of trusting its old position.

use std::fmt::{self, Display};

pub mod caret;
pub mod checksum;
pub mod config;
pub mod credit;
pub mod cursor;
pub mod error;
pub mod extent;
pub mod format;
pub mod map;
pub mod metrics;
pub mod paste;
pub mod split;

mod invariant;

#[cfg(test)]
mod tests;

pub use caret::Caret;
pub use config::{EmapConfig, VerifyMode};
pub use credit::EmapOp;
pub use cursor::Cursor;
pub use error::{Boundary, EmapError};
pub use extent::Extent;
pub use format::Segment;
pub use map::{DumpStats, Emap};
pub use paste::{NewExtent, PasteHooks};
pub use split::SplitPiece;

/// Largest valid byte offset.
pub const BINDEX_MAX: u64 = u64::MAX - 1;

/// End offset of the last segment of every object.
pub const EXTENT_END: u64 = BINDEX_MAX + 1;

/// Values at or above this are not device offsets.
pub const SPECIAL_VALUES: u64 = BINDEX_MAX - (1 << 32);

/// Value of a segment that maps to no data.
pub const HOLE: u64 = SPECIAL_VALUES + 1;

/// Returns true if `value` is one of the reserved non-offset values.
pub fn is_special(value: u64) -> bool {
    value >= SPECIAL_VALUES
}

/// Identifies the object that owns a chain of segments.
///
/// Prefixes order by `hi`, then by `lo`.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Prefix {
    pub hi: u64,
    pub lo: u64,
}

impl Prefix {
    pub const fn new(hi: u64, lo: u64) -> Self {
        Self { hi, lo }
    }
}

impl From<u128> for Prefix {
    fn from(value: u128) -> Self {
        Self {
            hi: (value >> 64) as u64,
            lo: value as u64,
        }
    }
}

impl From<Prefix> for u128 {
    fn from(value: Prefix) -> Self {
        ((value.hi as u128) << 64) | value.lo as u128
    }
}

impl Display for Prefix {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:x}:{:x}", self.hi, self.lo)
    }
}
