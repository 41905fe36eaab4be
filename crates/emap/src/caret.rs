//! Byte-granular movement over a cursor.

use crate::{cursor::Cursor, error::EmapError, BINDEX_MAX, EXTENT_END};

/// A byte index within the segment a [`Cursor`] sits on.
///
/// The index always lies inside the cursor's current segment, except at the
/// very end of the object where it equals [`EXTENT_END`].
pub struct Caret<'c, 'a> {
    cursor: &'c mut Cursor<'a>,
    index: u64,
}

impl<'c, 'a> Caret<'c, 'a> {
    /// Places a caret at `index`, which must lie in the cursor's segment.
    pub fn new(cursor: &'c mut Cursor<'a>, index: u64) -> Result<Self, EmapError> {
        if index > BINDEX_MAX || !cursor.segment().ext.contains(index) {
            return Err(EmapError::invalid(format!(
                "caret at {index:#x} is outside {}",
                cursor.segment()
            )));
        }
        Ok(Self { cursor, index })
    }

    pub fn index(&self) -> u64 {
        self.index
    }

    pub fn cursor(&self) -> &Cursor<'a> {
        self.cursor
    }

    /// Bytes from the index to the end of the current segment.
    pub fn step(&self) -> u64 {
        self.cursor.segment().ext.end - self.index
    }

    /// Moves forward by `count` bytes, stepping the cursor across segment
    /// boundaries.  Returns true once the index has reached [`EXTENT_END`].
    pub fn move_by(&mut self, mut count: u64) -> Result<bool, EmapError> {
        while count > 0 && self.index < EXTENT_END {
            if self.cursor.is_stale() {
                let _guard = self.cursor.map.read_lock();
                self.cursor.locate(self.index)?;
            }
            let step = self.step();
            if count < step {
                self.index += count;
                break;
            }
            if !self.cursor.segment().ext.is_last() {
                self.cursor.next()?;
            }
            self.index += step;
            count -= step;
        }
        Ok(self.index == EXTENT_END)
    }

    /// Releases the caret, checking that the index is still where it
    /// belongs.
    pub fn finish(self) -> Result<(), EmapError> {
        let ext = self.cursor.segment().ext;
        if self.index == EXTENT_END || ext.contains(self.index) {
            Ok(())
        } else {
            Err(EmapError::InvariantViolation {
                prefix: self.cursor.prefix(),
                detail: format!("caret at {:#x} is outside {ext}", self.index),
            })
        }
    }
}
