//! Overlaying a new extent onto an object.
//!
//! [`Cursor::paste`] maps a whole extent to a new value.  It walks the
//! segments the extent overlaps, starting from the cursor's, and splits each
//! of them into what remains of it on the left, the new extent, and what
//! remains on the right.  Each old segment is handled by one
//! [`split_at`](Cursor::split_at) call:
//!
//! ```text
//!   before:  |  a  |      b      |   c   |
//!   paste:        [=====new=====)
//!   after:   | a'|      new      |  c'   |
//! ```
//!
//! The new extent's record is written only by the call for the last
//! segment it overlaps, with its full length.  Every earlier call only trims
//! or deletes the old segment.  A segment is stored under its end offset, so
//! writing the new record any earlier could put it under the key of an old
//! segment that has not been trimmed yet.  In between, the object is not
//! fully covered; the enclosing transaction has to commit or abort the paste
//! as a whole.

use emap_storage::Transaction;
use metrics::counter;
use tracing::debug;

use crate::{
    checksum,
    cursor::Cursor,
    error::EmapError,
    extent::Extent,
    format::Segment,
    metrics::PASTES,
    split::{check_checksum, checksum_unit, copy_checksum, SplitPiece},
};

/// The extent, value and checksums that [`Cursor::paste`] writes.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct NewExtent<'c> {
    pub ext: Extent,
    pub value: u64,
    /// One checksum per `unit_size`-byte unit starting in `ext`, or empty.
    pub checksum: &'c [u8],
    pub unit_size: u64,
}

impl<'c> NewExtent<'c> {
    pub const fn new(ext: Extent, value: u64) -> Self {
        Self {
            ext,
            value,
            checksum: &[],
            unit_size: 0,
        }
    }

    pub const fn with_checksum(mut self, checksum: &'c [u8], unit_size: u64) -> Self {
        self.checksum = checksum;
        self.unit_size = unit_size;
        self
    }
}

type DeleteHook<'h> = Box<dyn FnMut(&Segment) + 'h>;
type CutHook<'h> = Box<dyn FnMut(&mut Segment, &Extent, u64) + 'h>;

/// Callbacks that let the caller follow what [`Cursor::paste`] does to the
/// segments it overlaps.
///
/// The cut hooks run when an old segment keeps a remainder on the left or
/// the right of the new extent.  They get a copy of the old segment, the
/// part of it being overwritten, and the old segment's original value, and
/// may change the copy's value: the remainder is written with whatever value
/// the copy has afterwards.  Both cut hooks see the same copy, left first.
/// `on_delete` runs instead when an old segment is overwritten entirely.
#[derive(Default)]
pub struct PasteHooks<'h> {
    on_delete: Option<DeleteHook<'h>>,
    on_cut_left: Option<CutHook<'h>>,
    on_cut_right: Option<CutHook<'h>>,
}

impl<'h> PasteHooks<'h> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on_delete(mut self, hook: impl FnMut(&Segment) + 'h) -> Self {
        self.on_delete = Some(Box::new(hook));
        self
    }

    pub fn on_cut_left(mut self, hook: impl FnMut(&mut Segment, &Extent, u64) + 'h) -> Self {
        self.on_cut_left = Some(Box::new(hook));
        self
    }

    pub fn on_cut_right(mut self, hook: impl FnMut(&mut Segment, &Extent, u64) + 'h) -> Self {
        self.on_cut_right = Some(Box::new(hook));
        self
    }
}

impl Cursor<'_> {
    /// Maps `new.ext` to `new.value`, replacing or trimming every segment it
    /// overlaps.  The current segment must contain `new.ext.start`.
    ///
    /// Afterwards the cursor sits on the segment that ends where the last
    /// overlapped segment ended: the right remainder if there is one, the new
    /// segment otherwise.
    pub fn paste(
        &mut self,
        tx: &mut Transaction,
        new: &NewExtent<'_>,
        hooks: &mut PasteHooks<'_>,
    ) -> Result<(), EmapError> {
        if new.ext.is_empty() {
            return Err(EmapError::invalid(format!("cannot paste empty {}", new.ext)));
        }
        check_checksum(self, &new.ext, new.checksum, new.unit_size)?;

        counter!(PASTES).increment(1);
        {
            let _guard = self.map.write_lock();
            if self.is_stale() {
                self.locate(new.ext.start)?;
            }
            if !self.seg.ext.contains(new.ext.start) {
                return Err(EmapError::invalid(format!(
                    "{} does not start in {}",
                    new.ext, self.seg
                )));
            }
            self.paste_locked(tx, new, hooks)?;
        }
        self.map.verify_if_enabled(self.prefix)
    }

    fn paste_locked(
        &mut self,
        tx: &mut Transaction,
        new: &NewExtent<'_>,
        hooks: &mut PasteHooks<'_>,
    ) -> Result<(), EmapError> {
        let whole = new.ext;
        let mut ext = new.ext;
        while !ext.is_empty() {
            let chunk = self.seg.ext;
            let clip = ext.intersection(&chunk);
            if clip.is_empty() {
                return Err(EmapError::InvariantViolation {
                    prefix: self.prefix,
                    detail: format!("{ext} does not overlap the segment at its start {chunk}"),
                });
            }
            let left = clip.start - chunk.start;
            let middle = if clip.end == ext.end { whole.len() } else { 0 };
            let right = chunk.end - clip.end;
            debug!(
                "paste: ext={ext} chunk={chunk} clip={clip} \
                 len={left:#x}:{middle:#x}:{right:#x}"
            );

            let old_value = self.seg.value;
            let (left_checksum, right_checksum) = self.remainder_checksums(&clip, left, right)?;
            let mut cut = self.seg.clone();
            let mut left_value = old_value;
            let mut right_value = old_value;
            if left > 0 {
                if let Some(hook) = hooks.on_cut_left.as_mut() {
                    hook(&mut cut, &clip, old_value);
                }
                left_value = cut.value;
            }
            if right > 0 {
                if let Some(hook) = hooks.on_cut_right.as_mut() {
                    hook(&mut cut, &clip, old_value);
                }
                right_value = cut.value;
            }
            if left == 0 && right == 0 {
                if let Some(hook) = hooks.on_delete.as_mut() {
                    hook(&self.seg);
                }
            }

            let unit_size = self.seg.unit_size;
            let pieces = [
                SplitPiece::new(left, left_value).with_checksum(&left_checksum, unit_size),
                SplitPiece::new(middle, new.value).with_checksum(new.checksum, new.unit_size),
                SplitPiece::new(right, right_value).with_checksum(&right_checksum, unit_size),
            ];
            let anchor = if left > 0 { chunk.start } else { whole.start };
            self.split_at(tx, anchor, &pieces)?;

            ext.start += clip.len();
            if ext.is_empty() {
                break;
            }
            // With nothing written, the split already moved past the deleted
            // segment.
            if left > 0 || middle > 0 || right > 0 {
                self.step_next()?;
            }
        }
        Ok(())
    }

    /// Copies the parts of the current segment's checksums that belong to
    /// the `left` bytes before `clip` and the `right` bytes after it.
    fn remainder_checksums(
        &self,
        clip: &Extent,
        left: u64,
        right: u64,
    ) -> Result<(Vec<u8>, Vec<u8>), EmapError> {
        let seg = &self.seg;
        if seg.checksum.is_empty() {
            return Ok((Vec::new(), Vec::new()));
        }
        let unit = checksum_unit(seg)?;
        let chunk = seg.ext;
        let corrupt = || EmapError::corrupt(format!("checksums of {seg} do not cover {clip}"));
        let bytes = |start: u64, len: u64| -> Result<usize, EmapError> {
            checksum::checksum_len(start, len, seg.unit_size, unit)
                .and_then(|len| usize::try_from(len).ok())
                .ok_or_else(corrupt)
        };

        let left_len = bytes(chunk.start, left)?;
        // Units that start before the right remainder.
        let skip = bytes(chunk.start, clip.end - chunk.start)?;
        let right_len = bytes(clip.end, right)?;
        let left_checksum = seg.checksum.get(..left_len).ok_or_else(corrupt)?;
        let right_checksum = skip
            .checked_add(right_len)
            .and_then(|end| seg.checksum.get(skip..end))
            .ok_or_else(corrupt)?;
        Ok((copy_checksum(left_checksum)?, copy_checksum(right_checksum)?))
    }
}
