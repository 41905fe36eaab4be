//! Splitting and merging segments.
//!
//! [`Cursor::split`] replaces the current segment with a sequence of
//! segments that together cover the same range.  It writes as little as it
//! can: a piece that ends where the old segment ended keeps the old key and
//! is written with an update, other pieces are inserted, and the old key is
//! deleted only if no piece reused it.

use emap_storage::Transaction;
use metrics::counter;
use tracing::debug;

use crate::{
    checksum,
    cursor::Cursor,
    error::{Boundary, EmapError},
    extent::Extent,
    format::Segment,
    map::Pack,
    metrics::{MERGES, SPLITS},
};

/// One replacement segment for [`Cursor::split`].
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct SplitPiece<'c> {
    /// Length in bytes.  Pieces of length 0 are skipped.
    pub len: u64,
    pub value: u64,
    pub checksum: &'c [u8],
    pub unit_size: u64,
}

impl<'c> SplitPiece<'c> {
    /// A piece without checksums.
    pub const fn new(len: u64, value: u64) -> Self {
        Self {
            len,
            value,
            checksum: &[],
            unit_size: 0,
        }
    }

    /// Attaches checksums for `unit_size`-byte data units.
    pub const fn with_checksum(mut self, checksum: &'c [u8], unit_size: u64) -> Self {
        self.checksum = checksum;
        self.unit_size = unit_size;
        self
    }
}

/// Copies `bytes` into a new buffer.
pub(crate) fn copy_checksum(bytes: &[u8]) -> Result<Vec<u8>, EmapError> {
    let mut buffer = Vec::new();
    buffer
        .try_reserve_exact(bytes.len())
        .map_err(|_| EmapError::ResourceExhaustion(bytes.len()))?;
    buffer.extend_from_slice(bytes);
    Ok(buffer)
}

/// Checks that `checksum` is a plausible checksum buffer for `ext`: empty,
/// or one equal-sized checksum for each `unit_size`-byte unit starting in
/// `ext`, and no larger than the map allows.
pub(crate) fn check_checksum(
    cursor: &Cursor<'_>,
    ext: &Extent,
    checksum: &[u8],
    unit_size: u64,
) -> Result<(), EmapError> {
    if checksum.is_empty() {
        return Ok(());
    }
    let limit = cursor.map.config().max_checksum_bytes();
    if checksum.len() as u64 > limit {
        return Err(EmapError::invalid(format!(
            "{} checksum bytes for {ext} exceed the limit of {limit}",
            checksum.len()
        )));
    }
    match checksum::checksum_size(ext.start, ext.len(), unit_size, checksum.len() as u64) {
        Some(_) => Ok(()),
        None => Err(EmapError::invalid(format!(
            "{} checksum bytes do not fit the units of size {unit_size} in {ext}",
            checksum.len()
        ))),
    }
}

impl Cursor<'_> {
    /// Replaces the current segment with `pieces`, laid out from the
    /// segment's start.  The lengths must add up to the segment's length.
    ///
    /// Afterwards the cursor sits on the last non-empty piece.
    pub fn split(
        &mut self,
        tx: &mut Transaction,
        pieces: &[SplitPiece<'_>],
    ) -> Result<(), EmapError> {
        let ext = self.seg.ext;
        let total = pieces
            .iter()
            .try_fold(0u64, |sum, piece| sum.checked_add(piece.len));
        if total != Some(ext.len()) {
            return Err(EmapError::invalid(format!(
                "split pieces cover {total:?} bytes of {ext}"
            )));
        }
        let mut start = ext.start;
        for piece in pieces.iter().filter(|piece| piece.len > 0) {
            let piece_ext = Extent::new(start, start + piece.len);
            check_checksum(self, &piece_ext, piece.checksum, piece.unit_size)?;
            start = piece_ext.end;
        }

        counter!(SPLITS).increment(1);
        {
            let _guard = self.map.write_lock();
            self.refresh()?;
            self.split_at(tx, ext.start, pieces)?;
        }
        self.map.verify_if_enabled(self.prefix)
    }

    /// Writes `pieces` contiguously from `anchor` in place of the current
    /// segment, then re-positions on the last piece written, or on whatever
    /// follows the old segment if none was.  The caller holds the write
    /// lock.
    pub(crate) fn split_at(
        &mut self,
        tx: &mut Transaction,
        anchor: u64,
        pieces: &[SplitPiece<'_>],
    ) -> Result<(), EmapError> {
        let seg_end = self.seg.ext.end;
        let mut scan = anchor;
        let mut last_end = None;
        for piece in pieces.iter().filter(|piece| piece.len > 0) {
            let end = scan.checked_add(piece.len).ok_or_else(|| {
                EmapError::invalid(format!("piece at {scan:#x} runs past the address space"))
            })?;
            let seg = Segment {
                prefix: self.prefix,
                ext: Extent::new(scan, end),
                value: piece.value,
                checksum: copy_checksum(piece.checksum)?,
                unit_size: piece.unit_size,
            };
            // The key is the end offset, so a piece ending where the old
            // segment ended takes over its record.
            let pack = if end == seg_end {
                Pack::Update
            } else {
                Pack::Insert
            };
            self.map.write_segment(tx, &seg, pack)?;
            self.seg = seg;
            last_end = Some(end);
            scan = end;
        }

        if last_end != Some(seg_end) {
            self.map.delete_segment(tx, self.prefix, seg_end)?;
        }
        self.resync(last_end.unwrap_or(seg_end))
    }

    /// Gives the last `delta` bytes of the current segment to the next one.
    ///
    /// The current segment shrinks by `delta`, or disappears if `delta` is
    /// its whole length, and the next segment's start moves down by `delta`.
    /// The next segment keeps its value, so merging every segment from
    /// offset 0 leaves the value of the object's last segment.  The next
    /// segment drops its checksums when it grows, since none exist for the
    /// bytes it takes over.  Afterwards the cursor sits on the next segment.
    pub fn merge(&mut self, tx: &mut Transaction, delta: u64) -> Result<(), EmapError> {
        let ext = self.seg.ext;
        if ext.is_last() {
            return Err(EmapError::AtBoundary(Boundary::End));
        }
        if delta > ext.len() {
            return Err(EmapError::invalid(format!(
                "cannot merge {delta:#x} bytes of {ext}"
            )));
        }

        counter!(MERGES).increment(1);
        {
            let _guard = self.map.write_lock();
            self.refresh()?;
            self.merge_locked(tx, delta)?;
        }
        self.map.verify_if_enabled(self.prefix)
    }

    fn merge_locked(&mut self, tx: &mut Transaction, delta: u64) -> Result<(), EmapError> {
        let ext = self.seg.ext;
        self.map.delete_segment(tx, self.prefix, ext.end)?;

        let shrunk = delta < ext.len();
        if shrunk {
            let mut seg = self.seg.clone();
            seg.ext.end -= delta;
            if !seg.checksum.is_empty() {
                let unit = checksum_unit(&self.seg)?;
                let len =
                    checksum::checksum_len(seg.ext.start, seg.ext.len(), seg.unit_size, unit)
                        .unwrap_or(0) as usize;
                seg.checksum.truncate(len);
            }
            self.map.write_segment(tx, &seg, Pack::Insert)?;
            self.resync(seg.ext.end)?;
            self.step_next()?;
        } else {
            self.resync(ext.end)?;
        }

        debug!("merge: {delta:#x} bytes of {ext} into {}", self.seg.ext);
        let mut next = self.seg.clone();
        next.ext.start -= delta;
        if delta > 0 {
            next.checksum.clear();
            next.unit_size = 0;
        }
        self.map.write_segment(tx, &next, Pack::Update)?;
        self.resync(next.ext.end)
    }
}

/// Size of the checksum of one data unit in `seg`, which must carry
/// checksums.
pub(crate) fn checksum_unit(seg: &Segment) -> Result<u64, EmapError> {
    let units = checksum::units_spanned(seg.ext.start, seg.ext.len(), seg.unit_size)
        .ok_or_else(|| EmapError::corrupt(format!("{seg} has checksums but no unit size")))?;
    match (seg.checksum.len() as u64).checked_div(units) {
        Some(size) if size > 0 => Ok(size),
        _ => Err(EmapError::corrupt(format!(
            "{seg} has checksums but spans {units} unit(s)"
        ))),
    }
}
