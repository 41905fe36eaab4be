//! Cursors over one object's segments.
//!
//! A [`Cursor`] sits on one segment of one object.  It keeps a decoded copy
//! of that segment and the store cursor it was read through, and remembers
//! the map version it last synchronized with.  When a step finds that the
//! map's version has moved on, the cursor re-locates by offset instead of
//! stepping from a position that another writer may have invalidated.

use emap_storage::{error::StorageError, StoreCursor, Transaction};
use metrics::counter;
use tracing::debug;

use crate::{
    error::{Boundary, EmapError},
    format::Segment,
    invariant::check_chain,
    map::{Emap, Pack},
    metrics::STALE_CURSORS,
    Prefix,
};

/// A position on one segment of an object in an [`Emap`].
///
/// Obtained from [`Emap::lookup`].  Mutating operations live in
/// [`split`](crate::split) and [`paste`](crate::paste).
pub struct Cursor<'a> {
    pub(crate) map: &'a Emap,
    pub(crate) prefix: Prefix,
    pub(crate) seg: Segment,
    pub(crate) version: u64,
    inner: StoreCursor<'a>,
}

impl<'a> Cursor<'a> {
    /// Opens a cursor on the segment of `prefix` containing `offset`.  The
    /// caller holds the map lock.
    pub(crate) fn open(map: &'a Emap, prefix: Prefix, offset: u64) -> Result<Self, EmapError> {
        let mut cursor = Self {
            map,
            prefix,
            seg: Segment::default(),
            version: map.version(),
            inner: StoreCursor::new(map.store()),
        };
        cursor.locate(offset)?;
        Ok(cursor)
    }

    /// The current segment.
    pub fn segment(&self) -> &Segment {
        &self.seg
    }

    pub fn prefix(&self) -> Prefix {
        self.prefix
    }

    /// Map version this cursor last synchronized with.
    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn map(&self) -> &'a Emap {
        self.map
    }

    /// Moves to the following segment.
    pub fn next(&mut self) -> Result<(), EmapError> {
        let _guard = self.map.read_lock();
        self.step_next()
    }

    /// Moves to the preceding segment.
    pub fn prev(&mut self) -> Result<(), EmapError> {
        let _guard = self.map.read_lock();
        self.step_prev()
    }

    /// Counts the segments from the current one to the end of the object,
    /// leaving the cursor on the last segment.
    pub fn count_segments(&mut self) -> Result<u64, EmapError> {
        let mut segments = 1;
        while !self.seg.ext.is_last() {
            self.next()?;
            segments += 1;
        }
        Ok(segments)
    }

    /// Rewrites the current segment's start and value from `seg`, whose
    /// prefix and end must match the current segment's.
    pub fn extent_update(&mut self, tx: &mut Transaction, seg: &Segment) -> Result<(), EmapError> {
        if seg.prefix != self.prefix || seg.ext.end != self.seg.ext.end || seg.ext.is_empty() {
            return Err(EmapError::invalid(format!(
                "cannot update {} from {seg}",
                self.seg
            )));
        }
        {
            let _guard = self.map.write_lock();
            self.refresh()?;
            self.update_extent(tx, seg.ext.start, seg.value)?;
        }
        self.map.verify_if_enabled(self.prefix)
    }

    /// Checks the whole chain of this cursor's object.  Never mutates
    /// anything.
    pub fn verify(&self) -> bool {
        let _guard = self.map.read_lock();
        check_chain(self.map, self.prefix).is_ok()
    }

    /// Releases the cursor, checking the object's chain first if the map's
    /// configuration asks for it.
    pub fn close(self) -> Result<(), EmapError> {
        self.map.verify_if_enabled(self.prefix)
    }

    pub(crate) fn is_stale(&self) -> bool {
        self.version != self.map.version()
    }

    /// Moves to the segment containing `offset`.  The caller holds the map
    /// lock.
    pub(crate) fn locate(&mut self, offset: u64) -> Result<(), EmapError> {
        let miss = EmapError::NotFound {
            prefix: self.prefix,
            offset,
        };
        let end = offset
            .checked_add(1)
            .ok_or_else(|| EmapError::invalid(format!("offset {offset:#x} out of range")))?;
        let probe = Segment::encode_key(self.prefix, end)?;
        self.reposition(|inner| inner.get(&probe, true), miss)?;
        self.version = self.map.version();
        Ok(())
    }

    /// Positions on the first segment whose end is at least `end`, after the
    /// store changed under this cursor by its own hand.  The caller holds the
    /// write lock.
    pub(crate) fn resync(&mut self, end: u64) -> Result<(), EmapError> {
        let miss = EmapError::NotFound {
            prefix: self.prefix,
            offset: end,
        };
        let probe = Segment::encode_key(self.prefix, end)?;
        self.reposition(|inner| inner.get(&probe, true), miss)?;
        self.version = self.map.version();
        Ok(())
    }

    /// Re-reads the current segment if the map changed since this cursor
    /// last looked, failing if it is no longer there.  The caller holds the
    /// write lock.
    pub(crate) fn refresh(&mut self) -> Result<(), EmapError> {
        if !self.is_stale() {
            return Ok(());
        }
        let ext = self.seg.ext;
        self.locate(ext.start)?;
        if self.seg.ext != ext {
            return Err(EmapError::invalid(format!(
                "segment {ext} was replaced by {}",
                self.seg.ext
            )));
        }
        Ok(())
    }

    /// [`next`](Self::next) without taking the lock.
    pub(crate) fn step_next(&mut self) -> Result<(), EmapError> {
        let ext = self.seg.ext;
        if ext.is_last() {
            return Err(EmapError::AtBoundary(Boundary::End));
        }
        if self.is_stale() {
            counter!(STALE_CURSORS).increment(1);
            debug!(
                "cursor on {} is stale ({} != {}), re-locating",
                self.seg,
                self.version,
                self.map.version()
            );
            return self.locate(ext.end);
        }
        let miss = self.broken_chain(format!("no segment follows {ext}"));
        self.reposition(|inner| inner.next(), miss)
    }

    /// [`prev`](Self::prev) without taking the lock.
    pub(crate) fn step_prev(&mut self) -> Result<(), EmapError> {
        let ext = self.seg.ext;
        if ext.is_first() {
            return Err(EmapError::AtBoundary(Boundary::Start));
        }
        if self.is_stale() {
            counter!(STALE_CURSORS).increment(1);
            debug!(
                "cursor on {} is stale ({} != {}), re-locating",
                self.seg,
                self.version,
                self.map.version()
            );
            return self.locate(ext.start - 1);
        }
        let miss = self.broken_chain(format!("no segment precedes {ext}"));
        self.reposition(|inner| inner.prev(), miss)
    }

    /// Rewrites the start and value of the current segment in place.  The
    /// caller holds the write lock.
    pub(crate) fn update_extent(
        &mut self,
        tx: &mut Transaction,
        start: u64,
        value: u64,
    ) -> Result<(), EmapError> {
        let mut seg = self.seg.clone();
        seg.ext.start = start;
        seg.value = value;
        self.map.write_segment(tx, &seg, Pack::Update)?;
        self.resync(seg.ext.end)
    }

    fn broken_chain(&self, detail: String) -> EmapError {
        EmapError::InvariantViolation {
            prefix: self.prefix,
            detail,
        }
    }

    /// Moves the store cursor with `mv` and decodes where it lands.  If it
    /// finds nothing, or lands on another object, returns `miss` and leaves
    /// the cursor where it was.
    fn reposition<F>(&mut self, mv: F, miss: EmapError) -> Result<(), EmapError>
    where
        F: FnOnce(&mut StoreCursor<'a>) -> Result<bool, StorageError>,
    {
        let saved = self.inner.clone();
        match self.try_reposition(mv, miss) {
            Ok(seg) => {
                self.seg = seg;
                Ok(())
            }
            Err(error) => {
                self.inner = saved;
                Err(error)
            }
        }
    }

    fn try_reposition<F>(&mut self, mv: F, miss: EmapError) -> Result<Segment, EmapError>
    where
        F: FnOnce(&mut StoreCursor<'a>) -> Result<bool, StorageError>,
    {
        if !mv(&mut self.inner)? {
            return Err(miss);
        }
        let (Some(key), Some(record)) = (self.inner.key(), self.inner.record()) else {
            return Err(miss);
        };
        let seg = Segment::decode(key, record)?;
        if seg.prefix != self.prefix {
            return Err(miss);
        }
        Ok(seg)
    }
}
