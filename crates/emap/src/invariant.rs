//! Whole-chain consistency check.

use crate::{cursor::Cursor, error::EmapError, map::Emap, Prefix, EXTENT_END};

/// Walks the segments of `prefix` from offset 0 with a fresh cursor and
/// checks that they partition `[0, EXTENT_END)`: each starts where the
/// previous one ended, none is empty, and the last ends at [`EXTENT_END`].
/// Every record's framing is verified as it is decoded.
///
/// Returns the number of segments.  The caller holds the map lock.
pub(crate) fn check_chain(map: &Emap, prefix: Prefix) -> Result<u64, EmapError> {
    let violation = |detail: String| EmapError::InvariantViolation { prefix, detail };

    let mut scan = Cursor::open(map, prefix, 0)?;
    let mut reached = 0u64;
    let mut total = 0u64;
    let mut segments = 0u64;
    loop {
        let ext = scan.segment().ext;
        if ext.start != reached {
            return Err(violation(format!(
                "segment {ext} does not start at {reached:#x}"
            )));
        }
        if ext.end <= reached {
            return Err(violation(format!("segment {ext} is empty")));
        }
        reached = ext.end;
        total = total
            .checked_add(ext.len())
            .ok_or_else(|| violation(format!("segments overflow at {ext}")))?;
        segments += 1;
        if ext.is_last() {
            break;
        }
        scan.step_next()?;
    }
    if total != u64::MAX {
        return Err(violation(format!("segments cover {total:#x} bytes")));
    }
    if reached != EXTENT_END {
        return Err(violation(format!("chain ends at {reached:#x}")));
    }
    Ok(segments)
}
