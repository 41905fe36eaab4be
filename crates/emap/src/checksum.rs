//! Checksum addressing.
//!
//! A segment's checksum buffer holds one fixed-size checksum for each data
//! unit that *starts* inside the segment.  Units are `unit_size` bytes long
//! and aligned to multiples of `unit_size`.  The functions here find which
//! part of a buffer belongs to part of an extent; they never look at the
//! checksum bytes themselves.
//!
//! All functions return `None` when `unit_size` is zero.

/// Number of unit starts in `[start, start + len)`.
///
/// With 4-byte units:
///
/// ```text
///   | unit 0 || unit 1 || unit 2 |
///   |e1|                            (0, 2) => 1
///        |   e4   |                 (3, 5) => 1
///        |     e5      |            (3, 6) => 2
///     |e6|                          (1, 2) => 0
/// ```
pub fn units_spanned(start: u64, len: u64, unit_size: u64) -> Option<u64> {
    if len == 0 {
        return unit_size.checked_div(unit_size).map(|_| 0);
    }
    let last = start.checked_add(len - 1)?;
    let mut units = last.checked_div(unit_size)? - start / unit_size;
    if start % unit_size == 0 {
        units += 1;
    }
    Some(units)
}

/// Number of whole units between `base` and `offset`.
pub fn unit_offset(offset: u64, base: u64, unit_size: u64) -> Option<u64> {
    offset.checked_sub(base)?.checked_div(unit_size)
}

/// Byte position, in the checksum buffer of a segment starting at `base`, of
/// the checksum for the unit at `offset`.
pub fn checksum_offset(offset: u64, base: u64, unit_size: u64, checksum_size: u64) -> Option<u64> {
    unit_offset(offset, base, unit_size)?.checked_mul(checksum_size)
}

/// Number of checksum bytes for `[start, start + len)`.
pub fn checksum_len(start: u64, len: u64, unit_size: u64, checksum_size: u64) -> Option<u64> {
    units_spanned(start, len, unit_size)?.checked_mul(checksum_size)
}

/// Per-unit checksum size of a segment `[start, start + len)` whose buffer is
/// `buffer_len` bytes.  `None` if the segment spans no unit start or the
/// buffer is not a whole number of checksums.
pub fn checksum_size(start: u64, len: u64, unit_size: u64, buffer_len: u64) -> Option<u64> {
    let units = units_spanned(start, len, unit_size)?;
    if units == 0 || buffer_len % units != 0 {
        return None;
    }
    Some(buffer_len / units)
}
