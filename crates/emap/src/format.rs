//! # Extent map record format
//!
//! Each segment of an extent map is stored in the ordered store as one key
//! and one record.  The segment `[start, end) -> value` of object `prefix`
//! has key `(prefix, end)` and record `(start, value, checksum)`.  Keying on
//! the end offset means that the segment containing offset `X` is the one
//! under the least key not less than `(prefix, X + 1)`.
//!
//! The format uses [`mod@binrw`] for serializing and deserializing and is
//! little-endian throughout.  Keys and records are each framed by a 16-byte
//! [`FormatHeader`] and a 16-byte [`FormatFooter`]; the footer carries a
//! [`crc32c`] checksum of everything before it.
//!
//! A key is 56 bytes:
//!
//! * [`FormatHeader`] with [`FormatKind::Key`].
//!
//! * [`KeyBody`]: the prefix, high word first, then the end offset.
//!
//! * [`FormatFooter`].
//!
//! A record is 64 bytes plus the length of its checksum buffer:
//!
//! * [`FormatHeader`] with [`FormatKind::Record`].
//!
//! * [`RecordBody`]: start offset, value, checksum length and unit size.
//!
//! * The checksum bytes, [`RecordBody::checksum_len`] of them.
//!
//! * [`FormatFooter`].
//!
//! Keys compare with [`key_cmp`], which orders by prefix and then by end
//! offset.

use std::cmp::Ordering;
use std::fmt::{self, Display};
use std::io::{Cursor as IoCursor, Write};

use binrw::{binrw, BinRead, BinWrite};

use crate::error::EmapError;
use crate::extent::Extent;
use crate::Prefix;

/// Increment this on each incompatible change.
pub const VERSION_NUMBER: u16 = 1;

/// Magic number at the start of every key and record.
pub const HEADER_MAGIC: u64 = u64::from_le_bytes(*b"EMAPHDR1");

/// Magic number at the start of every footer.
pub const FOOTER_MAGIC: u64 = u64::from_le_bytes(*b"EMAPFTR1");

/// Size of [`FormatHeader`].
pub const HEADER_SIZE: usize = 16;

/// Size of [`FormatFooter`].
pub const FOOTER_SIZE: usize = 16;

/// Size of an encoded key.
pub const KEY_SIZE: usize = HEADER_SIZE + 24 + FOOTER_SIZE;

/// Size of an encoded record without checksum bytes.
pub const RECORD_FIXED_SIZE: usize = HEADER_SIZE + 32 + FOOTER_SIZE;

/// What a framed buffer holds.
#[binrw]
#[brw(repr(u16))]
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum FormatKind {
    Key = 1,
    Record = 2,
}

/// 16-byte header at the beginning of each key and record.
#[binrw]
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct FormatHeader {
    /// Always [`HEADER_MAGIC`].
    #[br(assert(magic == HEADER_MAGIC, "bad header magic"))]
    pub magic: u64,

    /// Currently, must be [`VERSION_NUMBER`].
    pub version: u16,

    pub kind: FormatKind,

    /// Byte offset of the [`FormatFooter`] from the start of the buffer.
    pub footer_offset: u32,
}

/// 16-byte footer at the end of each key and record.
#[binrw]
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct FormatFooter {
    /// Always [`FOOTER_MAGIC`].
    #[br(assert(magic == FOOTER_MAGIC, "bad footer magic"))]
    pub magic: u64,

    /// 32-bit [`crc32c`] checksum of the buffer up to the footer.
    pub checksum: u32,

    /// Must equal the header's `footer_offset`.
    pub footer_offset: u32,
}

/// Fixed part of a key.
#[binrw]
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct KeyBody {
    pub prefix_hi: u64,
    pub prefix_lo: u64,
    pub end: u64,
}

/// Fixed part of a record.
#[binrw]
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct RecordBody {
    pub start: u64,
    pub value: u64,
    pub checksum_len: u64,
    pub unit_size: u64,
}

/// One decoded segment.
///
/// Every decode returns a fresh copy, so a `Segment` never changes under its
/// owner.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Segment {
    pub prefix: Prefix,
    pub ext: Extent,
    pub value: u64,
    /// Checksums of the data units starting in `ext`, or empty.
    pub checksum: Vec<u8>,
    /// Data unit size the checksums refer to.
    pub unit_size: u64,
}

impl Segment {
    /// Encodes the key `(prefix, end)`.
    pub fn encode_key(prefix: Prefix, end: u64) -> Result<Vec<u8>, EmapError> {
        let body = KeyBody {
            prefix_hi: prefix.hi,
            prefix_lo: prefix.lo,
            end,
        };
        frame(FormatKind::Key, KEY_SIZE, |writer| {
            body.write_le(writer).map_err(encode_error)
        })
    }

    /// Encodes this segment's key and record.
    pub fn encode(&self) -> Result<(Vec<u8>, Vec<u8>), EmapError> {
        let key = Self::encode_key(self.prefix, self.ext.end)?;
        let body = RecordBody {
            start: self.ext.start,
            value: self.value,
            checksum_len: self.checksum.len() as u64,
            unit_size: self.unit_size,
        };
        let size = RECORD_FIXED_SIZE
            .checked_add(self.checksum.len())
            .ok_or(EmapError::ResourceExhaustion(usize::MAX))?;
        let record = frame(FormatKind::Record, size, |writer| {
            body.write_le(writer).map_err(encode_error)?;
            writer
                .write_all(&self.checksum)
                .map_err(|error| EmapError::corrupt(format!("encoding failed: {error}")))
        })?;
        Ok((key, record))
    }

    /// Decodes a key alone, returning the prefix and end offset.
    pub fn decode_key(key: &[u8]) -> Result<(Prefix, u64), EmapError> {
        if key.len() != KEY_SIZE {
            return Err(EmapError::corrupt(format!(
                "key is {} bytes, expected {KEY_SIZE}",
                key.len()
            )));
        }
        let mut reader = unframe(key, FormatKind::Key)?;
        let body = KeyBody::read_le(&mut reader).map_err(decode_error)?;
        Ok((Prefix::new(body.prefix_hi, body.prefix_lo), body.end))
    }

    /// Decodes a key and record read from the store.
    pub fn decode(key: &[u8], record: &[u8]) -> Result<Self, EmapError> {
        let (prefix, end) = Self::decode_key(key)?;
        if record.len() < RECORD_FIXED_SIZE {
            return Err(EmapError::corrupt(format!(
                "record is {} bytes, at least {RECORD_FIXED_SIZE} required",
                record.len()
            )));
        }
        let mut reader = unframe(record, FormatKind::Record)?;
        let body = RecordBody::read_le(&mut reader).map_err(decode_error)?;
        let checksum_start = HEADER_SIZE + 32;
        let checksum_end = record.len() - FOOTER_SIZE;
        if body.checksum_len != (checksum_end - checksum_start) as u64 {
            return Err(EmapError::corrupt(format!(
                "record claims {} checksum bytes but holds {}",
                body.checksum_len,
                checksum_end - checksum_start
            )));
        }
        let ext = Extent::new(body.start, end);
        if ext.is_empty() {
            return Err(EmapError::corrupt(format!("empty extent {ext} for {prefix}")));
        }
        let mut checksum = Vec::new();
        checksum
            .try_reserve_exact(body.checksum_len as usize)
            .map_err(|_| EmapError::ResourceExhaustion(body.checksum_len as usize))?;
        checksum.extend_from_slice(&record[checksum_start..checksum_end]);
        Ok(Self {
            prefix,
            ext,
            value: body.value,
            checksum,
            unit_size: body.unit_size,
        })
    }

    /// Size of this segment's encoded record.
    pub fn record_size(&self) -> usize {
        RECORD_FIXED_SIZE + self.checksum.len()
    }
}

impl Display for Segment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} -> {:#x}", self.prefix, self.ext, self.value)?;
        if !self.checksum.is_empty() {
            write!(f, " ({} checksum bytes, unit {})", self.checksum.len(), self.unit_size)?;
        }
        Ok(())
    }
}

/// Orders encoded keys by prefix and then by end offset.
///
/// Buffers too short to be keys fall back to byte order.
pub fn key_cmp(a: &[u8], b: &[u8]) -> Ordering {
    match (key_fields(a), key_fields(b)) {
        (Some(a), Some(b)) => a.cmp(&b),
        _ => a.cmp(b),
    }
}

fn key_fields(key: &[u8]) -> Option<(u64, u64, u64)> {
    let field = |i: usize| -> Option<u64> {
        let start = HEADER_SIZE + i * 8;
        let bytes = key.get(start..start + 8)?;
        Some(u64::from_le_bytes(bytes.try_into().ok()?))
    };
    Some((field(0)?, field(1)?, field(2)?))
}

fn frame(
    kind: FormatKind,
    size: usize,
    body: impl FnOnce(&mut IoCursor<Vec<u8>>) -> Result<(), EmapError>,
) -> Result<Vec<u8>, EmapError> {
    let footer_offset = size - FOOTER_SIZE;
    let mut buffer = Vec::new();
    buffer
        .try_reserve_exact(size)
        .map_err(|_| EmapError::ResourceExhaustion(size))?;
    let mut writer = IoCursor::new(buffer);
    FormatHeader {
        magic: HEADER_MAGIC,
        version: VERSION_NUMBER,
        kind,
        footer_offset: u32::try_from(footer_offset)
            .map_err(|_| EmapError::invalid(format!("{size}-byte record is too large")))?,
    }
    .write_le(&mut writer)
    .map_err(encode_error)?;
    body(&mut writer)?;
    debug_assert_eq!(writer.get_ref().len(), footer_offset);
    let checksum = crc32c::crc32c(writer.get_ref());
    FormatFooter {
        magic: FOOTER_MAGIC,
        checksum,
        footer_offset: footer_offset as u32,
    }
    .write_le(&mut writer)
    .map_err(encode_error)?;
    Ok(writer.into_inner())
}

/// Checks the header and footer of `raw` and returns a reader positioned
/// just after the header.
fn unframe(raw: &[u8], kind: FormatKind) -> Result<IoCursor<&[u8]>, EmapError> {
    let mut reader = IoCursor::new(raw);
    let header = FormatHeader::read_le(&mut reader).map_err(decode_error)?;
    if header.version != VERSION_NUMBER {
        return Err(EmapError::corrupt(format!(
            "format version {} is not {VERSION_NUMBER}",
            header.version
        )));
    }
    if header.kind != kind {
        return Err(EmapError::corrupt(format!(
            "expected {kind:?} but found {:?}",
            header.kind
        )));
    }
    let footer_offset = raw.len() - FOOTER_SIZE;
    if header.footer_offset as usize != footer_offset {
        return Err(EmapError::corrupt(format!(
            "header places footer at {} in a {}-byte buffer",
            header.footer_offset,
            raw.len()
        )));
    }
    let footer = FormatFooter::read_le(&mut IoCursor::new(&raw[footer_offset..]))
        .map_err(decode_error)?;
    if footer.footer_offset != header.footer_offset {
        return Err(EmapError::corrupt(format!(
            "footer offset {} disagrees with header offset {}",
            footer.footer_offset, header.footer_offset
        )));
    }
    let computed = crc32c::crc32c(&raw[..footer_offset]);
    if footer.checksum != computed {
        return Err(EmapError::corrupt(format!(
            "checksum {computed:#x} does not match footer {:#x}",
            footer.checksum
        )));
    }
    Ok(reader)
}

fn encode_error(error: binrw::Error) -> EmapError {
    EmapError::corrupt(format!("encoding failed: {error}"))
}

fn decode_error(error: binrw::Error) -> EmapError {
    EmapError::corrupt(error.to_string())
}
