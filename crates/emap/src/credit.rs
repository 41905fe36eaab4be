//! Credit calculation.
//!
//! Callers reserve credit for a transaction before opening it.  [`credit`]
//! returns an upper bound on what one kind of extent map operation needs,
//! based on the largest key and record the map can hold.

use emap_storage::Credit;
use serde::{Deserialize, Serialize};

use crate::config::EmapConfig;
use crate::format::{KEY_SIZE, RECORD_FIXED_SIZE};

/// Kinds of extent map operation.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EmapOp {
    /// Create a map.
    Create,
    /// Destroy a map.
    Destroy,
    /// Insert one segment record, as [`Emap::insert_whole_object`] does.
    ///
    /// [`Emap::insert_whole_object`]: crate::Emap::insert_whole_object
    Insert,
    /// Delete one segment record, as [`Emap::delete_whole_object`] does.
    ///
    /// [`Emap::delete_whole_object`]: crate::Emap::delete_whole_object
    Delete,
    /// Update one segment record in place.
    Update,
    /// [`Cursor::merge`](crate::Cursor::merge).
    Merge,
    /// [`Cursor::split`](crate::Cursor::split), with `nr` pieces.
    Split,
    /// [`Cursor::paste`](crate::Cursor::paste), over `nr` segments.
    Paste,
}

/// Largest record a map with `config` can hold.
pub fn max_record_size(config: &EmapConfig) -> u64 {
    RECORD_FIXED_SIZE as u64 + config.max_checksum_bytes()
}

/// Returns the credit for `nr` operations of kind `op`.
pub fn credit(config: &EmapConfig, op: EmapOp, nr: u64) -> Credit {
    let size = KEY_SIZE as u64 + max_record_size(config);
    match op {
        EmapOp::Create => Credit::create_tree(nr),
        EmapOp::Destroy => Credit::destroy_tree(nr),
        EmapOp::Insert => Credit::insert(nr, size),
        EmapOp::Delete => Credit::delete(nr, size),
        EmapOp::Update => Credit::update(nr, size),
        EmapOp::Merge => {
            Credit::delete(nr, size) + Credit::insert(nr, size) + Credit::update(nr, size)
        }
        EmapOp::Split => {
            Credit::delete(1, size) + Credit::insert(nr, size) + Credit::update(1, size)
        }
        EmapOp::Paste => credit(config, EmapOp::Split, 3).times(nr),
    }
}
