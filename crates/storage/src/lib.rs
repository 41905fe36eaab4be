//! Common Types and Trait Definition for the ordered stores behind an extent
//! map.
//!
//! An [`OrderedStore`] is a transactional B-tree-like map from byte-string
//! keys to byte-string records, ordered by a caller-supplied [`KeyCmp`].  A
//! [`StoreBackend`] creates, opens and destroys such trees.  All writes go
//! through a [`Transaction`], which enforces the [`Credit`] reserved for it
//! and reverts its writes if it aborts.
//!
//! [`memory_impl::MemBackend`] is the in-memory implementation.

use std::cmp::Ordering;
use std::sync::Arc;

use crate::error::StorageError;

pub mod error;
pub mod memory_impl;
pub mod metrics;
pub mod tx;

pub use tx::{Credit, Transaction};

/// Identifies a tree within its backend.
pub type TreeId = u64;

/// Comparison function over encoded keys, fixed when a tree is created.
pub type KeyCmp = fn(&[u8], &[u8]) -> Ordering;

/// An owned key/record pair as read from a store.
pub type Entry = (Vec<u8>, Vec<u8>);

/// A creator of ordered stores.
pub trait StoreBackend: Send + Sync {
    /// Creates a new, empty tree whose keys are ordered by `cmp`.
    fn create_tree(
        &self,
        tx: &mut Transaction,
        cmp: KeyCmp,
    ) -> Result<Arc<dyn OrderedStore>, StorageError>;

    /// Opens the existing tree `id`.
    fn open_tree(&self, id: TreeId) -> Result<Arc<dyn OrderedStore>, StorageError>;

    /// Destroys the tree `id`, which must be empty.
    fn destroy_tree(&self, tx: &mut Transaction, id: TreeId) -> Result<(), StorageError>;
}

/// An ordered, transactional key-value store.
///
/// Reads return owned copies, so nothing returned by a store is invalidated
/// by a later write.
pub trait OrderedStore: Send + Sync {
    /// Returns this tree's identifier in its backend.
    fn id(&self) -> TreeId;

    /// Returns the number of records in the tree.
    fn len(&self) -> Result<usize, StorageError>;

    /// Returns true if the tree holds no records.
    fn is_empty(&self) -> Result<bool, StorageError> {
        Ok(self.len()? == 0)
    }

    /// Returns the record whose key equals `key`.
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, StorageError>;

    /// Returns the entry with the least key that is not less than `key`.
    fn seek(&self, key: &[u8]) -> Result<Option<Entry>, StorageError>;

    /// Returns the entry with the least key greater than `key`.
    fn next(&self, key: &[u8]) -> Result<Option<Entry>, StorageError>;

    /// Returns the entry with the greatest key less than `key`.
    fn prev(&self, key: &[u8]) -> Result<Option<Entry>, StorageError>;

    /// Adds a record under `key`, which must not already be present.
    fn insert(&self, tx: &mut Transaction, key: &[u8], record: &[u8])
        -> Result<(), StorageError>;

    /// Replaces the record under `key`, which must be present.
    fn update(&self, tx: &mut Transaction, key: &[u8], record: &[u8])
        -> Result<(), StorageError>;

    /// Removes the record under `key`, which must be present.
    fn delete(&self, tx: &mut Transaction, key: &[u8]) -> Result<(), StorageError>;
}

/// A position in an [`OrderedStore`].
///
/// A cursor is either unpositioned or sits on one entry, a copy of which it
/// keeps.  Moves that find nothing return `Ok(false)` and leave the cursor
/// where it was.
#[derive(Clone)]
pub struct StoreCursor<'a> {
    store: &'a dyn OrderedStore,
    current: Option<Entry>,
}

impl<'a> StoreCursor<'a> {
    pub fn new(store: &'a dyn OrderedStore) -> Self {
        Self {
            store,
            current: None,
        }
    }

    /// Positions on `key`.  With `slant`, positions on the least key not less
    /// than `key` instead of requiring an exact match.
    pub fn get(&mut self, key: &[u8], slant: bool) -> Result<bool, StorageError> {
        let found = if slant {
            self.store.seek(key)?
        } else {
            self.store
                .get(key)?
                .map(|record| (key.to_vec(), record))
        };
        Ok(self.land(found))
    }

    /// Moves to the following entry.
    pub fn next(&mut self) -> Result<bool, StorageError> {
        let found = match &self.current {
            Some((key, _)) => self.store.next(key)?,
            None => None,
        };
        Ok(self.land(found))
    }

    /// Moves to the preceding entry.
    pub fn prev(&mut self) -> Result<bool, StorageError> {
        let found = match &self.current {
            Some((key, _)) => self.store.prev(key)?,
            None => None,
        };
        Ok(self.land(found))
    }

    fn land(&mut self, found: Option<Entry>) -> bool {
        match found {
            Some(entry) => {
                self.current = Some(entry);
                true
            }
            None => false,
        }
    }

    pub fn key(&self) -> Option<&[u8]> {
        self.current.as_ref().map(|(key, _)| key.as_slice())
    }

    pub fn record(&self) -> Option<&[u8]> {
        self.current.as_ref().map(|(_, record)| record.as_slice())
    }

    /// Returns the store this cursor walks.
    pub fn store(&self) -> &'a dyn OrderedStore {
        self.store
    }
}
