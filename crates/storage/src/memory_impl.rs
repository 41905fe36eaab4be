//! Implementation of the store APIs ([`StoreBackend`] and [`OrderedStore`])
//! using memory.
//!
//! Trees are [`BTreeMap`]s ordered through each tree's [`KeyCmp`].  Nothing
//! is persisted; this backend serves tests and tools that need a store with
//! the full transactional contract but no device behind it.

use metrics::counter;
use std::{
    cmp::Ordering,
    collections::{BTreeMap, HashMap},
    ops::Bound,
    sync::{
        atomic::{AtomicU64, Ordering as AtomicOrdering},
        Arc, Mutex, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard,
    },
};
use tracing::{debug, trace};

use crate::{
    error::StorageError,
    metrics::{
        describe_store_metrics, BYTES_WRITTEN, DELETES, INSERTS, TREES_CREATED,
        TREES_DESTROYED, UPDATES, WRITES_FAILED,
    },
    tx::{Credit, Transaction},
    Entry, KeyCmp, OrderedStore, StoreBackend, TreeId,
};

/// A key together with the comparison that orders it.
#[derive(Clone)]
struct TreeKey {
    bytes: Box<[u8]>,
    cmp: KeyCmp,
}

impl TreeKey {
    fn new(bytes: &[u8], cmp: KeyCmp) -> Self {
        Self {
            bytes: bytes.into(),
            cmp,
        }
    }
}

impl PartialEq for TreeKey {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for TreeKey {}

impl PartialOrd for TreeKey {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for TreeKey {
    fn cmp(&self, other: &Self) -> Ordering {
        (self.cmp)(&self.bytes, &other.bytes)
    }
}

type Records = Arc<RwLock<BTreeMap<TreeKey, Vec<u8>>>>;

/// An in-memory tree.
pub struct MemTree {
    id: TreeId,
    cmp: KeyCmp,
    records: Records,
    /// Number of writes still allowed to succeed before one fails, if fault
    /// injection is armed.
    fail_after: Mutex<Option<u64>>,
}

impl MemTree {
    fn new(id: TreeId, cmp: KeyCmp) -> Self {
        Self {
            id,
            cmp,
            records: Arc::new(RwLock::new(BTreeMap::new())),
            fail_after: Mutex::new(None),
        }
    }

    /// Arms fault injection: the next `n` writes succeed and the one after
    /// fails with [`StorageError::InjectedFault`].  Fault injection disarms
    /// itself once it fires.
    pub fn fail_writes_after(&self, n: u64) {
        *self.fail_after.lock().unwrap_or_else(PoisonError::into_inner) = Some(n);
    }

    /// Disarms fault injection.
    pub fn clear_fault(&self) {
        *self.fail_after.lock().unwrap_or_else(PoisonError::into_inner) = None;
    }

    /// Returns a copy of every entry, in key order.
    pub fn entries(&self) -> Vec<Entry> {
        self.read()
            .iter()
            .map(|(key, record)| (key.bytes.to_vec(), record.clone()))
            .collect()
    }

    fn read(&self) -> RwLockReadGuard<'_, BTreeMap<TreeKey, Vec<u8>>> {
        self.records.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, BTreeMap<TreeKey, Vec<u8>>> {
        self.records.write().unwrap_or_else(PoisonError::into_inner)
    }

    fn probe(&self, key: &[u8]) -> TreeKey {
        TreeKey::new(key, self.cmp)
    }

    fn check_fault(&self) -> Result<(), StorageError> {
        let mut fail_after = self.fail_after.lock().unwrap_or_else(PoisonError::into_inner);
        match *fail_after {
            Some(0) => {
                *fail_after = None;
                counter!(WRITES_FAILED).increment(1);
                debug!("tree {}: injecting write failure", self.id);
                Err(StorageError::InjectedFault(self.id))
            }
            Some(n) => {
                *fail_after = Some(n - 1);
                Ok(())
            }
            None => Ok(()),
        }
    }

    fn first_from(
        map: &BTreeMap<TreeKey, Vec<u8>>,
        lower: Bound<&TreeKey>,
    ) -> Option<Entry> {
        map.range((lower, Bound::Unbounded))
            .next()
            .map(|(key, record)| (key.bytes.to_vec(), record.clone()))
    }
}

impl OrderedStore for MemTree {
    fn id(&self) -> TreeId {
        self.id
    }

    fn len(&self) -> Result<usize, StorageError> {
        Ok(self.read().len())
    }

    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, StorageError> {
        Ok(self.read().get(&self.probe(key)).cloned())
    }

    fn seek(&self, key: &[u8]) -> Result<Option<Entry>, StorageError> {
        let probe = self.probe(key);
        Ok(Self::first_from(&self.read(), Bound::Included(&probe)))
    }

    fn next(&self, key: &[u8]) -> Result<Option<Entry>, StorageError> {
        let probe = self.probe(key);
        Ok(Self::first_from(&self.read(), Bound::Excluded(&probe)))
    }

    fn prev(&self, key: &[u8]) -> Result<Option<Entry>, StorageError> {
        let probe = self.probe(key);
        Ok(self
            .read()
            .range(..probe)
            .next_back()
            .map(|(key, record)| (key.bytes.to_vec(), record.clone())))
    }

    fn insert(
        &self,
        tx: &mut Transaction,
        key: &[u8],
        record: &[u8],
    ) -> Result<(), StorageError> {
        self.check_fault()?;
        let key = self.probe(key);
        let mut map = self.write();
        if map.contains_key(&key) {
            counter!(WRITES_FAILED).increment(1);
            return Err(StorageError::KeyExists { tree: self.id });
        }
        let size = (key.bytes.len() + record.len()) as u64;
        tx.charge(Credit::insert(1, size))?;
        map.insert(key.clone(), record.to_vec());
        drop(map);

        let records = self.records.clone();
        tx.on_abort(move || {
            records
                .write()
                .unwrap_or_else(PoisonError::into_inner)
                .remove(&key);
        });
        counter!(INSERTS).increment(1);
        counter!(BYTES_WRITTEN).increment(size);
        trace!("tree {}: insert {size} bytes", self.id);
        Ok(())
    }

    fn update(
        &self,
        tx: &mut Transaction,
        key: &[u8],
        record: &[u8],
    ) -> Result<(), StorageError> {
        self.check_fault()?;
        let key = self.probe(key);
        let mut map = self.write();
        let size = (key.bytes.len() + record.len()) as u64;
        let Some(slot) = map.get_mut(&key) else {
            counter!(WRITES_FAILED).increment(1);
            return Err(StorageError::KeyNotFound { tree: self.id });
        };
        tx.charge(Credit::update(1, size))?;
        let old = std::mem::replace(slot, record.to_vec());
        drop(map);

        let records = self.records.clone();
        tx.on_abort(move || {
            records
                .write()
                .unwrap_or_else(PoisonError::into_inner)
                .insert(key, old);
        });
        counter!(UPDATES).increment(1);
        counter!(BYTES_WRITTEN).increment(size);
        trace!("tree {}: update {size} bytes", self.id);
        Ok(())
    }

    fn delete(&self, tx: &mut Transaction, key: &[u8]) -> Result<(), StorageError> {
        self.check_fault()?;
        let key = self.probe(key);
        let mut map = self.write();
        let Some(old) = map.get(&key) else {
            counter!(WRITES_FAILED).increment(1);
            return Err(StorageError::KeyNotFound { tree: self.id });
        };
        tx.charge(Credit::delete(1, (key.bytes.len() + old.len()) as u64))?;
        let Some((key, old)) = map.remove_entry(&key) else {
            return Err(StorageError::KeyNotFound { tree: self.id });
        };
        drop(map);

        let records = self.records.clone();
        tx.on_abort(move || {
            records
                .write()
                .unwrap_or_else(PoisonError::into_inner)
                .insert(key, old);
        });
        counter!(DELETES).increment(1);
        trace!("tree {}: delete", self.id);
        Ok(())
    }
}

type Trees = Arc<RwLock<HashMap<TreeId, Arc<MemTree>>>>;

/// State of the backend needed to satisfy the store APIs.
pub struct MemBackend {
    /// All trees created so far and not yet destroyed.
    trees: Trees,
    /// Counter to get unique tree identifiers.
    next_tree_id: AtomicU64,
}

impl MemBackend {
    /// Instantiates a new backend.
    pub fn new() -> Self {
        describe_store_metrics();
        Self {
            trees: Arc::new(RwLock::new(HashMap::new())),
            next_tree_id: AtomicU64::new(1),
        }
    }

    /// Returns the concrete tree `id`, for access to the test hooks on
    /// [`MemTree`].
    pub fn tree(&self, id: TreeId) -> Option<Arc<MemTree>> {
        self.trees
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&id)
            .cloned()
    }

    /// Returns the number of live trees.
    pub fn n_trees(&self) -> usize {
        self.trees.read().unwrap_or_else(PoisonError::into_inner).len()
    }
}

impl Default for MemBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl StoreBackend for MemBackend {
    fn create_tree(
        &self,
        tx: &mut Transaction,
        cmp: KeyCmp,
    ) -> Result<Arc<dyn OrderedStore>, StorageError> {
        tx.charge(Credit::create_tree(1))?;
        let id = self.next_tree_id.fetch_add(1, AtomicOrdering::Relaxed);
        let tree = Arc::new(MemTree::new(id, cmp));
        self.trees
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(id, tree.clone());

        let trees = self.trees.clone();
        tx.on_abort(move || {
            trees
                .write()
                .unwrap_or_else(PoisonError::into_inner)
                .remove(&id);
        });
        counter!(TREES_CREATED).increment(1);
        debug!("created tree {id}");
        Ok(tree)
    }

    fn open_tree(&self, id: TreeId) -> Result<Arc<dyn OrderedStore>, StorageError> {
        match self.tree(id) {
            Some(tree) => Ok(tree),
            None => Err(StorageError::TreeNotFound(id)),
        }
    }

    fn destroy_tree(&self, tx: &mut Transaction, id: TreeId) -> Result<(), StorageError> {
        let mut trees = self.trees.write().unwrap_or_else(PoisonError::into_inner);
        let records = match trees.get(&id) {
            Some(tree) => tree.read().len(),
            None => return Err(StorageError::TreeNotFound(id)),
        };
        if records > 0 {
            return Err(StorageError::TreeNotEmpty { tree: id, records });
        }
        tx.charge(Credit::destroy_tree(1))?;
        let Some(tree) = trees.remove(&id) else {
            return Err(StorageError::TreeNotFound(id));
        };
        drop(trees);

        let trees = self.trees.clone();
        tx.on_abort(move || {
            trees
                .write()
                .unwrap_or_else(PoisonError::into_inner)
                .insert(id, tree);
        });
        counter!(TREES_DESTROYED).increment(1);
        debug!("destroyed tree {id}");
        Ok(())
    }
}
