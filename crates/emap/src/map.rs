//! The extent map handle.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use emap_storage::{Credit, OrderedStore, StoreBackend, StoreCursor, Transaction, TreeId};
use metrics::counter;
use tracing::{debug, info, trace, warn};

use crate::{
    config::EmapConfig,
    credit::{credit, EmapOp},
    cursor::Cursor,
    error::EmapError,
    extent::Extent,
    format::{key_cmp, Segment},
    invariant::check_chain,
    metrics::{describe_emap_metrics, LOOKUPS, VERIFY_FAILURES},
    Prefix, BINDEX_MAX,
};

/// How a segment record reaches the store.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub(crate) enum Pack {
    /// Under a key not yet present.
    Insert,
    /// Replacing the record under an existing key.
    Update,
}

/// Segment and object counts returned by [`Emap::dump`].
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct DumpStats {
    pub segments: u64,
    pub objects: u64,
}

/// An extent map stored in one tree of a [`StoreBackend`].
///
/// All objects' segments share the tree and one reader/writer lock.
/// Read-only cursor operations hold the lock shared; mutations hold it
/// exclusively and bump [`version`](Self::version) on every record they
/// write, which is how cursors find out that their position may be stale.
/// Aborting a transaction that wrote records bumps it again.
pub struct Emap {
    store: Arc<dyn OrderedStore>,
    version: Arc<AtomicU64>,
    lock: RwLock<()>,
    config: EmapConfig,
}

impl Emap {
    /// Creates a new, empty map in a fresh tree of `backend`.
    pub fn create(
        backend: &dyn StoreBackend,
        tx: &mut Transaction,
        config: EmapConfig,
    ) -> Result<Self, EmapError> {
        let store = backend.create_tree(tx, key_cmp)?;
        info!("created extent map in tree {}", store.id());
        Ok(Self::with_store(store, config))
    }

    /// Opens the map kept in tree `id` of `backend`.
    pub fn open(
        backend: &dyn StoreBackend,
        id: TreeId,
        config: EmapConfig,
    ) -> Result<Self, EmapError> {
        let store = backend.open_tree(id)?;
        debug!("opened extent map in tree {id}");
        Ok(Self::with_store(store, config))
    }

    fn with_store(store: Arc<dyn OrderedStore>, config: EmapConfig) -> Self {
        describe_emap_metrics();
        Self {
            store,
            version: Arc::new(AtomicU64::new(0)),
            lock: RwLock::new(()),
            config,
        }
    }

    /// Destroys the map.  Every object must have been deleted first.
    pub fn destroy(
        self,
        backend: &dyn StoreBackend,
        tx: &mut Transaction,
    ) -> Result<(), EmapError> {
        let id = self.store.id();
        backend.destroy_tree(tx, id)?;
        info!("destroyed extent map in tree {id}");
        Ok(())
    }

    /// Identifier of the tree that holds this map.
    pub fn id(&self) -> TreeId {
        self.store.id()
    }

    pub fn config(&self) -> &EmapConfig {
        &self.config
    }

    /// Number of record writes and aborted writes so far.
    pub fn version(&self) -> u64 {
        self.version.load(Ordering::Acquire)
    }

    /// Adds the credit for `nr` operations of kind `op` to `accum`.
    pub fn credit(&self, op: EmapOp, nr: u64, accum: &mut Credit) {
        *accum += credit(&self.config, op, nr);
    }

    /// Returns a cursor on the segment of `prefix` that contains `offset`.
    pub fn lookup(&self, prefix: Prefix, offset: u64) -> Result<Cursor<'_>, EmapError> {
        if offset > BINDEX_MAX {
            return Err(EmapError::invalid(format!(
                "offset {offset:#x} is past the end of the address space"
            )));
        }
        counter!(LOOKUPS).increment(1);
        let _guard = self.read_lock();
        Cursor::open(self, prefix, offset)
    }

    /// Gives the new object `prefix` a single segment covering its whole
    /// address space and mapping it to `value`.
    pub fn insert_whole_object(
        &self,
        tx: &mut Transaction,
        prefix: Prefix,
        value: u64,
    ) -> Result<(), EmapError> {
        let seg = Segment {
            prefix,
            ext: Extent::whole(),
            value,
            checksum: Vec::new(),
            unit_size: 0,
        };
        let _guard = self.write_lock();
        self.write_segment(tx, &seg, Pack::Insert)?;
        debug!("inserted object {prefix}");
        Ok(())
    }

    /// Deletes object `prefix`, whose only segment must cover its whole
    /// address space.
    pub fn delete_whole_object(
        &self,
        tx: &mut Transaction,
        prefix: Prefix,
    ) -> Result<(), EmapError> {
        let _guard = self.write_lock();
        let cursor = Cursor::open(self, prefix, 0)?;
        let ext = cursor.segment().ext;
        if !(ext.is_first() && ext.is_last()) {
            return Err(EmapError::invalid(format!(
                "object {prefix} still has more than one segment (first is {ext})"
            )));
        }
        self.delete_segment(tx, prefix, ext.end)?;
        debug!("deleted object {prefix}");
        Ok(())
    }

    /// Walks every segment of every object, checking that each record
    /// decodes, and counts segments and objects.
    pub fn dump(&self) -> Result<DumpStats, EmapError> {
        let _guard = self.read_lock();
        let mut stats = DumpStats::default();
        let mut cursor = StoreCursor::new(self.store());
        let first = Segment::encode_key(Prefix::default(), 0)?;
        let mut more = cursor.get(&first, true)?;
        while more {
            let (Some(key), Some(record)) = (cursor.key(), cursor.record()) else {
                break;
            };
            let seg = Segment::decode(key, record)?;
            debug!("dump: {seg}");
            stats.segments += 1;
            if seg.ext.is_last() {
                stats.objects += 1;
            }
            more = cursor.next()?;
        }
        debug!(
            "dump: {} segment(s) in {} object(s)",
            stats.segments, stats.objects
        );
        Ok(stats)
    }

    /// Checks that the segments of `prefix` partition its address space.
    pub fn verify(&self, prefix: Prefix) -> Result<(), EmapError> {
        let _guard = self.read_lock();
        match check_chain(self, prefix) {
            Err(error @ EmapError::InvariantViolation { .. }) => {
                counter!(VERIFY_FAILURES).increment(1);
                warn!("{error}");
                Err(error)
            }
            result => result.map(|_| ()),
        }
    }

    /// Runs [`verify`](Self::verify) if the configuration asks for it.
    pub(crate) fn verify_if_enabled(&self, prefix: Prefix) -> Result<(), EmapError> {
        if self.config.should_verify() {
            self.verify(prefix)
        } else {
            Ok(())
        }
    }

    pub(crate) fn read_lock(&self) -> RwLockReadGuard<'_, ()> {
        self.lock.read().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn write_lock(&self) -> RwLockWriteGuard<'_, ()> {
        self.lock.write().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn store(&self) -> &dyn OrderedStore {
        self.store.as_ref()
    }

    /// Writes `seg` to the store.  The caller holds the write lock.
    pub(crate) fn write_segment(
        &self,
        tx: &mut Transaction,
        seg: &Segment,
        pack: Pack,
    ) -> Result<(), EmapError> {
        let (key, record) = seg.encode()?;
        self.bump_version(tx);
        trace!("{pack:?} {seg}");
        match pack {
            Pack::Insert => self.store.insert(tx, &key, &record)?,
            Pack::Update => self.store.update(tx, &key, &record)?,
        }
        Ok(())
    }

    /// Deletes the segment of `prefix` that ends at `end`.  The caller holds
    /// the write lock.
    pub(crate) fn delete_segment(
        &self,
        tx: &mut Transaction,
        prefix: Prefix,
        end: u64,
    ) -> Result<(), EmapError> {
        let key = Segment::encode_key(prefix, end)?;
        self.bump_version(tx);
        trace!("Delete {prefix} segment ending at {end:#x}");
        self.store.delete(tx, &key)?;
        Ok(())
    }

    /// Bumps the version for a write in `tx`, and again if `tx` aborts.  The
    /// undo runs after the store's own undo for the write, so cursors that
    /// see the new version also see the restored record.
    fn bump_version(&self, tx: &mut Transaction) {
        self.version.fetch_add(1, Ordering::AcqRel);
        let version = self.version.clone();
        tx.on_abort(move || {
            version.fetch_add(1, Ordering::AcqRel);
        });
    }
}
