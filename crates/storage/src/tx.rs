//! Transactions and credits.
//!
//! Every write against an [`OrderedStore`](crate::OrderedStore) happens inside
//! a [`Transaction`].  A transaction is opened with a [`Credit`], an upper
//! bound on the work it may do, that the caller computes before starting.
//! Each write charges the transaction; a write that would go over the
//! reservation fails with [`StorageError::CreditExhausted`] instead of being
//! applied.
//!
//! Writes are applied to the store immediately.  The transaction remembers how
//! to reverse each of them, so that [`Transaction::abort`] (or dropping an
//! uncommitted transaction) puts the store back the way it was.
use std::fmt::{self, Display};
use std::ops::{Add, AddAssign};
use std::sync::atomic::{AtomicU64, Ordering};

use metrics::counter;
use serde::Serialize;
use tracing::{debug, trace};

use crate::error::StorageError;
use crate::metrics::{TX_ABORTS, TX_COMMITS};

/// A resource estimate for a transaction.
///
/// Counts are numbers of operations, `bytes` bounds the total size of keys
/// and records written.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct Credit {
    pub inserts: u64,
    pub updates: u64,
    pub deletes: u64,
    pub trees_created: u64,
    pub trees_destroyed: u64,
    pub bytes: u64,
}

impl Credit {
    /// `nr` inserts of at most `size` bytes each.
    pub fn insert(nr: u64, size: u64) -> Self {
        Self {
            inserts: nr,
            bytes: nr.saturating_mul(size),
            ..Self::default()
        }
    }

    /// `nr` updates of at most `size` bytes each.
    pub fn update(nr: u64, size: u64) -> Self {
        Self {
            updates: nr,
            bytes: nr.saturating_mul(size),
            ..Self::default()
        }
    }

    /// `nr` deletes of records of at most `size` bytes each.
    pub fn delete(nr: u64, size: u64) -> Self {
        Self {
            deletes: nr,
            bytes: nr.saturating_mul(size),
            ..Self::default()
        }
    }

    pub fn create_tree(nr: u64) -> Self {
        Self {
            trees_created: nr,
            ..Self::default()
        }
    }

    pub fn destroy_tree(nr: u64) -> Self {
        Self {
            trees_destroyed: nr,
            ..Self::default()
        }
    }

    /// Returns `n` copies of this credit added together.
    pub fn times(self, n: u64) -> Self {
        Self {
            inserts: self.inserts.saturating_mul(n),
            updates: self.updates.saturating_mul(n),
            deletes: self.deletes.saturating_mul(n),
            trees_created: self.trees_created.saturating_mul(n),
            trees_destroyed: self.trees_destroyed.saturating_mul(n),
            bytes: self.bytes.saturating_mul(n),
        }
    }

    /// Returns true if this credit is at least `other` in every dimension.
    pub fn covers(&self, other: &Credit) -> bool {
        self.inserts >= other.inserts
            && self.updates >= other.updates
            && self.deletes >= other.deletes
            && self.trees_created >= other.trees_created
            && self.trees_destroyed >= other.trees_destroyed
            && self.bytes >= other.bytes
    }

    fn saturating_sub(self, rhs: Self) -> Self {
        Self {
            inserts: self.inserts.saturating_sub(rhs.inserts),
            updates: self.updates.saturating_sub(rhs.updates),
            deletes: self.deletes.saturating_sub(rhs.deletes),
            trees_created: self.trees_created.saturating_sub(rhs.trees_created),
            trees_destroyed: self.trees_destroyed.saturating_sub(rhs.trees_destroyed),
            bytes: self.bytes.saturating_sub(rhs.bytes),
        }
    }
}

impl Add for Credit {
    type Output = Self;

    fn add(self, rhs: Self) -> Self {
        Self {
            inserts: self.inserts.saturating_add(rhs.inserts),
            updates: self.updates.saturating_add(rhs.updates),
            deletes: self.deletes.saturating_add(rhs.deletes),
            trees_created: self.trees_created.saturating_add(rhs.trees_created),
            trees_destroyed: self.trees_destroyed.saturating_add(rhs.trees_destroyed),
            bytes: self.bytes.saturating_add(rhs.bytes),
        }
    }
}

impl AddAssign for Credit {
    fn add_assign(&mut self, rhs: Self) {
        *self = *self + rhs;
    }
}

impl Display for Credit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}i/{}u/{}d/{}c/{}x/{}B",
            self.inserts,
            self.updates,
            self.deletes,
            self.trees_created,
            self.trees_destroyed,
            self.bytes
        )
    }
}

type UndoFn = Box<dyn FnOnce() + Send>;

static NEXT_TX_ID: AtomicU64 = AtomicU64::new(1);

/// An open transaction.
pub struct Transaction {
    id: u64,
    reserved: Credit,
    used: Credit,
    undo: Vec<UndoFn>,
    open: bool,
}

impl Transaction {
    /// Opens a transaction that may do at most `reserved` work.
    pub fn new(reserved: Credit) -> Self {
        let id = NEXT_TX_ID.fetch_add(1, Ordering::Relaxed);
        debug!("tx {id}: open with credit {reserved}");
        Self {
            id,
            reserved,
            used: Credit::default(),
            undo: Vec::new(),
            open: true,
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn reserved(&self) -> Credit {
        self.reserved
    }

    pub fn used(&self) -> Credit {
        self.used
    }

    /// Credit still available to this transaction.
    pub fn remaining(&self) -> Credit {
        self.reserved.saturating_sub(self.used)
    }

    /// Charges `charge` against the reservation.  On failure nothing is
    /// charged.
    pub fn charge(&mut self, charge: Credit) -> Result<(), StorageError> {
        if !self.open {
            return Err(StorageError::TransactionClosed);
        }
        let used = self.used + charge;
        if !self.reserved.covers(&used) {
            return Err(StorageError::CreditExhausted {
                requested: charge,
                remaining: self.remaining(),
            });
        }
        self.used = used;
        Ok(())
    }

    /// Registers `undo` to run if the transaction aborts.  Undo actions run
    /// in reverse order of registration.
    pub fn on_abort(&mut self, undo: impl FnOnce() + Send + 'static) {
        self.undo.push(Box::new(undo));
    }

    /// Makes every write done so far permanent.
    pub fn commit(mut self) {
        self.open = false;
        self.undo.clear();
        counter!(TX_COMMITS).increment(1);
        debug!("tx {}: commit, used {}", self.id, self.used);
    }

    /// Reverts every write done so far.
    pub fn abort(mut self) {
        self.rollback();
    }

    fn rollback(&mut self) {
        self.open = false;
        let n = self.undo.len();
        while let Some(undo) = self.undo.pop() {
            undo();
        }
        counter!(TX_ABORTS).increment(1);
        trace!("tx {}: reverted {n} write(s)", self.id);
        debug!("tx {}: abort", self.id);
    }
}

impl Drop for Transaction {
    fn drop(&mut self) {
        if self.open {
            self.rollback();
        }
    }
}

impl fmt::Debug for Transaction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Transaction")
            .field("id", &self.id)
            .field("reserved", &self.reserved)
            .field("used", &self.used)
            .field("pending_undo", &self.undo.len())
            .field("open", &self.open)
            .finish()
    }
}
