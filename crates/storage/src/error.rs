use serde::Serialize;
use std::io::ErrorKind;
use thiserror::Error;

use crate::tx::Credit;
use crate::TreeId;

/// An error that can occur when using an ordered store.
#[derive(Clone, Error, Debug, Serialize)]
pub enum StorageError {
    /// An insert found a record with an equal key already present.
    #[error("Tree {tree} already holds a record with this key.")]
    KeyExists { tree: TreeId },

    /// An update or delete named a key that is not present.
    #[error("Tree {tree} holds no record with this key.")]
    KeyNotFound { tree: TreeId },

    /// No tree with the given identifier exists in the backend.
    #[error("Tree {0} does not exist.")]
    TreeNotFound(TreeId),

    /// A tree can only be destroyed once its last record is gone.
    #[error("Tree {tree} still holds {records} record(s) and cannot be destroyed.")]
    TreeNotEmpty { tree: TreeId, records: usize },

    /// The transaction tried to use more than it reserved up front.
    #[error("Transaction credit exhausted: requested {requested} with {remaining} remaining.")]
    CreditExhausted { requested: Credit, remaining: Credit },

    /// The transaction already committed or aborted.
    #[error("Transaction is no longer open.")]
    TransactionClosed,

    /// A write failed because a test asked for it to.
    #[error("Injected write failure on tree {0}.")]
    InjectedFault(TreeId),
}

impl StorageError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            StorageError::KeyExists { .. } => ErrorKind::AlreadyExists,
            StorageError::KeyNotFound { .. } => ErrorKind::NotFound,
            StorageError::TreeNotFound(_) => ErrorKind::NotFound,
            StorageError::TreeNotEmpty { .. } => ErrorKind::DirectoryNotEmpty,
            StorageError::CreditExhausted { .. } => ErrorKind::QuotaExceeded,
            StorageError::TransactionClosed => ErrorKind::Other,
            StorageError::InjectedFault(_) => ErrorKind::Other,
        }
    }
}
