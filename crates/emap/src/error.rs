use emap_storage::error::StorageError;
use serde::Serialize;
use std::fmt::{self, Display};
use std::io::ErrorKind;
use thiserror::Error;

use crate::Prefix;

/// Which end of an object's chain of segments a cursor ran into.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub enum Boundary {
    Start,
    End,
}

impl Display for Boundary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Boundary::Start => write!(f, "first"),
            Boundary::End => write!(f, "last"),
        }
    }
}

/// An error that can occur when using an extent map.
#[derive(Clone, Error, Debug, Serialize)]
pub enum EmapError {
    /// There is no segment of `prefix` at `offset`, usually because the
    /// object has no segments at all.
    #[error("No segment of {prefix} contains offset {offset:#x}.")]
    NotFound {
        #[serde(serialize_with = "serialize_prefix")]
        prefix: Prefix,
        offset: u64,
    },

    /// Tried to step past the first or last segment.
    #[error("Cursor is already on the {0} segment.")]
    AtBoundary(Boundary),

    /// A key or record read from the store failed validation.
    #[error("Corrupt extent map record: {0}")]
    CorruptRecord(String),

    /// The segments of `prefix` do not partition its address space.
    #[error("Extent map of {prefix} is inconsistent: {detail}")]
    InvariantViolation {
        #[serde(serialize_with = "serialize_prefix")]
        prefix: Prefix,
        detail: String,
    },

    /// A buffer of the given size could not be allocated.
    #[error("Could not allocate {0} bytes.")]
    ResourceExhaustion(usize),

    /// An argument violated an operation's precondition.
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// The ordered store failed.
    #[error(transparent)]
    Storage(#[from] StorageError),
}

fn serialize_prefix<S>(prefix: &Prefix, serializer: S) -> Result<S::Ok, S::Error>
where
    S: serde::Serializer,
{
    serializer.collect_str(prefix)
}

impl EmapError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            EmapError::NotFound { .. } => ErrorKind::NotFound,
            EmapError::AtBoundary(_) => ErrorKind::InvalidInput,
            EmapError::CorruptRecord(_) => ErrorKind::InvalidData,
            EmapError::InvariantViolation { .. } => ErrorKind::InvalidData,
            EmapError::ResourceExhaustion(_) => ErrorKind::OutOfMemory,
            EmapError::InvalidArgument(_) => ErrorKind::InvalidInput,
            EmapError::Storage(error) => error.kind(),
        }
    }

    pub(crate) fn corrupt(detail: impl Into<String>) -> Self {
        EmapError::CorruptRecord(detail.into())
    }

    pub(crate) fn invalid(detail: impl Into<String>) -> Self {
        EmapError::InvalidArgument(detail.into())
    }
}
