//! Half-open byte ranges.

use std::fmt::{self, Display};

use crate::EXTENT_END;

/// The byte range `[start, end)`.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct Extent {
    pub start: u64,
    pub end: u64,
}

impl Extent {
    pub const fn new(start: u64, end: u64) -> Self {
        Self { start, end }
    }

    /// The whole address space of an object, `[0, EXTENT_END)`.
    pub const fn whole() -> Self {
        Self::new(0, EXTENT_END)
    }

    /// Number of bytes covered.  Zero for an inverted extent.
    pub fn len(&self) -> u64 {
        self.end.saturating_sub(self.start)
    }

    pub fn is_empty(&self) -> bool {
        self.end <= self.start
    }

    pub fn is_valid(&self) -> bool {
        self.start <= self.end
    }

    pub fn contains(&self, offset: u64) -> bool {
        self.start <= offset && offset < self.end
    }

    /// The bytes in both `self` and `other`.  Empty (possibly inverted) if
    /// they do not overlap.
    pub fn intersection(&self, other: &Extent) -> Extent {
        Extent::new(self.start.max(other.start), self.end.min(other.end))
    }

    /// True for the first segment of an object.
    pub fn is_first(&self) -> bool {
        self.start == 0
    }

    /// True for the last segment of an object.
    pub fn is_last(&self) -> bool {
        self.end == EXTENT_END
    }
}

impl Display for Extent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{:#x}, {:#x})", self.start, self.end)
    }
}
