//! Extent map metrics.
//!
//! The constants defined in this module are the names of metrics that extent
//! maps maintain via [`metrics`] crate interfaces.
use ::metrics::describe_counter;

/// Total number of lookups.
pub const LOOKUPS: &str = "emap.lookups";

/// Total number of pastes.
pub const PASTES: &str = "emap.pastes";

/// Total number of segment splits, including those done by pastes.
pub const SPLITS: &str = "emap.splits";

/// Total number of merges.
pub const MERGES: &str = "emap.merges";

/// Total number of times a cursor found the map changed and re-located.
pub const STALE_CURSORS: &str = "emap.stale_cursors";

/// Total number of failed chain checks.
pub const VERIFY_FAILURES: &str = "emap.verify_failures";

/// Adds descriptions for the metrics we expose.
pub(crate) fn describe_emap_metrics() {
    describe_counter!(LOOKUPS, "total number of extent map lookups");
    describe_counter!(PASTES, "total number of extent pastes");
    describe_counter!(SPLITS, "total number of segment splits");
    describe_counter!(MERGES, "total number of segment merges");
    describe_counter!(
        STALE_CURSORS,
        "total number of cursors re-located after a concurrent change"
    );
    describe_counter!(VERIFY_FAILURES, "total number of failed chain checks");
}
