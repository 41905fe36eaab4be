//! Storage metrics.
//!
//! The constants defined in this module are the names of metrics that the
//! stores maintain via [`metrics`] crate interfaces.
use ::metrics::{describe_counter, Unit};

/// Total number of records inserted.
pub const INSERTS: &str = "emap_store.inserts";

/// Total number of records updated in place.
pub const UPDATES: &str = "emap_store.updates";

/// Total number of records deleted.
pub const DELETES: &str = "emap_store.deletes";

/// Total number of writes that failed.
pub const WRITES_FAILED: &str = "emap_store.writes_failed";

/// Total number of key and record bytes written.
pub const BYTES_WRITTEN: &str = "emap_store.bytes_written";

/// Total number of trees created.
pub const TREES_CREATED: &str = "emap_store.trees_created";

/// Total number of trees destroyed.
pub const TREES_DESTROYED: &str = "emap_store.trees_destroyed";

/// Total number of committed transactions.
pub const TX_COMMITS: &str = "emap_store.tx_commits";

/// Total number of aborted transactions.
pub const TX_ABORTS: &str = "emap_store.tx_aborts";

/// Adds descriptions for the metrics we expose.
pub(crate) fn describe_store_metrics() {
    describe_counter!(INSERTS, "total number of records inserted");
    describe_counter!(UPDATES, "total number of records updated");
    describe_counter!(DELETES, "total number of records deleted");
    describe_counter!(WRITES_FAILED, "total number of failed writes");
    describe_counter!(
        BYTES_WRITTEN,
        Unit::Bytes,
        "total number of key and record bytes written"
    );
    describe_counter!(TREES_CREATED, "total number of trees created");
    describe_counter!(TREES_DESTROYED, "total number of trees destroyed");
    describe_counter!(TX_COMMITS, "total number of committed transactions");
    describe_counter!(TX_ABORTS, "total number of aborted transactions");
}
