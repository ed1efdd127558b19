//! Numerous constants used as parameters to GC behavior


// Number of counter shards per tracked object
pub const REFCOUNT_SLOTS: usize = 8;

// Cache line in bytes
pub const CACHE_LINE: usize = 64;

// Collector thread parameters
pub const COLLECT_INTERVAL_MS: u64 = 1000;

// Passes tried when draining at shutdown or on Collector drop
pub const DRAIN_PASSES: usize = 64;
// sleep between drain passes that made no progress, milliseconds
pub const DRAIN_BACKOFF_MS: u64 = 1;
