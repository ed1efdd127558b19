//! # shardgc
//!
//! A non-tracing garbage collector built on sharded, eventually-consistent reference counts.
//!
//! Every tracked object carries a small array of atomic counters. A thread adjusts only the
//! counter its identity maps to, so copying and dropping handles across many threads never
//! contends on a single hot atomic. Nothing is freed when the last handle goes away; instead a
//! periodic `Collector::collect()` pass sums each object's counters twice and frees the object
//! only if both sums agree on zero.
//!
//! Reference cycles are never reclaimed.
//!
//! ## Usage
//!
//! ```
//! use std::sync::Arc;
//! use shardgc::Collector;
//!
//! let collector = Arc::new(Collector::new());
//! collector.register_thread();
//!
//! let handle = collector.create(String::from("hello"));
//! let copy = handle.clone();
//! assert_eq!(*copy, "hello");
//!
//! drop(handle);
//! drop(copy);
//!
//! assert_eq!(collector.drain(16).unwrap(), 1);
//! assert_eq!(collector.count(), 0);
//! ```


mod collector;
mod collectorthread;
mod constants;
mod error;
mod gcbox;
mod handle;
mod identity;
mod refcount;
mod statistics;


pub use collector::{CollectReport, Collector};
pub use collectorthread::CollectorThread;
pub use constants::*;
pub use error::CollectorError;
pub use gcbox::{GcBox, Tracked};
pub use handle::GcRef;
pub use identity::{current_identity, IdentityAllocator};
pub use refcount::{ShardedRefCount, Snapshot};
pub use statistics::{DefaultLogger, StatsLogger};
