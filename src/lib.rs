//! # TinyLFU Cache
//!
//! A bounded, concurrent, in-memory key-value cache combining:
//! - **W-TinyLFU admission**: new keys must beat the eviction victim's
//!   estimated frequency to enter the main space
//! - **Segmented LRU** main space (probation + protected) for scan-resistant
//!   eviction
//! - A per-shard **admission window** soaking up insertion bursts
//! - An optional **doorkeeper** bloom filter suppressing one-hit wonders
//! - A hierarchical **timer wheel** for TTL expiration
//! - **Read-optimized concurrency**: sharded maps, batched read/write logs,
//!   and a single background maintainer applying all policy decisions
//!
//! ## Quick Start
//!
//! ```rust
//! use tinylfu_cache::Cache;
//!
//! let cache = Cache::new(10_000);
//!
//! cache.insert("user:1", String::from("alice"), 1);
//! assert_eq!(cache.get(&"user:1"), Some(String::from("alice")));
//!
//! cache.remove(&"user:1");
//! assert_eq!(cache.get(&"user:1"), None);
//! ```
//!
//! ## TTL and listeners
//!
//! ```rust
//! use std::time::Duration;
//! use tinylfu_cache::{CacheBuilder, RemoveReason};
//!
//! let cache = CacheBuilder::new(10_000)
//!     .removal_listener(|key: u64, _value: String, reason| {
//!         assert!(matches!(
//!             reason,
//!             RemoveReason::Removed | RemoveReason::Evicted | RemoveReason::Expired
//!         ));
//!         let _ = key;
//!     })
//!     .build();
//!
//! cache.insert_with_ttl(1, "transient".to_string(), 1, Duration::from_secs(30));
//! ```
//!
//! ## Read-through loading
//!
//! Concurrent misses for the same key are coalesced into a single loader
//! invocation; all callers observe the one result or error:
//!
//! ```rust
//! use std::time::Duration;
//! use tinylfu_cache::{CacheBuilder, Loaded};
//!
//! let cache = CacheBuilder::new(10_000).build_loading(|key: &u64| {
//!     Ok(Loaded {
//!         value: format!("row-{key}"),
//!         cost: 1,
//!         ttl: Duration::ZERO,
//!     })
//! });
//! assert_eq!(cache.get(&7).unwrap(), "row-7");
//! ```
//!
//! ## Thread safety
//!
//! The cache is `Send + Sync`; share it across threads via `Arc`. Reads take
//! a shard read lock and append to a lock-free log; all policy maintenance
//! (admission, eviction, expiration) happens on one background thread, so
//! hot paths never contend on policy state.
//!
//! Capacity is enforced eventually: between maintenance batches the cache
//! may briefly overshoot by the cost sitting in its write log.

mod builder;
mod cache;
mod doorkeeper;
mod entry;
mod list;
mod loading;
mod shard;
mod sketch;
mod slru;
mod timerwheel;
mod tlfu;

pub use builder::CacheBuilder;
pub use cache::{Cache, RemoveReason};
pub use loading::{LoadError, Loaded, LoadingCache};
