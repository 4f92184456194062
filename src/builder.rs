use std::error::Error;
use std::hash::Hash;

use crate::cache::{Cache, CostFn, RemovalListener, RemoveReason};
use crate::loading::{Loaded, LoadingCache};

/// Builder for configuring a [`Cache`].
///
/// # Example
///
/// ```
/// use tinylfu_cache::CacheBuilder;
///
/// let cache = CacheBuilder::new(100_000)
///     .doorkeeper(true)
///     .removal_listener(|key: u64, _value: String, reason| {
///         println!("{key} left: {reason:?}");
///     })
///     .build();
/// cache.insert(1u64, "one".to_string(), 1);
/// ```
pub struct CacheBuilder<K, V> {
	capacity: u64,
	doorkeeper: bool,
	shard_count: Option<usize>,
	cost_fn: Option<CostFn<V>>,
	listener: Option<RemovalListener<K, V>>,
}

impl<K, V> CacheBuilder<K, V>
where
	K: Hash + Eq + Clone + Send + Sync + 'static,
	V: Clone + Send + Sync + 'static,
{
	/// Start a builder for a cache bounded by `capacity` cost units.
	pub fn new(capacity: u64) -> Self {
		Self {
			capacity,
			doorkeeper: false,
			shard_count: None,
			cost_fn: None,
			listener: None,
		}
	}

	/// Gate admission behind a per-shard bloom filter, so keys seen only
	/// once never enter the cache.
	///
	/// Default: off.
	pub fn doorkeeper(mut self, enabled: bool) -> Self {
		self.doorkeeper = enabled;
		self
	}

	/// Override the shard count (rounded up to a power of two).
	///
	/// Default: derived from available parallelism, between 16 and 128.
	pub fn shards(mut self, count: usize) -> Self {
		assert!(count > 0, "shard count must be positive");
		self.shard_count = Some(count);
		self
	}

	/// Cost function consulted when an insert passes cost 0.
	///
	/// Default: every entry costs 1.
	pub fn cost(mut self, f: impl Fn(&V) -> i64 + Send + Sync + 'static) -> Self {
		self.cost_fn = Some(std::sync::Arc::new(f));
		self
	}

	/// Callback invoked with `(key, value, reason)` for every entry leaving
	/// the cache.
	pub fn removal_listener(
		mut self,
		f: impl Fn(K, V, RemoveReason) + Send + Sync + 'static,
	) -> Self {
		self.listener = Some(std::sync::Arc::new(f));
		self
	}

	pub fn build(self) -> Cache<K, V> {
		Cache::with_options(
			self.capacity,
			self.doorkeeper,
			self.shard_count,
			self.cost_fn,
			self.listener,
		)
	}

	/// Build a read-through cache around the configured cache.
	pub fn build_loading(
		self,
		loader: impl Fn(&K) -> Result<Loaded<V>, Box<dyn Error + Send + Sync>>
			+ Send
			+ Sync
			+ 'static,
	) -> LoadingCache<K, V> {
		LoadingCache::new(self.build(), loader)
	}
}
