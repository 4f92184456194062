use std::collections::HashMap;
use std::error::Error;
use std::hash::Hash;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Condvar, Mutex};

use crate::cache::Cache;

/// Error surfaced from a loader, shared verbatim with every coalesced caller.
pub type LoadError = Arc<dyn Error + Send + Sync + 'static>;

/// What a loader hands back on success.
pub struct Loaded<V> {
	pub value: V,
	/// Passed through to `insert`; 0 delegates to the cost function.
	pub cost: i64,
	/// Zero means no expiry.
	pub ttl: Duration,
}

type LoaderFn<K, V> =
	Arc<dyn Fn(&K) -> Result<Loaded<V>, Box<dyn Error + Send + Sync>> + Send + Sync>;

/// One in-flight load; waiters block on the condvar until the leader
/// publishes the shared result.
struct Flight<V> {
	result: Mutex<Option<Result<V, LoadError>>>,
	done: Condvar,
}

impl<V> Flight<V> {
	fn new() -> Self {
		Self {
			result: Mutex::new(None),
			done: Condvar::new(),
		}
	}
}

/// Read-through cache: misses invoke the loader, with concurrent misses for
/// the same key coalesced into a single loader call per shard-local group.
///
/// A successful load is inserted into the cache; the loader's error (or
/// value) is observed by every caller that joined the flight.
pub struct LoadingCache<K, V> {
	cache: Cache<K, V>,
	loader: LoaderFn<K, V>,
	groups: Box<[Mutex<HashMap<K, Arc<Flight<V>>>>]>,
}

impl<K, V> LoadingCache<K, V>
where
	K: Hash + Eq + Clone + Send + Sync + 'static,
	V: Clone + Send + Sync + 'static,
{
	pub fn new(
		cache: Cache<K, V>,
		loader: impl Fn(&K) -> Result<Loaded<V>, Box<dyn Error + Send + Sync>>
			+ Send
			+ Sync
			+ 'static,
	) -> Self {
		let groups = (0..cache.inner().shard_count())
			.map(|_| Mutex::new(HashMap::new()))
			.collect::<Vec<_>>()
			.into_boxed_slice();
		Self {
			cache,
			loader: Arc::new(loader),
			groups,
		}
	}

	/// The underlying cache, for writes and maintenance operations.
	pub fn cache(&self) -> &Cache<K, V> {
		&self.cache
	}

	/// Cached value on a hit; otherwise load through the singleflight group.
	pub fn get(&self, key: &K) -> Result<V, LoadError> {
		if let Some(value) = self.cache.get(key) {
			return Ok(value);
		}

		let (_, idx) = self.cache.inner().index(key);
		let (flight, leader) = {
			let mut group = self.groups[idx].lock();
			match group.get(key) {
				Some(flight) => (flight.clone(), false),
				None => {
					let flight = Arc::new(Flight::new());
					group.insert(key.clone(), flight.clone());
					(flight, true)
				}
			}
		};

		if leader {
			let outcome: Result<V, LoadError> = match (self.loader)(key) {
				Ok(loaded) => {
					self.cache
						.insert_with_ttl(key.clone(), loaded.value.clone(), loaded.cost, loaded.ttl);
					Ok(loaded.value)
				}
				Err(err) => Err(LoadError::from(err)),
			};
			{
				let mut result = flight.result.lock();
				*result = Some(outcome.clone());
			}
			flight.done.notify_all();
			self.groups[idx].lock().remove(key);
			outcome
		} else {
			let mut result = flight.result.lock();
			while result.is_none() {
				flight.done.wait(&mut result);
			}
			result.clone().expect("flight result published before wakeup")
		}
	}
}
