use std::hash::{BuildHasher, Hash};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::mpsc::{Receiver, RecvTimeoutError, SyncSender, sync_channel};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use ahash::RandomState;
use crossbeam_queue::SegQueue;
use parking_lot::{Mutex, RwLock, RwLockWriteGuard};

use crate::entry::{Entry, EntryPool, Segment};
use crate::shard::Shard;
use crate::timerwheel::{Clock, TimerWheel};
use crate::tlfu::{PolicyStats, ReadBufItem, TinyLfu};

/// Read events batched before a policy drain.
const MAX_READ_BUFF_SIZE: u32 = 64;
/// Bounds on the write-log channel.
const MIN_WRITE_BUFF_SIZE: u64 = 4;
const MAX_WRITE_BUFF_SIZE: u64 = 1024;
/// Cadence of timer-wheel advancement and threshold refresh.
const MAINTENANCE_TICK: Duration = Duration::from_millis(500);

/// Why an entry left the cache, as reported to the removal listener.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RemoveReason {
	/// Removed through the `remove` API.
	Removed,
	/// Displaced by the admission or eviction policy.
	Evicted,
	/// TTL ran out.
	Expired,
}

pub(crate) type CostFn<V> = Arc<dyn Fn(&V) -> i64 + Send + Sync>;
pub(crate) type RemovalListener<K, V> = Arc<dyn Fn(K, V, RemoveReason) + Send + Sync>;

/// Write-log items routed through the maintainer.
enum WriteOp<K, V> {
	New(Arc<Entry<K, V>>),
	Update {
		entry: Arc<Entry<K, V>>,
		cost_change: i64,
		reschedule: bool,
	},
	Remove(Arc<Entry<K, V>>),
	Shutdown,
}

/// Everything guarded by the policy lock: the TinyLFU state, the timer
/// wheel, and the maintainer's bookkeeping flags.
struct PolicyCore<K, V> {
	tlfu: TinyLfu<K, V>,
	wheel: TimerWheel<K, V>,
	tail_update: bool,
	closed: bool,
}

pub(crate) struct CacheInner<K, V> {
	shards: Box<[RwLock<Shard<K, V>>]>,
	policy: Mutex<PolicyCore<K, V>>,
	stats: Arc<PolicyStats>,
	pub(crate) clock: Clock,
	readbuf: SegQueue<ReadBufItem<K, V>>,
	read_counter: AtomicU32,
	writebuf: SyncSender<WriteOp<K, V>>,
	pool: EntryPool<K, V>,
	hasher: RandomState,
	cost_fn: RwLock<CostFn<V>>,
	listener: RwLock<Option<RemovalListener<K, V>>>,
	cap: u64,
	shard_count: usize,
	closed: AtomicBool,
}

/// Bounded, concurrent, in-memory cache with W-TinyLFU admission.
///
/// New keys enter a small per-shard window; overflowing the window feeds the
/// TinyLFU policy, which admits a key to the segmented-LRU main space only
/// when its estimated frequency beats the current victim's. Expirations run
/// on a hierarchical timer wheel. A single background maintainer applies all
/// policy mutations from batched read and write logs, so `get` stays a
/// shard read-lock plus a lock-free log append.
///
/// The cache is `Send + Sync`; share it across threads via `Arc`.
pub struct Cache<K, V> {
	inner: Arc<CacheInner<K, V>>,
	handle: Mutex<Option<JoinHandle<()>>>,
}

impl<K, V> Cache<K, V>
where
	K: Hash + Eq + Clone + Send + Sync + 'static,
	V: Clone + Send + Sync + 'static,
{
	/// Create a cache bounded by `capacity` cost units, with default
	/// configuration. Use [`CacheBuilder`](crate::CacheBuilder) for the
	/// doorkeeper, a cost function or a removal listener.
	pub fn new(capacity: u64) -> Self {
		Self::with_options(capacity, false, None, None, None)
	}

	pub(crate) fn with_options(
		capacity: u64,
		doorkeeper: bool,
		shard_count: Option<usize>,
		cost_fn: Option<CostFn<V>>,
		listener: Option<RemovalListener<K, V>>,
	) -> Self {
		assert!(capacity > 0, "capacity must be positive");
		let shard_count = shard_count
			.map(|n| n.next_power_of_two().max(1))
			.unwrap_or_else(default_shard_count);
		let qsize = capacity / 100 / shard_count as u64;
		let policy_size = capacity - qsize * shard_count as u64;
		let write_bound = (capacity / 100).clamp(MIN_WRITE_BUFF_SIZE, MAX_WRITE_BUFF_SIZE);

		let hasher = RandomState::new();
		let stats = Arc::new(PolicyStats::new());
		let (writebuf, rx) = sync_channel(write_bound as usize);
		let shards = (0..shard_count)
			.map(|_| RwLock::new(Shard::new(qsize, doorkeeper, hasher.clone())))
			.collect::<Vec<_>>()
			.into_boxed_slice();

		let inner = Arc::new(CacheInner {
			shards,
			policy: Mutex::new(PolicyCore {
				tlfu: TinyLfu::new(policy_size, hasher.clone(), stats.clone()),
				wheel: TimerWheel::new(0),
				tail_update: false,
				closed: false,
			}),
			stats,
			clock: Clock::new(),
			readbuf: SegQueue::new(),
			read_counter: AtomicU32::new(0),
			writebuf,
			pool: EntryPool::new(),
			hasher,
			cost_fn: RwLock::new(cost_fn.unwrap_or_else(|| Arc::new(|_| 1))),
			listener: RwLock::new(listener),
			cap: capacity,
			shard_count,
			closed: AtomicBool::new(false),
		});

		let worker = inner.clone();
		let handle = thread::Builder::new()
			.name("tinylfu-maintainer".into())
			.spawn(move || worker.maintain(rx))
			.expect("failed to spawn cache maintainer");

		Self {
			inner,
			handle: Mutex::new(Some(handle)),
		}
	}

	/// Look up `key`, returning a clone of the cached value on a hit.
	///
	/// Expired entries miss even before the maintainer collects them. The
	/// access is recorded in the read log and reaches the policy when the
	/// batch fills.
	pub fn get(&self, key: &K) -> Option<V> {
		self.inner.get(key)
	}

	/// Insert `key` with no TTL. See [`insert_with_ttl`](Self::insert_with_ttl).
	pub fn insert(&self, key: K, value: V, cost: i64) -> bool {
		self.inner.set(key, value, cost, Duration::ZERO)
	}

	/// Insert or update `key`.
	///
	/// A `cost` of 0 delegates to the configured cost function (default 1);
	/// a zero `ttl` means no expiry. Returns `false` when the entry was not
	/// accepted: cost beyond the cache capacity, or a first sighting turned
	/// away by the doorkeeper.
	pub fn insert_with_ttl(&self, key: K, value: V, cost: i64, ttl: Duration) -> bool {
		self.inner.set(key, value, cost, ttl)
	}

	/// Remove `key` if present.
	pub fn remove(&self, key: &K) {
		self.inner.remove(key);
	}

	/// Visit unexpired entries until `f` returns `false`.
	///
	/// Iteration holds one shard read lock at a time; do not call back into
	/// the cache from `f`.
	pub fn range<F: FnMut(&K, &V) -> bool>(&self, f: F) {
		self.inner.range(f);
	}

	/// Number of entries across all shards, including entries still waiting
	/// on policy processing.
	pub fn len(&self) -> usize {
		self.inner.len()
	}

	pub fn is_empty(&self) -> bool {
		self.len() == 0
	}

	pub fn capacity(&self) -> u64 {
		self.inner.cap
	}

	/// Replace the cost function consulted when `insert` is given cost 0.
	pub fn cost(&self, f: impl Fn(&V) -> i64 + Send + Sync + 'static) {
		*self.inner.cost_fn.write() = Arc::new(f);
	}

	/// Register a callback for entries leaving the cache. Invoked outside
	/// the cache's locks, at most once per removal.
	pub fn removal_listener(&self, f: impl Fn(K, V, RemoveReason) + Send + Sync + 'static) {
		*self.inner.listener.write() = Some(Arc::new(f));
	}

	/// Shut the cache down: clear the shards, stop and join the maintainer.
	/// Any operation after `close` returns is undefined (but memory-safe).
	pub fn close(&self) {
		self.inner.close();
		if let Some(handle) = self.handle.lock().take() {
			let _ = handle.join();
		}
	}

	pub(crate) fn inner(&self) -> &CacheInner<K, V> {
		&self.inner
	}
}

impl<K, V> Drop for Cache<K, V> {
	fn drop(&mut self) {
		if !self.inner.closed.load(Ordering::SeqCst) {
			self.inner.close();
		}
		if let Some(handle) = self.handle.lock().take() {
			let _ = handle.join();
		}
	}
}

impl<K, V> CacheInner<K, V>
where
	K: Hash + Eq + Clone + Send + Sync + 'static,
	V: Clone + Send + Sync + 'static,
{
	pub(crate) fn shard_count(&self) -> usize {
		self.shard_count
	}

	/// Key hash plus owning shard index. The hash feeds the sketch and the
	/// doorkeeper; the shard index comes from an extra avalanche round so
	/// shard placement is not correlated with sketch rows.
	pub(crate) fn index(&self, key: &K) -> (u64, usize) {
		let base = self.hasher.hash_one(key);
		let mut h = (base >> 16) ^ base;
		h = h.wrapping_mul(0x45d9f3b);
		h = ((h >> 16) ^ h).wrapping_mul(0x45d9f3b);
		h = (h >> 16) ^ h;
		(base, (h & (self.shard_count as u64 - 1)) as usize)
	}

	fn get(&self, key: &K) -> Option<V> {
		let (hash, idx) = self.index(key);
		let seq = self.read_counter.fetch_add(1, Ordering::AcqRel) + 1;

		let mut hit = None;
		{
			let shard = self.shards[idx].read();
			if let Some(entry) = shard.get(key) {
				let expire = entry.expire.load(Ordering::Relaxed);
				if expire == 0 || expire > self.clock.now_nanos() {
					if let Some(value) = entry.value.read().clone() {
						self.stats.hit.fetch_add(1, Ordering::Relaxed);
						hit = Some((entry.clone(), value));
					}
				}
			}
		}

		let (entry, value) = match hit {
			Some((entry, value)) => (Some(entry), Some(value)),
			None => (None, None),
		};
		if seq < MAX_READ_BUFF_SIZE {
			self.readbuf.push(ReadBufItem { hash, entry });
		} else if seq == MAX_READ_BUFF_SIZE {
			self.readbuf.push(ReadBufItem { hash, entry });
			self.drain_read();
		}
		value
	}

	fn set(&self, key: K, value: V, cost: i64, ttl: Duration) -> bool {
		let cost = if cost == 0 {
			let cost_fn = self.cost_fn.read().clone();
			cost_fn(&value)
		} else {
			cost
		};
		if cost > self.cap as i64 {
			return false;
		}

		let (hash, idx) = self.index(&key);
		let expire = if ttl.is_zero() {
			0
		} else {
			self.clock.expire_nanos(ttl)
		};

		let mut shard = self.shards[idx].write();
		if let Some(exist) = shard.get(&key).cloned() {
			*exist.value.write() = Some(value);
			let old_cost = exist.cost.swap(cost, Ordering::Relaxed);
			let mut cost_change = 0;
			if old_cost != cost {
				cost_change = cost - old_cost;
				if exist.segment() == Segment::Window {
					shard.qlen += cost_change;
				}
			}
			drop(shard);

			let mut reschedule = false;
			if expire > 0 && exist.expire.swap(expire, Ordering::Relaxed) != expire {
				reschedule = true;
			}
			if reschedule || cost_change != 0 {
				let _ = self.writebuf.send(WriteOp::Update {
					entry: exist,
					cost_change,
					reschedule,
				});
			}
			return true;
		}

		{
			let Shard {
				doorkeeper,
				counter,
				..
			} = &mut *shard;
			if let Some(dk) = doorkeeper.as_mut() {
				if *counter > dk.capacity() {
					dk.reset();
					*counter = 0;
				}
				if !dk.insert(hash) {
					*counter += 1;
					return false;
				}
			}
		}

		let entry = self.pool.acquire(key.clone(), value, idx as u16, cost, expire);
		shard.set(key, entry.clone());

		// Too big for the window: hand it to the policy directly.
		if cost > shard.qsize as i64 {
			drop(shard);
			let _ = self.writebuf.send(WriteOp::New(entry));
			return true;
		}

		entry.set_segment(Segment::Window);
		shard.deque.push_front(entry);
		shard.qlen += cost;
		self.process_deque(shard);
		true
	}

	/// Drain the window's overflow from the back: expired entries leave
	/// immediately, entries whose recorded frequency clears the published
	/// threshold (or was never sampled) go to the policy, the rest are
	/// dropped as evicted.
	fn process_deque(&self, mut shard: RwLockWriteGuard<'_, Shard<K, V>>) {
		if shard.qlen <= shard.qsize as i64 {
			return;
		}
		let mut send = Vec::new();
		let mut pending = Vec::new();
		let now = self.clock.now_nanos();

		while shard.qlen > shard.qsize as i64 {
			let Some(evicted) = shard.deque.pop_back() else {
				break;
			};
			evicted.set_segment(Segment::Outside);
			shard.qlen -= evicted.cost.load(Ordering::Relaxed);

			let expire = evicted.expire.load(Ordering::Relaxed);
			if expire != 0 && expire <= now {
				// The remove API may have taken it out of the map already.
				if shard.delete(&evicted) {
					if let Some((k, v)) = evicted.kv() {
						pending.push((k, v, RemoveReason::Expired));
					}
					self.pool.release(evicted);
				}
			} else {
				let freq = evicted.frequency.load(Ordering::Relaxed);
				let threshold = self.stats.threshold.load(Ordering::Relaxed);
				if freq == -1 || freq >= threshold {
					send.push(evicted);
				} else if shard.delete(&evicted) {
					if let Some((k, v)) = evicted.kv() {
						pending.push((k, v, RemoveReason::Evicted));
					}
					self.pool.release(evicted);
				}
			}
		}
		drop(shard);

		for entry in send {
			let _ = self.writebuf.send(WriteOp::New(entry));
		}
		self.notify(pending);
	}

	fn remove(&self, key: &K) {
		let (_, idx) = self.index(key);
		let entry = {
			let mut shard = self.shards[idx].write();
			let entry = shard.get(key).cloned();
			if let Some(ref e) = entry {
				shard.delete(e);
			}
			entry
		};
		if let Some(entry) = entry {
			let _ = self.writebuf.send(WriteOp::Remove(entry));
		}
	}

	fn range<F: FnMut(&K, &V) -> bool>(&self, mut f: F) {
		let now = self.clock.now_nanos();
		for shard in self.shards.iter() {
			let guard = shard.read();
			for entry in guard.map.values() {
				let expire = entry.expire.load(Ordering::Relaxed);
				if expire != 0 && expire <= now {
					continue;
				}
				if let Some(value) = entry.value.read().as_ref() {
					if !f(&entry.key, value) {
						return;
					}
				}
			}
		}
	}

	fn len(&self) -> usize {
		self.shards.iter().map(|s| s.read().len()).sum()
	}

	/// Flush the read log into the policy.
	fn drain_read(&self) {
		self.stats.total.fetch_add(MAX_READ_BUFF_SIZE, Ordering::Relaxed);
		{
			let mut core = self.policy.lock();
			while let Some(item) = self.readbuf.pop() {
				core.tlfu.access(item);
			}
		}
		self.read_counter.store(0, Ordering::Release);
	}

	/// Maintainer loop: consume the write log, and every tick advance the
	/// timer wheel and refresh the admission threshold.
	fn maintain(&self, rx: Receiver<WriteOp<K, V>>) {
		let mut last_tick = Instant::now();
		loop {
			if last_tick.elapsed() >= MAINTENANCE_TICK {
				self.tick();
				last_tick = Instant::now();
			}
			let timeout = MAINTENANCE_TICK.saturating_sub(last_tick.elapsed());
			match rx.recv_timeout(timeout) {
				Ok(WriteOp::Shutdown) => break,
				Ok(op) => self.handle_write(op),
				Err(RecvTimeoutError::Timeout) => {}
				Err(RecvTimeoutError::Disconnected) => break,
			}
		}
	}

	fn tick(&self) {
		let mut pending = Vec::new();
		{
			let mut core = self.policy.lock();
			if core.closed {
				return;
			}
			let now = self.clock.now_nanos();
			for entry in core.wheel.advance(now) {
				self.remove_entry(&mut core, entry, RemoveReason::Expired, &mut pending);
			}
			core.tlfu.update_threshold();
		}
		self.notify(pending);
	}

	fn handle_write(&self, op: WriteOp<K, V>) {
		let mut pending = Vec::new();
		{
			let mut core = self.policy.lock();
			match op {
				WriteOp::New(entry) => {
					if !entry.removed.load(Ordering::Relaxed) {
						if entry.expire.load(Ordering::Relaxed) != 0 {
							core.wheel.schedule(&entry);
						}
						if let Some(loser) = core.tlfu.set(&entry) {
							self.remove_entry(
								&mut core,
								loser,
								RemoveReason::Evicted,
								&mut pending,
							);
							core.tail_update = true;
						}
						for entry in core.tlfu.evict_entries() {
							core.tail_update = true;
							self.remove_entry(
								&mut core,
								entry,
								RemoveReason::Evicted,
								&mut pending,
							);
						}
					}
				}
				WriteOp::Remove(entry) => {
					entry.removed.store(true, Ordering::Relaxed);
					self.remove_entry(&mut core, entry, RemoveReason::Removed, &mut pending);
					// Recompute the threshold below rather than pausing
					// admission outright.
					core.tail_update = true;
				}
				WriteOp::Update {
					entry,
					cost_change,
					reschedule,
				} => {
					if reschedule {
						core.wheel.schedule(&entry);
					}
					if cost_change != 0 {
						core.tlfu.update_cost(&entry, cost_change);
						for entry in core.tlfu.evict_entries() {
							core.tail_update = true;
							self.remove_entry(
								&mut core,
								entry,
								RemoveReason::Evicted,
								&mut pending,
							);
						}
					}
				}
				WriteOp::Shutdown => {}
			}
			if core.tail_update {
				core.tlfu.update_threshold();
				core.tail_update = false;
			}
		}
		self.notify(pending);
	}

	/// Detach `entry` from the policy, the wheel and (for evictions and
	/// expirations) its shard map, queueing the listener notification.
	fn remove_entry(
		&self,
		core: &mut PolicyCore<K, V>,
		entry: Arc<Entry<K, V>>,
		reason: RemoveReason,
		pending: &mut Vec<(K, V, RemoveReason)>,
	) {
		if entry.segment().in_main() {
			core.tlfu.remove(&entry);
		}
		core.wheel.deschedule(&entry);
		match reason {
			RemoveReason::Evicted | RemoveReason::Expired => {
				let deleted = self.shards[entry.shard as usize].write().delete(&entry);
				if deleted {
					if let Some((k, v)) = entry.kv() {
						pending.push((k, v, reason));
					}
					self.pool.release(entry);
				}
			}
			// Already out of the shard map; snapshot under the shard lock.
			RemoveReason::Removed => {
				let kv = {
					let _shard = self.shards[entry.shard as usize].read();
					entry.kv()
				};
				if let Some((k, v)) = kv {
					pending.push((k, v, reason));
				}
			}
		}
	}

	/// Fire queued removal notifications. Called with no locks held.
	fn notify(&self, pending: Vec<(K, V, RemoveReason)>) {
		if pending.is_empty() {
			return;
		}
		let listener = self.listener.read().clone();
		if let Some(listener) = listener {
			for (key, value, reason) in pending {
				listener(key, value, reason);
			}
		}
	}
}

// Shutdown needs no `K`/`V` bounds, so `Drop` can reach it for any
// instantiation.
impl<K, V> CacheInner<K, V> {
	fn close(&self) {
		if self.closed.swap(true, Ordering::SeqCst) {
			return;
		}
		for shard in self.shards.iter() {
			shard.write().map.clear();
		}
		self.policy.lock().closed = true;
		let _ = self.writebuf.send(WriteOp::Shutdown);
	}
}

fn default_shard_count() -> usize {
	let cores = thread::available_parallelism().map(|n| n.get()).unwrap_or(1);
	(cores * 2).next_power_of_two().clamp(16, 128)
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn insert_then_get() {
		let cache = Cache::new(1000);
		assert!(cache.insert(1u64, "one".to_string(), 1));
		assert_eq!(cache.get(&1), Some("one".to_string()));
		assert_eq!(cache.get(&2), None);
	}

	#[test]
	fn remove_makes_key_miss() {
		let cache = Cache::new(1000);
		cache.insert(1u64, "one".to_string(), 1);
		cache.remove(&1);
		assert_eq!(cache.get(&1), None);
	}

	#[test]
	fn update_replaces_value_without_growing() {
		let cache = Cache::new(1000);
		cache.insert(1u64, "one".to_string(), 1);
		cache.insert(1u64, "uno".to_string(), 10);
		assert_eq!(cache.get(&1), Some("uno".to_string()));
		assert_eq!(cache.len(), 1);
	}

	#[test]
	fn oversized_cost_is_refused() {
		let cache = Cache::new(100);
		assert!(!cache.insert(1u64, "big".to_string(), 101));
		assert_eq!(cache.len(), 0);
		assert_eq!(cache.get(&1), None);
	}

	#[test]
	fn zero_cost_uses_cost_function() {
		let cache = Cache::new(1000);
		cache.cost(|v: &String| v.len() as i64);
		assert!(cache.insert(1u64, "12345".to_string(), 0));
		// A value costed beyond capacity by the function is refused too.
		assert!(!cache.insert(2u64, "x".repeat(2000), 0));
	}

	#[test]
	fn doorkeeper_rejects_first_sighting() {
		let cache: Cache<u64, String> =
			Cache::with_options(10_000, true, None, None, None);
		assert!(!cache.insert(1, "v".to_string(), 1));
		assert_eq!(cache.get(&1), None);
		assert!(cache.insert(1, "v".to_string(), 1));
		assert_eq!(cache.get(&1), Some("v".to_string()));
	}

	#[test]
	fn expired_entry_misses_before_collection() {
		let cache = Cache::new(1000);
		cache.insert_with_ttl(1u64, "v".to_string(), 1, Duration::from_millis(10));
		assert_eq!(cache.get(&1), Some("v".to_string()));

		cache.inner().clock.advance(Duration::from_secs(1));
		assert_eq!(cache.get(&1), None);
	}

	#[test]
	fn range_skips_expired_and_honours_stop() {
		let cache = Cache::new(1000);
		for i in 0..10u64 {
			cache.insert(i, i.to_string(), 1);
		}
		cache.insert_with_ttl(99u64, "ttl".to_string(), 1, Duration::from_millis(5));
		cache.inner().clock.advance(Duration::from_secs(1));

		let mut seen = Vec::new();
		cache.range(|k, _| {
			seen.push(*k);
			true
		});
		assert_eq!(seen.len(), 10);
		assert!(!seen.contains(&99));

		let mut count = 0;
		cache.range(|_, _| {
			count += 1;
			count < 3
		});
		assert_eq!(count, 3);
	}

	#[test]
	fn len_sums_shards() {
		let cache = Cache::new(10_000);
		for i in 0..50u64 {
			cache.insert(i, i.to_string(), 1);
		}
		assert_eq!(cache.len(), 50);
		assert!(!cache.is_empty());
	}

	#[test]
	fn close_is_idempotent_through_drop() {
		let cache = Cache::new(1000);
		cache.insert(1u64, "one".to_string(), 1);
		cache.close();
		// Drop will try to close again; both paths must be safe.
	}

	#[test]
	fn shard_index_stays_in_range() {
		let cache: Cache<u64, String> = Cache::new(1000);
		for i in 0..1000u64 {
			let (_, idx) = cache.inner().index(&i);
			assert!(idx < cache.inner().shard_count);
		}
	}
}
