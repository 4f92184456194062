use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicI32, AtomicI64, AtomicU8, AtomicU64, Ordering};

use crossbeam_queue::SegQueue;
use parking_lot::{Mutex, RwLock};

/// Structure an entry currently belongs to.
///
/// `Window` means the entry sits in its shard's admission deque;
/// `Probation`/`Protected` mean it is linked into the corresponding SLRU
/// list. `Outside` covers freshly created entries and entries in flight
/// between structures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub(crate) enum Segment {
	Outside = 0,
	Window = 1,
	Probation = 2,
	Protected = 3,
}

impl Segment {
	fn from_u8(val: u8) -> Self {
		match val {
			1 => Segment::Window,
			2 => Segment::Probation,
			3 => Segment::Protected,
			_ => Segment::Outside,
		}
	}

	/// In one of the SLRU segments (as opposed to the window or nowhere).
	pub(crate) fn in_main(self) -> bool {
		matches!(self, Segment::Probation | Segment::Protected)
	}
}

/// Intrusive link slots. One pair threads the entry into an SLRU list, the
/// other into a timer-wheel bucket; `wheel_pos` records which bucket so the
/// wheel can fix its list head on removal.
///
/// Links are only ever mutated by the maintainer under the policy lock; the
/// per-entry mutex exists to give that single writer interior mutability and
/// is never contended.
pub(crate) struct Links<K, V> {
	pub(crate) prev: Option<Arc<Entry<K, V>>>,
	pub(crate) next: Option<Arc<Entry<K, V>>>,
	pub(crate) wheel_prev: Option<Arc<Entry<K, V>>>,
	pub(crate) wheel_next: Option<Arc<Entry<K, V>>>,
	pub(crate) wheel_pos: Option<(usize, usize)>,
}

impl<K, V> Default for Links<K, V> {
	fn default() -> Self {
		Self {
			prev: None,
			next: None,
			wheel_prev: None,
			wheel_next: None,
			wheel_pos: None,
		}
	}
}

/// The unit of cached data, shared between the shard map, the window deque,
/// the SLRU lists and the timer wheel via `Arc`.
///
/// Metadata that both the caller side (under a shard lock) and the policy
/// side (under the policy lock) need to read is atomic, so neither side ever
/// has to take the other's lock for it.
pub(crate) struct Entry<K, V> {
	pub(crate) key: K,
	/// `None` only while the entry is parked in the pool.
	pub(crate) value: RwLock<Option<V>>,
	/// Index of the owning shard.
	pub(crate) shard: u16,
	/// Contribution to capacity, ≥ 1.
	pub(crate) cost: AtomicI64,
	/// Expiration in nanoseconds since the clock epoch; 0 means no TTL.
	pub(crate) expire: AtomicU64,
	/// Sketch estimate captured while the entry waits in the window;
	/// −1 means not yet estimated. Once the entry is admitted to the SLRU
	/// the sketch itself is the source of truth.
	pub(crate) frequency: AtomicI32,
	/// Set by the maintainer when the entry is being decommissioned.
	pub(crate) removed: AtomicBool,
	segment: AtomicU8,
	pub(crate) links: Mutex<Links<K, V>>,
}

impl<K, V> Entry<K, V> {
	pub(crate) fn new(key: K, value: V, shard: u16, cost: i64, expire: u64) -> Self {
		Self {
			key,
			value: RwLock::new(Some(value)),
			shard,
			cost: AtomicI64::new(cost),
			expire: AtomicU64::new(expire),
			frequency: AtomicI32::new(-1),
			removed: AtomicBool::new(false),
			segment: AtomicU8::new(Segment::Outside as u8),
			links: Mutex::new(Links::default()),
		}
	}

	pub(crate) fn segment(&self) -> Segment {
		Segment::from_u8(self.segment.load(Ordering::Acquire))
	}

	pub(crate) fn set_segment(&self, segment: Segment) {
		self.segment.store(segment as u8, Ordering::Release);
	}
}

impl<K: Clone, V: Clone> Entry<K, V> {
	/// Snapshot of key and value for a removal notification. `None` if the
	/// value has already been cleared back into the pool.
	pub(crate) fn kv(&self) -> Option<(K, V)> {
		let value = self.value.read().clone()?;
		Some((self.key.clone(), value))
	}
}

/// Free-list of entry allocations, shared by all shards.
///
/// Releasing clears the value so the cache stops pinning user data, and only
/// uniquely-owned entries are parked; anything still referenced elsewhere
/// simply drops when its last `Arc` goes away.
pub(crate) struct EntryPool<K, V> {
	free: SegQueue<Arc<Entry<K, V>>>,
}

/// Pooled allocations kept around at most.
const POOL_CAPACITY: usize = 1024;

impl<K, V> EntryPool<K, V> {
	pub(crate) fn new() -> Self {
		Self {
			free: SegQueue::new(),
		}
	}

	pub(crate) fn acquire(
		&self,
		key: K,
		value: V,
		shard: u16,
		cost: i64,
		expire: u64,
	) -> Arc<Entry<K, V>> {
		while let Some(mut entry) = self.free.pop() {
			if let Some(slot) = Arc::get_mut(&mut entry) {
				*slot = Entry::new(key, value, shard, cost, expire);
				return entry;
			}
			// Still referenced elsewhere; fall through to the next one.
		}
		Arc::new(Entry::new(key, value, shard, cost, expire))
	}

	pub(crate) fn release(&self, mut entry: Arc<Entry<K, V>>) {
		if let Some(slot) = Arc::get_mut(&mut entry) {
			*slot.value.get_mut() = None;
			slot.set_segment(Segment::Outside);
			if self.free.len() < POOL_CAPACITY {
				self.free.push(entry);
			}
		}
	}
}
