use std::collections::{HashMap, VecDeque};
use std::hash::Hash;
use std::sync::Arc;

use ahash::RandomState;

use crate::doorkeeper::Doorkeeper;
use crate::entry::Entry;

/// A single shard of the primary index: the key → entry map, the admission
/// window deque, and the optional doorkeeper.
///
/// The shard is not thread-safe on its own; the cache wraps it in an
/// `RwLock`.
pub(crate) struct Shard<K, V> {
	pub(crate) map: HashMap<K, Arc<Entry<K, V>>, RandomState>,
	/// Admission window: newest at the front, arbitrated from the back.
	pub(crate) deque: VecDeque<Arc<Entry<K, V>>>,
	pub(crate) doorkeeper: Option<Doorkeeper>,
	/// Window capacity in cost units.
	pub(crate) qsize: u64,
	/// Summed cost of the deque members.
	pub(crate) qlen: i64,
	/// Distinct doorkeeper insertions since its last reset.
	pub(crate) counter: usize,
}

impl<K: Hash + Eq, V> Shard<K, V> {
	pub(crate) fn new(qsize: u64, doorkeeper: bool, hasher: RandomState) -> Self {
		Self {
			map: HashMap::with_hasher(hasher),
			deque: VecDeque::new(),
			doorkeeper: doorkeeper.then(|| Doorkeeper::new(0.01)),
			qsize,
			qlen: 0,
			counter: 0,
		}
	}

	/// Insert into the map, growing the doorkeeper alongside the occupancy
	/// so its false-positive rate stays near target.
	pub(crate) fn set(&mut self, key: K, entry: Arc<Entry<K, V>>) {
		self.map.insert(key, entry);
		if let Some(dk) = self.doorkeeper.as_mut() {
			let want = 20 * self.map.len();
			if want > dk.capacity() {
				dk.ensure_capacity(want);
			}
		}
	}

	pub(crate) fn get(&self, key: &K) -> Option<&Arc<Entry<K, V>>> {
		self.map.get(key)
	}

	/// Remove `entry` from the map, but only if the mapping still points at
	/// this exact entry. The key may have been removed and re-inserted since
	/// the caller picked the handle up.
	pub(crate) fn delete(&mut self, entry: &Arc<Entry<K, V>>) -> bool {
		match self.map.get(&entry.key) {
			Some(current) if Arc::ptr_eq(current, entry) => {
				self.map.remove(&entry.key);
				true
			}
			_ => false,
		}
	}

	pub(crate) fn len(&self) -> usize {
		self.map.len()
	}
}
