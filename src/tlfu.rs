use std::hash::{BuildHasher, Hash};
use std::sync::Arc;
use std::sync::atomic::{AtomicI32, AtomicU32, Ordering};

use ahash::RandomState;

use crate::entry::Entry;
use crate::sketch::FrequencySketch;
use crate::slru::Slru;

/// Climber and admission state shared with the caller side.
///
/// `hit` is bumped by `get` under the shard lock, `total` by the read-log
/// drain, and `threshold` is read by `process_deque` without the policy
/// lock, so all three live outside it as atomics.
pub(crate) struct PolicyStats {
	pub(crate) hit: AtomicU32,
	pub(crate) total: AtomicU32,
	/// Minimum window-evictee frequency currently forwarded for admission;
	/// −1 admits everything.
	pub(crate) threshold: AtomicI32,
}

impl PolicyStats {
	pub(crate) fn new() -> Self {
		Self {
			hit: AtomicU32::new(0),
			total: AtomicU32::new(0),
			threshold: AtomicI32::new(-1),
		}
	}
}

/// One batched read event: the key hash, plus the entry handle when the
/// read was a hit.
pub(crate) struct ReadBufItem<K, V> {
	pub(crate) hash: u64,
	pub(crate) entry: Option<Arc<Entry<K, V>>>,
}

/// W-TinyLFU admission policy over the SLRU main space.
///
/// Owned by the maintainer under the policy lock. Admission compares a
/// candidate's estimated frequency (biased by the adaptive `lru_factor`)
/// against the current victim's; the climber nudges that bias after every
/// `10 × size` events based on the hit-ratio trend.
pub(crate) struct TinyLfu<K, V> {
	pub(crate) slru: Slru<K, V>,
	sketch: FrequencySketch,
	hasher: RandomState,
	stats: Arc<PolicyStats>,
	size: u64,
	counter: u64,
	/// Hit ratio observed at the last climb.
	hr: f32,
	lru_factor: u8,
	step: i8,
}

impl<K: Hash, V> TinyLfu<K, V> {
	pub(crate) fn new(size: u64, hasher: RandomState, stats: Arc<PolicyStats>) -> Self {
		Self {
			slru: Slru::new(size),
			sketch: FrequencySketch::new(64),
			hasher,
			stats,
			size,
			counter: 0,
			hr: 0.0,
			lru_factor: 0,
			step: 1,
		}
	}

	/// Arbitrate admission of a window evictee or direct-to-policy entry.
	///
	/// Returns the entry that lost: the candidate itself when the victim's
	/// frequency wins, the displaced victim when the candidate is admitted
	/// over a full SLRU, or `None` when there was room (or nothing to do).
	pub(crate) fn set(&mut self, entry: &Arc<Entry<K, V>>) -> Option<Arc<Entry<K, V>>> {
		self.bump();
		if entry.segment().in_main() {
			return None;
		}
		if let Some(victim) = self.slru.victim() {
			let mut freq = entry.frequency.load(Ordering::Relaxed);
			if freq == -1 {
				freq = i32::from(self.sketch.estimate(self.hasher.hash_one(&entry.key)));
			}
			let victim_freq = i32::from(self.sketch.estimate(self.hasher.hash_one(&victim.key)));
			if freq + i32::from(self.lru_factor) <= victim_freq {
				return Some(entry.clone());
			}
		} else {
			let count = self.slru.len();
			self.sketch.ensure_capacity(count + count / 100);
		}
		self.slru.insert(entry)
	}

	/// Feed one drained read event into the sketch and the SLRU ordering.
	pub(crate) fn access(&mut self, item: ReadBufItem<K, V>) {
		self.bump();
		if self.sketch.add(item.hash) {
			// The sketch halved its counters; scale the threshold with them.
			let threshold = &self.stats.threshold;
			threshold.store(threshold.load(Ordering::Relaxed) / 2, Ordering::Relaxed);
		}
		let Some(entry) = item.entry else { return };
		if entry.segment().in_main() {
			let was_victim = self
				.slru
				.victim()
				.is_some_and(|v| Arc::ptr_eq(&v, &entry));
			self.slru.access(&entry);
			if was_victim {
				self.update_threshold();
			}
		} else {
			let estimate = i32::from(self.sketch.estimate(item.hash));
			entry.frequency.store(estimate, Ordering::Relaxed);
		}
	}

	pub(crate) fn remove(&mut self, entry: &Arc<Entry<K, V>>) {
		self.slru.remove(entry);
	}

	pub(crate) fn update_cost(&mut self, entry: &Arc<Entry<K, V>>, delta: i64) {
		self.slru.update_cost(entry, delta);
	}

	/// Pop tails until the SLRU fits its capacity again, probation first.
	pub(crate) fn evict_entries(&mut self) -> Vec<Arc<Entry<K, V>>> {
		let maxsize = self.slru.maxsize() as i64;
		let mut removed = Vec::new();
		while self.slru.total_cost() > maxsize {
			match self.slru.pop_probation_tail() {
				Some(entry) => removed.push(entry),
				None => break,
			}
		}
		while self.slru.total_cost() > maxsize {
			match self.slru.pop_protected_tail() {
				Some(entry) => removed.push(entry),
				None => break,
			}
		}
		removed
	}

	/// Publish the admission threshold from the current victim's estimate.
	pub(crate) fn update_threshold(&mut self) {
		let threshold = match self.slru.victim() {
			Some(victim) => {
				let estimate = i32::from(self.sketch.estimate(self.hasher.hash_one(&victim.key)));
				estimate - i32::from(self.lru_factor)
			}
			None => -1,
		};
		self.stats.threshold.store(threshold, Ordering::Relaxed);
	}

	fn bump(&mut self) {
		self.counter += 1;
		if self.counter > 10 * self.size {
			self.climb();
			self.counter = 0;
		}
	}

	/// Adjust the LRU-vs-LFU bias from the hit-ratio delta: keep climbing in
	/// the same direction while hits improve, reverse with a fresh step of
	/// one when they regress.
	fn climb(&mut self) {
		let total = self.stats.total.load(Ordering::Relaxed);
		let hit = self.stats.hit.load(Ordering::Relaxed);
		let current = if total == 0 {
			self.hr
		} else {
			hit as f32 / total as f32
		};
		let delta = current - self.hr;

		let mut diff = 0i8;
		if delta > 0.0 {
			if self.step < 0 {
				self.step -= 1;
			} else {
				self.step += 1;
			}
			self.step = self.step.clamp(-13, 13);
			let new_factor = (self.lru_factor as i8 + self.step).clamp(0, 16);
			diff = new_factor - self.lru_factor as i8;
			self.lru_factor = new_factor as u8;
		} else if delta < 0.0 {
			self.step = if self.step > 0 { -1 } else { 1 };
			let new_factor = (self.lru_factor as i8 + self.step).clamp(0, 16);
			diff = new_factor - self.lru_factor as i8;
			self.lru_factor = new_factor as u8;
		}
		self.stats.threshold.fetch_sub(i32::from(diff), Ordering::Relaxed);
		self.hr = current;
		self.stats.hit.store(0, Ordering::Relaxed);
		self.stats.total.store(0, Ordering::Relaxed);
	}
}
