use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use crate::entry::Entry;
use crate::list::{LinkPair, List};

/// Monotonic clock reporting nanoseconds since its construction.
///
/// All time reads in the cache go through this, so tests can push time
/// forward without sleeping.
pub(crate) struct Clock {
	start: Instant,
	offset: AtomicU64,
}

impl Clock {
	pub(crate) fn new() -> Self {
		Self {
			start: Instant::now(),
			offset: AtomicU64::new(0),
		}
	}

	pub(crate) fn now_nanos(&self) -> u64 {
		self.start.elapsed().as_nanos() as u64 + self.offset.load(Ordering::Relaxed)
	}

	/// Absolute expiration for an entry living `ttl` from now.
	pub(crate) fn expire_nanos(&self, ttl: Duration) -> u64 {
		self.now_nanos() + ttl.as_nanos() as u64
	}

	/// Push the clock forward. Test hook.
	#[cfg(test)]
	pub(crate) fn advance(&self, by: Duration) {
		self.offset.fetch_add(by.as_nanos() as u64, Ordering::Relaxed);
	}
}

/// Buckets per wheel level, finest first.
const BUCKET_COUNTS: [usize; 5] = [64, 64, 32, 4, 1];

/// Bucket span per level in nanoseconds: the power of two closest to 1 s,
/// ~1 min, ~1 h, ~1 day and ~1 week. A level's buckets jointly cover the
/// next level's span; anything further out lands in the single catch-all
/// bucket of the last level.
const SPANS: [u64; 5] = [1 << 30, 1 << 36, 1 << 42, 1 << 47, 1 << 49];

/// Hierarchical timer wheel scheduling entry expirations.
///
/// Each bucket is an intrusive list threading the entries' wheel link pair,
/// so scheduling and descheduling are O(1). `advance` walks the buckets
/// whose time has passed, expires what is due, and cascades the rest down
/// into finer-grained levels.
pub(crate) struct TimerWheel<K, V> {
	wheels: Vec<Vec<List<K, V>>>,
	/// Time of the last `advance`, nanoseconds on the shared clock.
	nanos: u64,
}

impl<K, V> TimerWheel<K, V> {
	pub(crate) fn new(now: u64) -> Self {
		let wheels = BUCKET_COUNTS
			.iter()
			.map(|&count| (0..count).map(|_| List::new(LinkPair::Wheel)).collect())
			.collect();
		Self {
			wheels,
			nanos: now,
		}
	}

	/// Place `entry` in the bucket matching its expiration, unlinking it
	/// from any bucket it already occupies.
	pub(crate) fn schedule(&mut self, entry: &Arc<Entry<K, V>>) {
		self.deschedule(entry);
		let (level, idx) = self.bucket_for(entry.expire.load(Ordering::Relaxed));
		self.wheels[level][idx].push_front(entry);
		entry.links.lock().wheel_pos = Some((level, idx));
	}

	/// Unlink `entry` from its bucket, if scheduled.
	pub(crate) fn deschedule(&mut self, entry: &Arc<Entry<K, V>>) {
		let pos = entry.links.lock().wheel_pos.take();
		if let Some((level, idx)) = pos {
			self.wheels[level][idx].remove(entry);
		}
	}

	/// Advance the wheel to `now` and return the entries that expired.
	///
	/// Returned entries are already descheduled; the caller owns their
	/// removal from the rest of the cache. Entries in crossed buckets that
	/// are not yet due cascade into finer levels.
	pub(crate) fn advance(&mut self, now: u64) -> Vec<Arc<Entry<K, V>>> {
		let last = self.nanos;
		self.nanos = now;
		let mut expired = Vec::new();

		for level in 0..5 {
			let span = SPANS[level];
			let prev_tick = last / span;
			let now_tick = now / span;
			if now_tick <= prev_tick {
				// This level has not ticked, so no coarser one has either.
				break;
			}
			// One full revolution visits every bucket; walking further
			// would only revisit them.
			let steps = (now_tick - prev_tick).min(BUCKET_COUNTS[level] as u64);
			for step in 1..=steps {
				let idx = ((prev_tick + step) as usize) & (BUCKET_COUNTS[level] - 1);
				let mut drained = Vec::new();
				while let Some(entry) = self.wheels[level][idx].pop_tail() {
					entry.links.lock().wheel_pos = None;
					drained.push(entry);
				}
				for entry in drained {
					if entry.expire.load(Ordering::Relaxed) <= now {
						expired.push(entry);
					} else {
						self.schedule(&entry);
					}
				}
			}
		}
		expired
	}

	/// `(level, bucket)` for an absolute expiration time.
	fn bucket_for(&self, expire: u64) -> (usize, usize) {
		let delay = expire.saturating_sub(self.nanos);
		let mut level = 4;
		for i in 0..4 {
			if delay < SPANS[i + 1] {
				level = i;
				break;
			}
		}
		let span = SPANS[level];
		// Never place into the current or a passed tick; a due entry goes
		// into the next tick's bucket and expires on the next advance.
		let tick = (expire / span).max(self.nanos / span + 1);
		(level, (tick as usize) & (BUCKET_COUNTS[level] - 1))
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	const S: u64 = 1_000_000_000;

	fn entry(key: u64, expire: u64) -> Arc<Entry<u64, u64>> {
		Arc::new(Entry::new(key, key, 0, 1, expire))
	}

	fn wheel() -> TimerWheel<u64, u64> {
		TimerWheel::new(0)
	}

	#[test]
	fn nothing_expires_before_deadline() {
		let mut w = wheel();
		w.schedule(&entry(1, 10 * S));
		assert!(w.advance(5 * S).is_empty());
	}

	#[test]
	fn expires_after_deadline() {
		let mut w = wheel();
		w.schedule(&entry(42, 10 * S));
		let out = w.advance(11 * S);
		assert_eq!(out.len(), 1);
		assert_eq!(out[0].key, 42);
		// Expired entries come back descheduled.
		assert!(out[0].links.lock().wheel_pos.is_none());
	}

	#[test]
	fn staggered_deadlines_expire_in_batches() {
		let mut w = wheel();
		w.schedule(&entry(1, 5 * S));
		w.schedule(&entry(2, 15 * S));
		w.schedule(&entry(3, 30 * S));

		let mut first: Vec<u64> = w.advance(20 * S).iter().map(|e| e.key).collect();
		first.sort_unstable();
		assert_eq!(first, vec![1, 2]);

		let second: Vec<u64> = w.advance(35 * S).iter().map(|e| e.key).collect();
		assert_eq!(second, vec![3]);
	}

	#[test]
	fn deschedule_prevents_expiry() {
		let mut w = wheel();
		let e = entry(7, 10 * S);
		w.schedule(&e);
		w.deschedule(&e);
		assert!(w.advance(20 * S).is_empty());
	}

	#[test]
	fn reschedule_moves_the_deadline() {
		let mut w = wheel();
		let e = entry(5, 10 * S);
		w.schedule(&e);
		e.expire.store(30 * S, Ordering::Relaxed);
		w.schedule(&e);

		assert!(w.advance(15 * S).is_empty());
		let out = w.advance(35 * S);
		assert_eq!(out.len(), 1);
		assert_eq!(out[0].key, 5);
	}

	#[test]
	fn long_deadline_cascades_down() {
		let mut w = wheel();
		// ~100 s lands on the minutes wheel first.
		let e = entry(9, 100 * S);
		w.schedule(&e);

		assert!(w.advance(70 * S).is_empty());
		let out = w.advance(101 * S);
		assert_eq!(out.len(), 1);
		assert_eq!(out[0].key, 9);
	}

	#[test]
	fn clock_offset_drives_time() {
		let clock = Clock::new();
		let before = clock.now_nanos();
		clock.advance(Duration::from_secs(5));
		assert!(clock.now_nanos() >= before + 5 * S);
	}
}
