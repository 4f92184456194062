use std::sync::Arc;

use crate::entry::{Entry, Segment};
use crate::list::{LinkPair, List};

/// Segmented LRU main space.
///
/// Two intrusive lists: `probation` receives newly admitted entries,
/// `protected` holds entries re-accessed while on probation. The protected
/// segment is capped at 80% of the combined capacity; overflow demotes its
/// tail back to the head of probation.
pub(crate) struct Slru<K, V> {
	probation: List<K, V>,
	protected: List<K, V>,
	maxsize: u64,
	protected_cap: i64,
}

impl<K, V> Slru<K, V> {
	pub(crate) fn new(maxsize: u64) -> Self {
		Self {
			probation: List::new(LinkPair::Main),
			protected: List::new(LinkPair::Main),
			maxsize,
			protected_cap: (maxsize as f64 * 0.8) as i64,
		}
	}

	pub(crate) fn maxsize(&self) -> u64 {
		self.maxsize
	}

	/// Number of resident entries.
	pub(crate) fn len(&self) -> usize {
		self.probation.len() + self.protected.len()
	}

	/// Combined cost of both segments.
	pub(crate) fn total_cost(&self) -> i64 {
		self.probation.cost() + self.protected.cost()
	}

	/// Push a newcomer onto probation. If that pushed the combined cost over
	/// capacity, the probation tail is returned as the eviction candidate;
	/// the caller decides what to do with it.
	pub(crate) fn insert(&mut self, entry: &Arc<Entry<K, V>>) -> Option<Arc<Entry<K, V>>> {
		self.probation.push_front(entry);
		entry.set_segment(Segment::Probation);
		if self.total_cost() > self.maxsize as i64 {
			return self.probation.tail();
		}
		None
	}

	/// Record an access: probation entries promote to protected (demoting
	/// the protected tail when over its sub-capacity), protected entries
	/// move back to the protected head.
	pub(crate) fn access(&mut self, entry: &Arc<Entry<K, V>>) {
		match entry.segment() {
			Segment::Probation => {
				self.probation.remove(entry);
				self.protected.push_front(entry);
				entry.set_segment(Segment::Protected);
				while self.protected.cost() > self.protected_cap {
					match self.protected.pop_tail() {
						Some(demoted) => {
							self.probation.push_front(&demoted);
							demoted.set_segment(Segment::Probation);
						}
						None => break,
					}
				}
			}
			Segment::Protected => {
				self.protected.remove(entry);
				self.protected.push_front(entry);
			}
			_ => {}
		}
	}

	/// The entry that would be evicted next: the probation tail, or `None`
	/// while the SLRU still has room.
	pub(crate) fn victim(&self) -> Option<Arc<Entry<K, V>>> {
		if self.total_cost() < self.maxsize as i64 {
			return None;
		}
		self.probation.tail()
	}

	pub(crate) fn remove(&mut self, entry: &Arc<Entry<K, V>>) {
		match entry.segment() {
			Segment::Probation => self.probation.remove(entry),
			Segment::Protected => self.protected.remove(entry),
			_ => return,
		}
		entry.set_segment(Segment::Outside);
	}

	/// Apply an in-place cost change to the segment holding `entry`.
	pub(crate) fn update_cost(&mut self, entry: &Arc<Entry<K, V>>, delta: i64) {
		match entry.segment() {
			Segment::Probation => self.probation.update_cost(delta),
			Segment::Protected => self.protected.update_cost(delta),
			_ => {}
		}
	}

	pub(crate) fn pop_probation_tail(&mut self) -> Option<Arc<Entry<K, V>>> {
		let entry = self.probation.pop_tail()?;
		entry.set_segment(Segment::Outside);
		Some(entry)
	}

	pub(crate) fn pop_protected_tail(&mut self) -> Option<Arc<Entry<K, V>>> {
		let entry = self.protected.pop_tail()?;
		entry.set_segment(Segment::Outside);
		Some(entry)
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	fn entry(key: u64, cost: i64) -> Arc<Entry<u64, u64>> {
		Arc::new(Entry::new(key, key, 0, cost, 0))
	}

	#[test]
	fn insert_lands_on_probation() {
		let mut slru = Slru::new(10);
		let e = entry(1, 1);
		assert!(slru.insert(&e).is_none());
		assert_eq!(e.segment(), Segment::Probation);
		assert_eq!(slru.len(), 1);
		assert_eq!(slru.total_cost(), 1);
	}

	#[test]
	fn overflowing_insert_names_a_victim() {
		let mut slru = Slru::new(3);
		let entries: Vec<_> = (0..4).map(|i| entry(i, 1)).collect();
		assert!(slru.insert(&entries[0]).is_none());
		assert!(slru.insert(&entries[1]).is_none());
		assert!(slru.insert(&entries[2]).is_none());

		// Fourth insert pushes cost to 4 > 3; oldest probation entry is the
		// candidate.
		let victim = slru.insert(&entries[3]).unwrap();
		assert_eq!(victim.key, 0);
	}

	#[test]
	fn access_promotes_to_protected() {
		let mut slru = Slru::new(10);
		let e = entry(1, 1);
		slru.insert(&e);
		slru.access(&e);
		assert_eq!(e.segment(), Segment::Protected);

		// Accessing again keeps it protected.
		slru.access(&e);
		assert_eq!(e.segment(), Segment::Protected);
	}

	#[test]
	fn protected_overflow_demotes_tail() {
		// maxsize 10 → protected cap 8.
		let mut slru = Slru::new(10);
		let entries: Vec<_> = (0..9).map(|i| entry(i, 1)).collect();
		for e in &entries {
			slru.insert(e);
			slru.access(e);
		}
		// Nine promotions against a cap of eight: the first promoted entry
		// fell back to probation.
		assert_eq!(entries[0].segment(), Segment::Probation);
		assert_eq!(entries[8].segment(), Segment::Protected);
	}

	#[test]
	fn victim_is_none_until_full() {
		let mut slru = Slru::new(3);
		slru.insert(&entry(1, 1));
		assert!(slru.victim().is_none());

		slru.insert(&entry(2, 2));
		// Cost 3 == maxsize: no longer under capacity.
		assert_eq!(slru.victim().unwrap().key, 1);
	}

	#[test]
	fn remove_unlinks_and_tags_outside() {
		let mut slru = Slru::new(10);
		let e = entry(1, 2);
		slru.insert(&e);
		slru.remove(&e);
		assert_eq!(e.segment(), Segment::Outside);
		assert_eq!(slru.len(), 0);
		assert_eq!(slru.total_cost(), 0);
	}

	#[test]
	fn update_cost_tracks_segment_totals() {
		let mut slru = Slru::new(100);
		let e = entry(1, 2);
		slru.insert(&e);
		slru.update_cost(&e, 5);
		assert_eq!(slru.total_cost(), 7);
	}
}
