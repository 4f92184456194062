use std::sync::Arc;
use std::sync::atomic::Ordering;

use crate::entry::{Entry, Links};

/// Which pair of link slots a list threads through.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum LinkPair {
	/// `prev`/`next`: SLRU membership.
	Main,
	/// `wheel_prev`/`wheel_next`: timer-wheel bucket membership.
	Wheel,
}

/// Intrusive doubly linked list over shared entry handles.
///
/// The list stores no container of its own; membership is encoded entirely
/// in the entries' link slots, so insertion, removal and promotion are O(1)
/// given the entry handle. `cost` aggregates the entries' costs so segment
/// capacity checks are O(1) too.
///
/// Callers must only remove entries they know to be members (the segment tag
/// or wheel position says so); the list itself does not double-check.
pub(crate) struct List<K, V> {
	pair: LinkPair,
	head: Option<Arc<Entry<K, V>>>,
	tail: Option<Arc<Entry<K, V>>>,
	len: usize,
	cost: i64,
}

impl<K, V> List<K, V> {
	pub(crate) fn new(pair: LinkPair) -> Self {
		Self {
			pair,
			head: None,
			tail: None,
			len: 0,
			cost: 0,
		}
	}

	pub(crate) fn len(&self) -> usize {
		self.len
	}

	pub(crate) fn cost(&self) -> i64 {
		self.cost
	}

	#[cfg(test)]
	pub(crate) fn is_empty(&self) -> bool {
		self.len == 0
	}

	/// Handle of the last entry, if any.
	pub(crate) fn tail(&self) -> Option<Arc<Entry<K, V>>> {
		self.tail.clone()
	}

	pub(crate) fn push_front(&mut self, entry: &Arc<Entry<K, V>>) {
		let old = self.head.take();
		self.set_links(entry, None, old.clone());
		match &old {
			Some(head) => self.set_prev(head, Some(entry.clone())),
			None => self.tail = Some(entry.clone()),
		}
		self.head = Some(entry.clone());
		self.len += 1;
		self.cost += entry.cost.load(Ordering::Relaxed);
	}

	/// Unlink `entry`. The entry must currently be a member of this list.
	pub(crate) fn remove(&mut self, entry: &Arc<Entry<K, V>>) {
		let (prev, next) = self.take_links(entry);
		match &prev {
			Some(p) => self.set_next(p, next.clone()),
			None => self.head = next.clone(),
		}
		match &next {
			Some(n) => self.set_prev(n, prev.clone()),
			None => self.tail = prev.clone(),
		}
		self.len -= 1;
		self.cost -= entry.cost.load(Ordering::Relaxed);
	}

	pub(crate) fn pop_tail(&mut self) -> Option<Arc<Entry<K, V>>> {
		let tail = self.tail.clone()?;
		self.remove(&tail);
		Some(tail)
	}

	/// Account for an in-place cost change of a member entry.
	pub(crate) fn update_cost(&mut self, delta: i64) {
		self.cost += delta;
	}

	/// Sever every link so the `Arc` chain cannot keep entries alive.
	pub(crate) fn clear(&mut self) {
		let mut cursor = self.head.take();
		while let Some(entry) = cursor {
			let (_, next) = self.take_links(&entry);
			cursor = next;
		}
		self.tail = None;
		self.len = 0;
		self.cost = 0;
	}

	fn take_links(
		&self,
		entry: &Arc<Entry<K, V>>,
	) -> (Option<Arc<Entry<K, V>>>, Option<Arc<Entry<K, V>>>) {
		let mut links = entry.links.lock();
		match self.pair {
			LinkPair::Main => (links.prev.take(), links.next.take()),
			LinkPair::Wheel => (links.wheel_prev.take(), links.wheel_next.take()),
		}
	}

	fn set_links(
		&self,
		entry: &Arc<Entry<K, V>>,
		prev: Option<Arc<Entry<K, V>>>,
		next: Option<Arc<Entry<K, V>>>,
	) {
		let mut links = entry.links.lock();
		match self.pair {
			LinkPair::Main => {
				links.prev = prev;
				links.next = next;
			}
			LinkPair::Wheel => {
				links.wheel_prev = prev;
				links.wheel_next = next;
			}
		}
	}

	fn set_prev(&self, entry: &Arc<Entry<K, V>>, prev: Option<Arc<Entry<K, V>>>) {
		let mut links = entry.links.lock();
		match self.pair {
			LinkPair::Main => links.prev = prev,
			LinkPair::Wheel => links.wheel_prev = prev,
		}
	}

	fn set_next(&self, entry: &Arc<Entry<K, V>>, next: Option<Arc<Entry<K, V>>>) {
		let mut links = entry.links.lock();
		match self.pair {
			LinkPair::Main => links.next = next,
			LinkPair::Wheel => links.wheel_next = next,
		}
	}
}

impl<K, V> Drop for List<K, V> {
	fn drop(&mut self) {
		self.clear();
	}
}
