use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread;
use std::time::Duration;

use parking_lot::Mutex;
use tinylfu_cache::{Cache, CacheBuilder, Loaded, LoadingCache, RemoveReason};

/// Collects removal notifications for assertions.
#[derive(Clone, Default)]
struct Events {
	log: Arc<Mutex<Vec<(u64, String, RemoveReason)>>>,
}

impl Events {
	fn listener(&self) -> impl Fn(u64, String, RemoveReason) + Send + Sync + 'static {
		let log = self.log.clone();
		move |k, v, reason| log.lock().push((k, v, reason))
	}

	fn snapshot(&self) -> Vec<(u64, String, RemoveReason)> {
		self.log.lock().clone()
	}
}

/// Give the maintainer time to drain the write log.
fn settle() {
	thread::sleep(Duration::from_millis(200));
}

#[test]
fn capacity_is_enforced_after_drain() {
	let events = Events::default();
	let cache: Cache<u64, String> = CacheBuilder::new(100)
		.removal_listener(events.listener())
		.build();

	for i in 0..200u64 {
		cache.insert(i, format!("v{i}"), 1);
	}
	settle();

	assert!(cache.len() <= 100, "len {} exceeds capacity", cache.len());

	// Every key beyond capacity was turned away with an eviction report.
	let evicted = events
		.snapshot()
		.iter()
		.filter(|(_, _, r)| *r == RemoveReason::Evicted)
		.count();
	assert!(evicted >= 100, "expected ≥100 evictions, saw {evicted}");
}

#[test]
fn doorkeeper_admits_on_second_sighting() {
	let cache: Cache<u64, String> = CacheBuilder::new(10_000).doorkeeper(true).build();

	assert!(!cache.insert(1, "x".to_string(), 1));
	assert_eq!(cache.get(&1), None);

	assert!(cache.insert(1, "x".to_string(), 1));
	assert_eq!(cache.get(&1), Some("x".to_string()));
}

#[test]
fn ttl_expiry_notifies_exactly_once() {
	let events = Events::default();
	let cache: Cache<u64, String> = CacheBuilder::new(1000)
		.removal_listener(events.listener())
		.build();

	cache.insert_with_ttl(1, "a".to_string(), 1, Duration::from_millis(10));
	thread::sleep(Duration::from_millis(50));
	assert_eq!(cache.get(&1), None, "expired entry must miss");

	// Wait out a full level-0 wheel bucket (~1.07 s) plus a maintenance
	// tick so the wheel collects it.
	thread::sleep(Duration::from_millis(1800));
	let expirations: Vec<_> = events
		.snapshot()
		.into_iter()
		.filter(|(k, _, r)| *k == 1 && *r == RemoveReason::Expired)
		.collect();
	assert_eq!(expirations.len(), 1);
	assert_eq!(expirations[0].1, "a");
}

#[test]
fn update_propagates_value_and_cost() {
	let events = Events::default();
	let cache: Cache<u64, String> = CacheBuilder::new(10_000)
		.removal_listener(events.listener())
		.build();

	cache.insert(7, "1".to_string(), 1);
	cache.insert(7, "2".to_string(), 10);
	settle();

	assert_eq!(cache.len(), 1);
	assert_eq!(cache.get(&7), Some("2".to_string()));
	// In-place update is not a removal.
	assert!(events.snapshot().is_empty());
}

#[test]
fn delete_then_get_misses() {
	let events = Events::default();
	let cache: Cache<u64, String> = CacheBuilder::new(1000)
		.removal_listener(events.listener())
		.build();

	cache.insert(3, "v".to_string(), 1);
	cache.remove(&3);
	assert_eq!(cache.get(&3), None);

	settle();
	let snapshot = events.snapshot();
	assert_eq!(snapshot.len(), 1);
	assert_eq!(snapshot[0], (3, "v".to_string(), RemoveReason::Removed));
}

#[test]
fn large_cost_bypasses_window() {
	// One shard → window capacity 10; cost 500 must go straight to the
	// policy and stay resident.
	let cache: Cache<u64, String> = CacheBuilder::new(1000).shards(1).build();

	cache.insert(1, "big".to_string(), 500);
	settle();

	assert_eq!(cache.len(), 1);
	assert_eq!(cache.get(&1), Some("big".to_string()));
}

#[test]
fn singleflight_loads_once_for_concurrent_misses() {
	let calls = Arc::new(AtomicUsize::new(0));
	let counter = calls.clone();
	let cache: LoadingCache<u64, String> = CacheBuilder::new(1000).build_loading(move |key| {
		counter.fetch_add(1, Ordering::SeqCst);
		thread::sleep(Duration::from_millis(50));
		Ok(Loaded {
			value: format!("loaded-{key}"),
			cost: 1,
			ttl: Duration::ZERO,
		})
	});
	let cache = Arc::new(cache);

	let handles: Vec<_> = (0..100)
		.map(|_| {
			let cache = cache.clone();
			thread::spawn(move || cache.get(&77).unwrap())
		})
		.collect();
	for handle in handles {
		assert_eq!(handle.join().unwrap(), "loaded-77");
	}
	assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[test]
fn range_visits_live_entries() {
	let cache: Cache<u64, String> = CacheBuilder::new(10_000).build();
	for i in 0..20u64 {
		cache.insert(i, i.to_string(), 1);
	}
	cache.insert_with_ttl(999, "gone".to_string(), 1, Duration::from_millis(5));
	thread::sleep(Duration::from_millis(30));

	let mut seen = Vec::new();
	cache.range(|k, v| {
		assert_eq!(v, &k.to_string());
		seen.push(*k);
		true
	});
	seen.sort_unstable();
	assert_eq!(seen, (0..20u64).collect::<Vec<_>>());
}

#[test]
fn hot_keys_survive_pressure() {
	let cache: Cache<u64, String> = CacheBuilder::new(500).shards(1).build();

	// Establish a hot set through repeated reads.
	for i in 0..50u64 {
		cache.insert(i, format!("hot{i}"), 1);
	}
	for _ in 0..40 {
		for i in 0..50u64 {
			cache.get(&i);
		}
	}
	settle();

	// Flood with cold keys.
	for i in 1000..3000u64 {
		cache.insert(i, format!("cold{i}"), 1);
	}
	settle();

	let survivors = (0..50u64).filter(|i| cache.get(i).is_some()).count();
	assert!(
		survivors >= 25,
		"frequency-based admission should protect hot keys, {survivors}/50 left"
	);
	assert!(cache.len() <= 500 + 50, "len {} way over capacity", cache.len());
}

#[test]
fn concurrent_mixed_workload_stays_consistent() {
	let cache: Arc<Cache<u64, String>> = Arc::new(CacheBuilder::new(100_000).build());

	let handles: Vec<_> = (0..4u64)
		.map(|t| {
			let cache = cache.clone();
			thread::spawn(move || {
				for i in 0..500u64 {
					let key = t * 1000 + i;
					let value = format!("value-{key}");
					cache.insert(key, value.clone(), 1);
					if let Some(seen) = cache.get(&key) {
						assert_eq!(seen, value);
					}
					if i % 7 == 0 {
						cache.remove(&key);
						assert_eq!(cache.get(&key), None);
					}
				}
			})
		})
		.collect();
	for handle in handles {
		handle.join().unwrap();
	}
	assert!(cache.len() > 0);
}

#[test]
fn close_shuts_down_cleanly() {
	let cache: Cache<u64, String> = CacheBuilder::new(1000).build();
	for i in 0..100u64 {
		cache.insert(i, i.to_string(), 1);
	}
	cache.close();
	// Dropping after close must not hang or double-join.
	drop(cache);
}
