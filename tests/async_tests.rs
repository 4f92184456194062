//! The cache is synchronous but `Send + Sync`; these tests pin down that it
//! is safe and ergonomic to use from async tasks.

use std::sync::Arc;
use std::time::Duration;

use tinylfu_cache::{Cache, CacheBuilder, Loaded};

#[tokio::test]
async fn get_across_await_points() {
	let cache: Arc<Cache<u64, String>> = Arc::new(Cache::new(10_000));

	cache.insert(1, "async test".to_string(), 1);

	// Values are returned by clone, so holding one across an await is fine.
	if let Some(value) = cache.get(&1) {
		tokio::time::sleep(Duration::from_millis(1)).await;
		assert_eq!(value, "async test");
	} else {
		panic!("expected a hit");
	}
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn shared_across_tasks() {
	let cache: Arc<Cache<u64, String>> = Arc::new(Cache::new(100_000));

	let mut handles = Vec::new();
	for t in 0..4u64 {
		let cache = cache.clone();
		handles.push(tokio::spawn(async move {
			for i in 0..100u64 {
				let key = t * 1000 + i;
				let value = format!("value-{key}");
				cache.insert(key, value.clone(), 1);
				tokio::task::yield_now().await;
				if let Some(seen) = cache.get(&key) {
					assert_eq!(seen, value);
				}
			}
		}));
	}
	for handle in handles {
		handle.await.unwrap();
	}
	assert!(cache.len() > 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn loading_cache_from_blocking_tasks() {
	let cache = Arc::new(CacheBuilder::new(10_000).build_loading(|key: &u64| {
		std::thread::sleep(Duration::from_millis(10));
		Ok(Loaded {
			value: format!("row-{key}"),
			cost: 1,
			ttl: Duration::ZERO,
		})
	}));

	// The loader blocks, so route it through spawn_blocking.
	let mut handles = Vec::new();
	for _ in 0..8 {
		let cache = cache.clone();
		handles.push(tokio::task::spawn_blocking(move || cache.get(&5).unwrap()));
	}
	for handle in handles {
		assert_eq!(handle.await.unwrap(), "row-5");
	}
}
