//! End-to-end scenario tests exercising `Cache` the way a caller would:
//! through `CacheBuilder`, across real threads where concurrency matters,
//! with a `FakeClock` wherever expiration needs deterministic time.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use ccmap_common::FakeClock;
use ccmap_core::{CacheBuilder, CcmapError, Owner, RemovalCause};

type Notification = (Option<i32>, Option<i32>, RemovalCause);

fn recording_listener() -> (Arc<Mutex<Vec<Notification>>>, impl Fn(Option<&i32>, Option<&i32>, RemovalCause) + Send + Sync) {
    let log = Arc::new(Mutex::new(Vec::new()));
    let recorder = {
        let log = Arc::clone(&log);
        move |k: Option<&i32>, v: Option<&i32>, cause: RemovalCause| {
            log.lock().unwrap().push((k.copied(), v.copied(), cause));
        }
    };
    (log, recorder)
}

/// S1 - size eviction.
#[test]
fn s1_size_eviction_discards_least_recently_accessed() {
    let (log, recorder) = recording_listener();
    let cache = CacheBuilder::<i32, i32>::new()
        .concurrency_level(1)
        .maximum_size(3)
        .removal_listener(recorder)
        .build()
        .unwrap();

    cache.put(1, 1).unwrap(); // a
    cache.put(2, 2).unwrap(); // b
    cache.put(3, 3).unwrap(); // c
    cache.put(4, 4).unwrap(); // d, forces an eviction

    assert_eq!(cache.size(), 3);
    assert!(!cache.contains_key(&1), "a was the least-recently-accessed entry");
    assert!(cache.contains_key(&2));
    assert!(cache.contains_key(&3));
    assert!(cache.contains_key(&4));

    let log = log.lock().unwrap();
    let size_notifications: Vec<_> = log.iter().filter(|(_, _, c)| *c == RemovalCause::Size).collect();
    assert_eq!(size_notifications.len(), 1);
    assert_eq!(size_notifications[0], &(Some(1), Some(1), RemovalCause::Size));
}

/// S2 - write expiration.
#[test]
fn s2_write_expiration_fires_by_the_next_write() {
    let (log, recorder) = recording_listener();
    let clock = Arc::new(FakeClock::new());
    let cache = CacheBuilder::<i32, i32>::new()
        .concurrency_level(1)
        .expire_after_write(Duration::from_nanos(1_000_000))
        .clock(Arc::clone(&clock) as Arc<dyn ccmap_common::Clock>)
        .removal_listener(recorder)
        .build()
        .unwrap();

    cache.put(1, 1).unwrap();
    clock.set(2_000_000);

    assert_eq!(cache.get(&1), None);

    // A write on the same segment is where the spec guarantees delivery by.
    cache.put(2, 2).unwrap();

    let log = log.lock().unwrap();
    assert!(log.contains(&(Some(1), Some(1), RemovalCause::Expired)));
}

/// S3 - access expiration extends lifetime.
#[test]
fn s3_access_expiration_extends_lifetime() {
    let clock = Arc::new(FakeClock::new());
    let cache = CacheBuilder::<i32, i32>::new()
        .expire_after_access(Duration::from_nanos(1_000_000))
        .clock(Arc::clone(&clock) as Arc<dyn ccmap_common::Clock>)
        .build()
        .unwrap();

    cache.put(1, 1).unwrap();

    clock.set(500_000);
    assert_eq!(cache.get(&1), Some(Arc::new(1)));

    clock.set(1_200_000);
    assert_eq!(
        cache.get(&1),
        Some(Arc::new(1)),
        "the access at t=500_000 should have pushed expiration out to t=1_500_000"
    );

    clock.set(2_600_000);
    assert_eq!(
        cache.get(&1),
        None,
        "the access at t=1_200_000 pushed expiration to t=2_200_000, already elapsed"
    );
}

/// S4 - loader collapse: N concurrent callers, one computation.
#[test]
fn s4_concurrent_get_or_load_collapses_onto_one_computation() {
    let cache = Arc::new(CacheBuilder::<i32, i32>::new().build().unwrap());
    let call_count = Arc::new(AtomicU64::new(0));

    std::thread::scope(|scope| {
        let mut handles = Vec::new();
        for _ in 0..10 {
            let cache = Arc::clone(&cache);
            let call_count = Arc::clone(&call_count);
            handles.push(scope.spawn(move || {
                cache.get_or_load(&1, |_k: &i32| -> Result<Option<i32>, std::convert::Infallible> {
                    call_count.fetch_add(1, Ordering::SeqCst);
                    std::thread::sleep(Duration::from_millis(50));
                    Ok(Some(7))
                })
            }));
        }
        for handle in handles {
            let result = handle.join().unwrap();
            assert_eq!(*result.unwrap(), 7);
        }
    });

    assert_eq!(call_count.load(Ordering::SeqCst), 1);
}

/// S5 - loader failure: delivered to every waiter, never cached, retried.
#[test]
fn s5_loader_failure_is_not_cached_and_is_retried() {
    #[derive(Debug)]
    struct LoaderBoom;
    impl std::fmt::Display for LoaderBoom {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            write!(f, "loader exploded")
        }
    }
    impl std::error::Error for LoaderBoom {}

    let cache = Arc::new(CacheBuilder::<i32, i32>::new().build().unwrap());
    let call_count = Arc::new(AtomicU64::new(0));

    let results: Vec<_> = std::thread::scope(|scope| {
        let mut handles = Vec::new();
        for _ in 0..10 {
            let cache = Arc::clone(&cache);
            let call_count = Arc::clone(&call_count);
            handles.push(scope.spawn(move || {
                cache.get_or_load(&1, |_k: &i32| -> Result<Option<i32>, LoaderBoom> {
                    call_count.fetch_add(1, Ordering::SeqCst);
                    std::thread::sleep(Duration::from_millis(30));
                    Err(LoaderBoom)
                })
            }))
        }
        handles.into_iter().map(|h| h.join().unwrap()).collect()
    });

    assert_eq!(call_count.load(Ordering::SeqCst), 1);
    assert_eq!(results.len(), 10);
    for result in &results {
        assert!(result.is_err());
        assert!(result.as_ref().unwrap_err().is_computation_failure());
    }

    assert!(!cache.contains_key(&1), "a failed load must not be cached");

    // A subsequent successful call invokes the loader again rather than
    // replaying the cached failure.
    let value = cache
        .get_or_load(&1, |_k: &i32| -> Result<Option<i32>, std::convert::Infallible> { Ok(Some(9)) })
        .unwrap();
    assert_eq!(*value, 9);
    assert_eq!(call_count.load(Ordering::SeqCst), 2);
}

/// S6 - weak key reclamation.
#[test]
fn s6_weak_key_reclamation_drops_size_and_notifies_collected() {
    let (log, recorder) = recording_listener();
    let cache = CacheBuilder::<i32, i32>::new()
        .weak_keys()
        .concurrency_level(1)
        .removal_listener(recorder)
        .build()
        .unwrap();

    let owner = Owner::new(42);
    cache.put_owned(owner.clone(), 100).unwrap();
    assert_eq!(cache.size(), 1);

    drop(owner);

    // Trigger reclamation: any write on the same (sole) segment drains
    // the key-reclamation queue as part of its pre-write cleanup.
    let other = Owner::new(7);
    cache.put_owned(other, 1).unwrap();

    assert_eq!(cache.size(), 1, "only the unrelated entry should remain");

    let log = log.lock().unwrap();
    let collected: Vec<_> = log.iter().filter(|(_, _, c)| *c == RemovalCause::Collected).collect();
    assert_eq!(collected.len(), 1);
    assert_eq!(collected[0], &(None, Some(100), RemovalCause::Collected));
}

/// Invariant 8 - round-trip.
#[test]
fn round_trip_put_then_get_returns_the_value() {
    let cache = CacheBuilder::<String, String>::new().build().unwrap();
    cache.put("k".to_string(), "v".to_string()).unwrap();
    assert_eq!(cache.get(&"k".to_string()), Some(Arc::new("v".to_string())));
}

/// Invariant 9 - idempotent put.
#[test]
fn idempotent_put_leaves_count_unchanged_and_fires_replaced_once() {
    let (log, recorder) = recording_listener();
    let cache = CacheBuilder::<i32, i32>::new().removal_listener(recorder).build().unwrap();

    cache.put(1, 1).unwrap();
    assert_eq!(cache.size(), 1);

    cache.put(1, 1).unwrap();
    assert_eq!(cache.size(), 1);

    let log = log.lock().unwrap();
    let replaced: Vec<_> = log.iter().filter(|(_, _, c)| *c == RemovalCause::Replaced).collect();
    assert_eq!(replaced.len(), 1);
    assert_eq!(replaced[0], &(Some(1), Some(1), RemovalCause::Replaced));
}

/// Invariant 6 - LRU ordering under a single-threaded access trace.
#[test]
fn lru_ordering_honors_an_access_trace() {
    let cache = CacheBuilder::<i32, i32>::new()
        .concurrency_level(1)
        .maximum_size(2)
        .build()
        .unwrap();

    cache.put(1, 1).unwrap();
    cache.put(2, 2).unwrap();
    // Touch 1, making 2 the least-recently-accessed.
    assert_eq!(cache.get(&1), Some(Arc::new(1)));
    cache.put(3, 3).unwrap();

    assert!(cache.contains_key(&1));
    assert!(!cache.contains_key(&2), "2 should have been evicted as least-recently-used");
    assert!(cache.contains_key(&3));
}

/// Invariant 2/3 adjacent: explicit removal drops both count and
/// subsequent visibility.
#[test]
fn explicit_remove_drops_entry_and_notifies_explicit() {
    let (log, recorder) = recording_listener();
    let cache = CacheBuilder::<i32, i32>::new().removal_listener(recorder).build().unwrap();

    cache.put(1, 1).unwrap();
    let removed = cache.remove(&1).unwrap();
    assert_eq!(removed, Some(Arc::new(1)));
    assert_eq!(cache.get(&1), None);
    assert_eq!(cache.size(), 0);

    let log = log.lock().unwrap();
    assert_eq!(log.last(), Some(&(Some(1), Some(1), RemovalCause::Explicit)));
}

/// A direct `put` racing an in-flight load wins: the late `publish_loaded`
/// only installs its value into a still-`Loading` slot, so once the put
/// has already turned the slot into a live entry, the loader's own
/// eventual publish is a no-op against map state - but the loader call
/// itself still reports the value it computed, since it never blocked on
/// anyone else's rendezvous.
#[test]
fn direct_put_is_not_clobbered_by_a_late_loader_publish() {
    let cache = Arc::new(CacheBuilder::<i32, i32>::new().build().unwrap());
    let started = Arc::new(std::sync::Barrier::new(2));

    let loader_thread = {
        let cache = Arc::clone(&cache);
        let started = Arc::clone(&started);
        std::thread::spawn(move || {
            cache.get_or_load(&1, move |_k: &i32| -> Result<Option<i32>, std::convert::Infallible> {
                started.wait();
                std::thread::sleep(Duration::from_millis(100));
                Ok(Some(1))
            })
        })
    };

    started.wait();
    std::thread::sleep(Duration::from_millis(20));
    cache.put(1, 99).unwrap();

    let loader_result = loader_thread.join().unwrap();
    assert_eq!(
        *loader_result.unwrap(),
        1,
        "the loader observes its own successful computation regardless of the race"
    );
    assert_eq!(
        cache.get(&1),
        Some(Arc::new(99)),
        "the direct put is not overwritten by the late publish"
    );
}

/// A concurrent `get_or_load` caller blocked on someone else's in-flight
/// computation is woken with `Superseded` once a direct `put` lands,
/// rather than left blocked forever.
#[test]
fn a_blocked_waiter_is_superseded_by_a_concurrent_put() {
    let cache = Arc::new(CacheBuilder::<i32, i32>::new().concurrency_level(1).build().unwrap());
    let loader_started = Arc::new(std::sync::Barrier::new(2));

    let loader_thread = {
        let cache = Arc::clone(&cache);
        let loader_started = Arc::clone(&loader_started);
        std::thread::spawn(move || {
            cache.get_or_load(&1, move |_k: &i32| -> Result<Option<i32>, std::convert::Infallible> {
                loader_started.wait();
                std::thread::sleep(Duration::from_millis(150));
                Ok(Some(1))
            })
        })
    };

    loader_started.wait();
    std::thread::sleep(Duration::from_millis(20));

    let waiter_thread = {
        let cache = Arc::clone(&cache);
        std::thread::spawn(move || {
            cache.get_or_load(&1, |_k: &i32| -> Result<Option<i32>, std::convert::Infallible> {
                unreachable!("a load for this key is already in flight; this loader must not run")
            })
        })
    };

    std::thread::sleep(Duration::from_millis(20));
    cache.put(1, 99).unwrap();

    let waiter_result = waiter_thread.join().unwrap();
    assert!(matches!(waiter_result, Err(CcmapError::Superseded)));

    let loader_result = loader_thread.join().unwrap();
    assert_eq!(*loader_result.unwrap(), 1);
}
