//! # Cache Benchmark Harness
//!
//! Grounded in `hkv-engine`'s `bench_engine.rs`: a deterministic-workload,
//! pre-built-keys style benchmark, adapted to `criterion` since this port's
//! ambient stack uses `criterion` for statistically-reported benchmarks
//! rather than a hand-rolled timer loop (see SPEC_FULL.md's "ccmap-bench"
//! section).

use std::sync::Arc;

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion};

use ccmap_core::CacheBuilder;

const DEFAULT_KEY_COUNT: usize = 1 << 14;

/// Tiny deterministic PRNG so the workload is reproducible across runs,
/// mirroring `hkv-engine`'s `XorShift64`.
struct XorShift64 {
    state: u64,
}

impl XorShift64 {
    fn new(seed: u64) -> Self {
        XorShift64 { state: seed }
    }

    fn next(&mut self) -> u64 {
        let mut x = self.state;
        x ^= x << 13;
        x ^= x >> 7;
        x ^= x << 17;
        self.state = x;
        x
    }
}

fn build_keys(count: usize) -> Vec<u64> {
    let mut rng = XorShift64::new(0x5eed_1234_cafe_babe);
    (0..count).map(|_| rng.next()).collect()
}

fn bench_put_get(c: &mut Criterion) {
    let keys = build_keys(DEFAULT_KEY_COUNT);
    let mut group = c.benchmark_group("cache_put_get");

    group.bench_function(BenchmarkId::new("put", DEFAULT_KEY_COUNT), |b| {
        b.iter(|| {
            let cache = CacheBuilder::<u64, u64>::new().build().unwrap();
            for &k in &keys {
                cache.put(k, k.wrapping_mul(31)).unwrap();
            }
            std::hint::black_box(cache.size());
        });
    });

    let warm = CacheBuilder::<u64, u64>::new().build().unwrap();
    for &k in &keys {
        warm.put(k, k.wrapping_mul(31)).unwrap();
    }
    group.bench_function(BenchmarkId::new("get_hit", DEFAULT_KEY_COUNT), |b| {
        b.iter(|| {
            for &k in &keys {
                std::hint::black_box(warm.get(&k));
            }
        });
    });

    group.finish();
}

fn bench_size_eviction(c: &mut Criterion) {
    let keys = build_keys(DEFAULT_KEY_COUNT);
    c.bench_function("cache_size_bounded_insert", |b| {
        b.iter(|| {
            let cache = CacheBuilder::<u64, u64>::new()
                .maximum_size(1_024)
                .concurrency_level(8)
                .build()
                .unwrap();
            for &k in &keys {
                cache.put(k, k).unwrap();
            }
            std::hint::black_box(cache.size());
        });
    });
}

fn bench_concurrent_get_or_load(c: &mut Criterion) {
    c.bench_function("cache_get_or_load_collapse", |b| {
        b.iter(|| {
            let cache = Arc::new(CacheBuilder::<u64, u64>::new().build().unwrap());
            std::thread::scope(|scope| {
                for _ in 0..8 {
                    let cache = Arc::clone(&cache);
                    scope.spawn(move || {
                        let _ = cache.get_or_load(&1u64, |k: &u64| -> Result<Option<u64>, std::convert::Infallible> {
                            Ok(Some(*k * 2))
                        });
                    });
                }
            });
        });
    });
}

criterion_group!(benches, bench_put_get, bench_size_eviction, bench_concurrent_get_or_load);
criterion_main!(benches);
