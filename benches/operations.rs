// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Benchmarks for core cache operations.

#![allow(missing_docs, reason = "Benchmark code")]

use std::hint::black_box;
use std::sync::Arc;
use std::time::{Duration, Instant};

use criterion::{Criterion, criterion_group, criterion_main};
use memoflight::{Cache, Clock};
use tokio::runtime::Runtime;

const TTL: Duration = Duration::from_secs(3600);

fn rt() -> Runtime {
    Runtime::new().expect("failed to create runtime")
}

fn generate(key: u64) -> std::future::Ready<Result<u64, std::io::Error>> {
    std::future::ready(Ok(key))
}

fn bench_get(c: &mut Criterion) {
    let rt = rt();
    let mut group = c.benchmark_group("get");

    group.bench_function("hit", |b| {
        let cache = Arc::new(Cache::builder::<u64, u64>(Clock::new()).max_size(2048).build());
        rt.block_on(async {
            for key in 0..1000u64 {
                cache.get(&key, TTL, generate).await.expect("warmup get should succeed");
            }
        });

        b.iter_custom(|iters| {
            let cache = Arc::clone(&cache);
            rt.block_on(async move {
                let start = Instant::now();
                for i in 0..iters {
                    let key = i % 1000;
                    black_box(cache.get(&key, TTL, generate).await.expect("hit should succeed"));
                }
                start.elapsed()
            })
        });
    });

    group.bench_function("miss", |b| {
        let cache = Arc::new(Cache::builder::<u64, u64>(Clock::new()).build());

        b.iter_custom(|iters| {
            let cache = Arc::clone(&cache);
            rt.block_on(async move {
                let start = Instant::now();
                for i in 0..iters {
                    let key = u64::MAX - i;
                    black_box(cache.get(&key, TTL, generate).await.expect("miss should succeed"));
                }
                start.elapsed()
            })
        });
    });

    group.bench_function("coalesced", |b| {
        let cache = Arc::new(Cache::builder::<u64, u64>(Clock::new()).build());

        b.iter_custom(|iters| {
            let cache = Arc::clone(&cache);
            rt.block_on(async move {
                let start = Instant::now();
                for i in 0..iters {
                    let key = u64::MAX / 2 - i;
                    let handles: Vec<_> = (0..8).map(|_| cache.get(&key, TTL, generate)).collect();
                    for handle in handles {
                        black_box(handle.await.expect("coalesced get should succeed"));
                    }
                }
                start.elapsed()
            })
        });
    });

    group.finish();
}

criterion_group!(benches, bench_get);
criterion_main!(benches);
