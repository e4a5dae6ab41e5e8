//! Benchmarks for the cache-aside path
//!
//! This benchmark measures:
//! - Hit path (read + envelope decode)
//! - Miss path (compute + encode + write)
//! - Key encoding with escaping

use std::sync::Arc;
use std::time::Duration;

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use serde::{Deserialize, Serialize};

use prep_cache::cache::{
    CacheKey, CacheService, KeyCodec, MemoryStore, Namespace, StoreHandle, TtlPolicy,
};
use prep_cache::clock::system_clock;

#[derive(Clone, Serialize, Deserialize)]
struct Progress {
    solved: Vec<u32>,
    streak: u32,
    notes: String,
}

fn progress(size: usize) -> Progress {
    Progress {
        solved: (0..size as u32).collect(),
        streak: 12,
        notes: "x".repeat(size),
    }
}

fn service() -> CacheService {
    let store = StoreHandle::new(
        Arc::new(MemoryStore::new(1_000_000)),
        Duration::from_millis(500),
    );
    CacheService::new(
        store,
        KeyCodec::new(TtlPolicy::default()),
        system_clock(),
        Some(Duration::from_secs(2)),
    )
}

fn bench_hit_path(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().expect("runtime");
    let mut group = c.benchmark_group("get_or_compute_hit");

    for size in [16usize, 256, 4096] {
        let svc = service();
        let value = progress(size);
        rt.block_on(async {
            svc.get_or_compute(Namespace::Progress, "bench-user", || async {
                Ok::<_, ()>(value.clone())
            })
            .await
            .expect("seed");
        });

        group.throughput(Throughput::Elements(1));
        group.bench_with_input(BenchmarkId::from_parameter(size), &size, |b, _| {
            b.to_async(&rt).iter(|| async {
                let cached = svc
                    .get_or_compute(Namespace::Progress, "bench-user", || async {
                        Ok::<_, ()>(progress(0))
                    })
                    .await
                    .expect("hit");
                black_box(cached.value.streak)
            })
        });
    }
    group.finish();
}

fn bench_miss_path(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().expect("runtime");
    let svc = service();
    let value = progress(256);
    let mut n = 0u64;

    c.bench_function("get_or_compute_miss", |b| {
        b.to_async(&rt).iter(|| {
            n += 1;
            let id = format!("user-{}", n);
            let svc = &svc;
            let value = value.clone();
            async move {
                let cached = svc
                    .get_or_compute(Namespace::Progress, &id, || async { Ok::<_, ()>(value) })
                    .await
                    .expect("miss");
                black_box(cached.cache_hit)
            }
        })
    });
}

fn bench_key_encoding(c: &mut Criterion) {
    c.bench_function("escape_endpoint", |b| {
        b.iter(|| KeyCodec::escape(black_box("/api/interview/{id}/answers?draft=true")))
    });

    c.bench_function("encode_key", |b| {
        b.iter(|| {
            CacheKey::new(Namespace::Session, black_box("user-8c1f3b"))
                .expect("valid key")
                .encode()
        })
    });
}

criterion_group!(
    benches,
    bench_hit_path,
    bench_miss_path,
    bench_key_encoding
);
criterion_main!(benches);
