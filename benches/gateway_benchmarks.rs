use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use std::sync::Arc;
use std::time::Duration;

use traffic_gateway::config::RateLimitConfig;
use traffic_gateway::core::router::{RouteTable, Router};
use traffic_gateway::models::Route;
use traffic_gateway::middleware::rate_limit::RateLimiter;
use traffic_gateway::stats::StatsAggregator;

use tokio::runtime::Runtime;

/// Route table with `count` distinct prefixes
async fn create_route_table(count: usize) -> RouteTable {
    let table = RouteTable::new();
    for i in 0..count {
        table
            .add(Route::new(
                format!("/api/service{}", i),
                format!("http://service{}:8080", i),
                &["GET", "POST"],
            ))
            .await
            .unwrap();
    }
    table
}

/// Benchmark first-match routing against tables of increasing size
fn bench_route_matching(c: &mut Criterion) {
    let rt = Runtime::new().unwrap();

    let mut group = c.benchmark_group("route_matching");
    group.throughput(Throughput::Elements(1));

    for count in [4usize, 32, 256].iter() {
        let table = Arc::new(rt.block_on(create_route_table(*count)));
        let last = Arc::new(format!("/api/service{}/items/42", count - 1));

        group.bench_with_input(BenchmarkId::new("first_route", count), count, |b, _| {
            b.to_async(&rt).iter(|| {
                let table = table.clone();
                async move {
                    black_box(table.find_match("/api/service0/items", "GET").await);
                }
            });
        });

        group.bench_with_input(BenchmarkId::new("last_route", count), count, |b, _| {
            b.to_async(&rt).iter(|| {
                let (table, last) = (table.clone(), last.clone());
                async move {
                    black_box(table.find_match(&last, "POST").await);
                }
            });
        });

        group.bench_with_input(BenchmarkId::new("no_match", count), count, |b, _| {
            b.to_async(&rt).iter(|| {
                let table = table.clone();
                async move {
                    black_box(table.find_match("/static/app.js", "DELETE").await);
                }
            });
        });
    }

    group.finish();
}

/// Benchmark token-bucket admission
fn bench_rate_limiting(c: &mut Criterion) {
    let rt = Runtime::new().unwrap();

    let mut group = c.benchmark_group("rate_limiting");
    group.throughput(Throughput::Elements(1));

    let limiter = Arc::new(RateLimiter::new(&RateLimitConfig {
        enabled: true,
        default_limit: u32::MAX,
    }));

    group.bench_function("single_path", |b| {
        b.to_async(&rt).iter(|| {
            let limiter = limiter.clone();
            async move {
                black_box(limiter.allow("/api/users", 0).await);
            }
        });
    });

    let paths: Vec<String> = (0..64).map(|i| format!("/api/service{}", i)).collect();
    group.bench_function("many_paths", |b| {
        let mut i = 0usize;
        b.to_async(&rt).iter(|| {
            let path = paths[i % paths.len()].clone();
            i += 1;
            let limiter = limiter.clone();
            async move {
                black_box(limiter.allow(&path, 0).await);
            }
        });
    });

    // Concurrent callers contending on one bucket
    for concurrency in [10, 50].iter() {
        group.bench_with_input(
            BenchmarkId::new("concurrent", concurrency),
            concurrency,
            |b, &concurrency| {
                b.to_async(&rt).iter(|| {
                    let limiter = limiter.clone();
                    async move {
                        let tasks: Vec<_> = (0..concurrency)
                            .map(|_| {
                                let limiter = limiter.clone();
                                tokio::spawn(async move { limiter.allow("/api/hot", 0).await })
                            })
                            .collect();
                        for task in tasks {
                            black_box(task.await.unwrap());
                        }
                    }
                });
            },
        );
    }

    group.finish();
}

/// Benchmark statistics recording on the request path
fn bench_stats_recording(c: &mut Criterion) {
    let rt = Runtime::new().unwrap();
    let stats = Arc::new(StatsAggregator::new());

    let mut group = c.benchmark_group("stats");
    group.throughput(Throughput::Elements(1));

    group.bench_function("record", |b| {
        b.to_async(&rt).iter(|| {
            let stats = stats.clone();
            async move {
                stats
                    .record("/api/users", Duration::from_millis(42), false)
                    .await;
            }
        });
    });

    group.bench_function("snapshot", |b| {
        b.to_async(&rt).iter(|| {
            let stats = stats.clone();
            async move {
                black_box(stats.snapshot().await);
            }
        });
    });

    group.finish();
}

criterion_group!(
    benches,
    bench_route_matching,
    bench_rate_limiting,
    bench_stats_recording
);

criterion_main!(benches);
