//! Benchmarks for ranking and cache key computation.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use powersearch::cache::CacheKey;
use powersearch::models::RawHit;
use powersearch::ranking;
use serde_json::json;

fn hits(n: usize) -> Vec<RawHit> {
    (0..n)
        .map(|i| {
            // deterministic spread with ties
            let score = ((i * 37) % 101) as f64 / 10.0;
            RawHit::new(format!("https://example.com/{i}"), format!("Result {i}"), score)
                .with_position(i)
        })
        .collect()
}

fn ranking_benchmark(c: &mut Criterion) {
    let mut group = c.benchmark_group("ranking_filter");
    for size in [10, 100, 1000] {
        let input = hits(size);
        group.bench_with_input(BenchmarkId::from_parameter(size), &input, |b, input| {
            b.iter(|| ranking::filter(black_box(input.clone()), Some(75.0), 10));
        });
    }
    group.finish();
}

fn cache_key_benchmark(c: &mut Criterion) {
    let params = json!({
        "query": { "text": "rust async runtimes", "engines": ["bing", "duckduckgo"], "language": "en" },
        "ranking": { "percentile": 75.0, "top_k": 10 },
        "content": { "strategy": "fetch", "total_timeout_ms": 20000 },
    });
    c.bench_function("cache_key", |b| {
        b.iter(|| CacheKey::compute("search", black_box(&params)));
    });
}

criterion_group!(benches, ranking_benchmark, cache_key_benchmark);
criterion_main!(benches);
