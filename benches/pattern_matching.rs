//! Benchmarks for the two hot paths on the ingest loop's critical section:
//! fingerprinting every incoming candidate and scanning the vector index's
//! in-memory similarity scores. Both run on every article, so their cost
//! multiplies across a batch.

use criterion::{criterion_group, criterion_main, BatchSize, BenchmarkId, Criterion};
use infounit_pipeline::{cosine_similarity, fingerprint, ratcliff_obershelp};

fn sample_title(len: usize) -> String {
    "Company announces quarterly results amid market volatility "
        .repeat(len / 60 + 1)
        .chars()
        .take(len)
        .collect()
}

fn sample_vector(dims: usize, seed: u32) -> Vec<f32> {
    let mut v: Vec<f32> = (0..dims).map(|i| ((i as u32 + seed) % 97) as f32 / 97.0).collect();
    let norm: f32 = v.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > 0.0 {
        for x in v.iter_mut() {
            *x /= norm;
        }
    }
    v
}

fn bench_fingerprint_short_article(c: &mut Criterion) {
    let title = sample_title(80);
    let content = sample_title(400);
    c.bench_function("fingerprint/short_article", |b| {
        b.iter(|| fingerprint(&title, &content))
    });
}

fn bench_fingerprint_long_article(c: &mut Criterion) {
    let title = sample_title(80);
    let content = sample_title(8_000);
    c.bench_function("fingerprint/long_article", |b| {
        b.iter(|| fingerprint(&title, &content))
    });
}

fn bench_cosine_similarity_scan(c: &mut Criterion) {
    let mut group = c.benchmark_group("cosine_similarity/scan");
    for &index_size in &[100usize, 1_000, 10_000] {
        let query = sample_vector(1536, 0);
        let index: Vec<Vec<f32>> = (0..index_size).map(|i| sample_vector(1536, i as u32 + 1)).collect();
        group.bench_with_input(BenchmarkId::from_parameter(index_size), &index, |b, index| {
            b.iter_batched(
                || query.clone(),
                |q| {
                    index
                        .iter()
                        .map(|v| cosine_similarity(&q, v))
                        .fold(f32::MIN, f32::max)
                },
                BatchSize::SmallInput,
            )
        });
    }
    group.finish();
}

fn bench_ratcliff_obershelp_titles(c: &mut Criterion) {
    let a = sample_title(120);
    let b = sample_title(90);
    c.bench_function("ratcliff_obershelp/title_pair", |bch| {
        bch.iter(|| ratcliff_obershelp(&a, &b))
    });
}

criterion_group!(
    benches,
    bench_fingerprint_short_article,
    bench_fingerprint_long_article,
    bench_cosine_similarity_scan,
    bench_ratcliff_obershelp_titles,
);
criterion_main!(benches);
