//! Benchmarks for nonce issuance, redemption and prefix derivation
//!
//! Run with: cargo bench --bench nonce

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion};
use prometheus::Registry;
use std::hint::black_box;

use portcullis_nonce::{derive_prefix, NonceMetrics, NonceService};

fn service(max_used: usize) -> NonceService {
    let registry = Registry::new();
    let metrics = NonceMetrics::new(&registry).unwrap();
    NonceService::new(Some("zinc".to_string()), max_used, metrics).unwrap()
}

fn bench_issue(c: &mut Criterion) {
    let ns = service(0);
    c.bench_function("nonce/issue", |b| {
        b.iter(|| black_box(ns.nonce().unwrap()));
    });
}

fn bench_issue_and_redeem(c: &mut Criterion) {
    let mut group = c.benchmark_group("nonce/issue_and_redeem");
    for max_used in [128usize, 4096, 65536] {
        let ns = service(max_used);
        group.bench_with_input(BenchmarkId::from_parameter(max_used), &max_used, |b, _| {
            b.iter(|| {
                let nonce = ns.nonce().unwrap();
                black_box(ns.valid(black_box(&nonce)))
            });
        });
    }
    group.finish();
}

fn bench_reject_garbage(c: &mut Criterion) {
    let ns = service(0);
    let garbage = format!("zinc{}", "A".repeat(43));
    c.bench_function("nonce/reject_garbage", |b| {
        b.iter(|| black_box(ns.valid(black_box(&garbage))));
    });
}

fn bench_derive_prefix(c: &mut Criterion) {
    c.bench_function("prefix/derive", |b| {
        b.iter(|| black_box(derive_prefix(black_box("10.0.0.1:9101"), black_box(b"routing-key"))));
    });
}

criterion_group!(
    benches,
    bench_issue,
    bench_issue_and_redeem,
    bench_reject_garbage,
    bench_derive_prefix
);
criterion_main!(benches);
