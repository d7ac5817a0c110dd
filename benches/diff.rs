use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use rule_group_reconciler::{
    decode, diff, diff_records, ActivatedRule, InMemoryRuleGroupApi, Reconciler, Record, WafAction,
};
use std::sync::Arc;

fn members(count: usize, offset: usize) -> Vec<ActivatedRule> {
    (0..count)
        .map(|i| {
            ActivatedRule::new((i + offset) as i64, format!("rule-{}", i + offset))
                .with_action(WafAction::Block)
        })
        .collect()
}

/// Benchmark diffs of growing member lists with a 10% churn
fn bench_diff_scaling(c: &mut Criterion) {
    let mut group = c.benchmark_group("diff_scaling");

    for size in [10, 100, 1_000, 10_000].iter() {
        let old = members(*size, 0);
        let new = members(*size, *size / 10);
        group.throughput(Throughput::Elements(*size as u64));

        group.bench_with_input(BenchmarkId::from_parameter(size), size, |b, _| {
            b.iter(|| diff(black_box(&old), black_box(&new)))
        });
    }

    group.finish();
}

/// Benchmark the degenerate shapes of a diff
fn bench_diff_shapes(c: &mut Criterion) {
    let mut group = c.benchmark_group("diff_shapes");
    let full = members(1_000, 0);
    let empty: Vec<ActivatedRule> = Vec::new();
    let mut reversed = full.clone();
    reversed.reverse();

    group.bench_function("identical", |b| {
        b.iter(|| diff(black_box(&full), black_box(&full)))
    });

    group.bench_function("reordered", |b| {
        b.iter(|| diff(black_box(&full), black_box(&reversed)))
    });

    group.bench_function("all_inserts", |b| {
        b.iter(|| diff(black_box(&empty), black_box(&full)))
    });

    group.bench_function("all_deletes", |b| {
        b.iter(|| diff(black_box(&full), black_box(&empty)))
    });

    group.finish();
}

/// Benchmark the record boundary, including codec validation
fn bench_diff_records(c: &mut Criterion) {
    let mut group = c.benchmark_group("diff_records");
    let old: Vec<Record> = members(1_000, 0).iter().map(decode).collect();
    let new: Vec<Record> = members(1_000, 100).iter().map(decode).collect();
    group.throughput(Throughput::Elements(1_000));

    group.bench_function("1000_records", |b| {
        b.iter(|| diff_records(black_box(&old), black_box(&new)))
    });

    group.finish();
}

/// Benchmark a full update round trip against the in-memory service
fn bench_update(c: &mut Criterion) {
    let mut group = c.benchmark_group("update");
    let api = Arc::new(InMemoryRuleGroupApi::new());
    let reconciler = Reconciler::builder(api).build().unwrap();

    let a = members(100, 0);
    let b = members(100, 10);
    let created = reconciler.create("bench", "Bench", &a).unwrap();

    group.bench_function("toggle_100_members", |bench| {
        let mut current = &a;
        let mut target = &b;
        bench.iter(|| {
            reconciler.update(&created.id, current, target).unwrap();
            std::mem::swap(&mut current, &mut target);
        })
    });

    group.finish();
}

criterion_group!(
    benches,
    bench_diff_scaling,
    bench_diff_shapes,
    bench_diff_records,
    bench_update
);
criterion_main!(benches);
