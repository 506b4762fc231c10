
use std::collections::BTreeSet;

use criterion::{BatchSize, BenchmarkId, Criterion, Throughput, criterion_group, criterion_main};

use dfm::average::{AverageBase, FormulaConfig, Periods, compute_average, excluded_set_for_column};
use dfm::library::FormulaRegistry;
use dfm::projection::project;
use dfm::ratio::column_candidates;
use dfm::selection::SelectionStore;

use fixtures::{LARGE, MEDIUM, SMALL, make_triangle};

fn volume_all() -> FormulaConfig {
    FormulaConfig {
        label: "Volume - all".to_string(),
        base: AverageBase::Volume,
        periods: Periods::All,
        exclude: 0,
    }
}

fn simple_windowed_ex() -> FormulaConfig {
    FormulaConfig {
        label: "Simple - 8 Ex hi/lo".to_string(),
        base: AverageBase::Simple,
        periods: Periods::Recent(8),
        exclude: 1,
    }
}

// ── Group 1: ratio_matrix — full candidate enumeration ───────────────────────

fn bench_ratio_matrix(c: &mut Criterion) {
    let mut group = c.benchmark_group("ratio_matrix");
    for (name, scenario) in [("small", &SMALL), ("medium", &MEDIUM), ("large", &LARGE)] {
        let tri = make_triangle(scenario, 42);
        group.throughput(Throughput::Elements(
            (scenario.origins * scenario.devs) as u64,
        ));
        group.bench_function(BenchmarkId::from_parameter(name), |b| {
            b.iter(|| {
                (0..tri.ratio_col_count())
                    .map(|col| column_candidates(&tri, col).len())
                    .sum::<usize>()
            })
        });
    }
    group.finish();
}

// ── Group 2: column_average — one column, both bases ─────────────────────────

fn bench_column_average(c: &mut Criterion) {
    let mut group = c.benchmark_group("column_average");
    let tri = make_triangle(&LARGE, 42);
    let no_strikes = BTreeSet::new();
    for (name, cfg) in [("volume_all", volume_all()), ("simple_8_ex", simple_windowed_ex())] {
        group.bench_function(BenchmarkId::from_parameter(name), |b| {
            b.iter(|| {
                let excluded = excluded_set_for_column(&tri, 0, &cfg, &no_strikes);
                compute_average(&tri, 0, &excluded, &cfg)
            })
        });
    }
    group.finish();
}

// ── Group 3: auto_exclusion — sort cost as candidates grow ───────────────────

fn bench_auto_exclusion(c: &mut Criterion) {
    let mut group = c.benchmark_group("auto_exclusion");
    let cfg = FormulaConfig {
        label: "Volume - all Ex hi/lo x2".to_string(),
        base: AverageBase::Volume,
        periods: Periods::All,
        exclude: 2,
    };
    let no_strikes = BTreeSet::new();
    for &origins in &[10usize, 50, 200, 1_000] {
        let tri = make_triangle(&fixtures::Scenario { origins, devs: 10 }, 42);
        group.throughput(Throughput::Elements(origins as u64));
        group.bench_with_input(BenchmarkId::from_parameter(origins), &tri, |b, tri| {
            b.iter(|| excluded_set_for_column(tri, 0, &cfg, &no_strikes))
        });
    }
    group.finish();
}

// ── Group 4: full_projection — selection through to ultimates ────────────────

fn bench_full_projection(c: &mut Criterion) {
    let mut group = c.benchmark_group("full_projection");
    for (name, scenario) in [("small", &SMALL), ("medium", &MEDIUM), ("large", &LARGE)] {
        let tri = make_triangle(scenario, 42);
        let registry = FormulaRegistry::with_builtins();
        group.throughput(Throughput::Elements(scenario.origins as u64));
        group.bench_function(BenchmarkId::from_parameter(name), |b| {
            b.iter_batched(
                || {
                    let mut store = SelectionStore::new();
                    store.fill_default_selection(&registry, tri.ratio_col_count());
                    store
                },
                |store| project(&tri, &store, &registry),
                BatchSize::SmallInput,
            )
        });
    }
    group.finish();
}

criterion_group!(
    benches,
    bench_ratio_matrix,
    bench_column_average,
    bench_auto_exclusion,
    bench_full_projection,
);
criterion_main!(benches);
