//! SGC Benchmarks
//!
//! Allocation paths, barrier-heavy field access and whole GC cycles.
//! Run with: `cargo bench --package sgc`

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use sgc::config::{KB, MB};
use sgc::{GcCause, GcConfig, HeuristicsMode, Mutator, Runtime};

fn create_runtime(mode: HeuristicsMode) -> Runtime {
    let config = GcConfig {
        max_heap_size: 64 * MB,
        initial_heap_size: 64 * MB,
        heuristics: mode,
        pacing: false,
        ..Default::default()
    };
    Runtime::new(config).unwrap()
}

/// A reachable list of `len` small cells hanging off one array
fn build_graph(m: &Mutator, len: usize) -> sgc::Handle {
    let holder = m.alloc_ref_array(1).unwrap();
    for _ in 0..len {
        let mark = m.handle_mark();
        let cell = m.alloc_ref_array(2).unwrap();
        let first = m.load_ref(holder, 0).unwrap();
        m.store_ref(cell, 0, first).unwrap();
        m.store_ref(holder, 0, Some(cell)).unwrap();
        m.release_handles(mark);
    }
    holder
}

fn bench_runtime_creation(c: &mut Criterion) {
    let mut group = c.benchmark_group("runtime_creation");
    group.sample_size(20);

    for mode in [HeuristicsMode::Passive, HeuristicsMode::Adaptive] {
        group.bench_function(mode.name(), |b| {
            b.iter(|| {
                let runtime = create_runtime(mode);
                runtime.shutdown();
                black_box(runtime)
            })
        });
    }

    group.finish();
}

fn bench_allocation(c: &mut Criterion) {
    let mut group = c.benchmark_group("allocation");

    let runtime = create_runtime(HeuristicsMode::Passive);
    let m = runtime.attach("bench").unwrap();

    for &size in &[16usize, 64, 256, 4 * KB] {
        group.throughput(Throughput::Bytes(size as u64));
        group.bench_with_input(BenchmarkId::new("prim_array", size), &size, |b, &size| {
            let mark = m.handle_mark();
            b.iter(|| {
                black_box(m.alloc_prim_array(size).unwrap());
                m.release_handles(mark);
            })
        });
    }

    group.bench_function("ref_array_8", |b| {
        let mark = m.handle_mark();
        b.iter(|| {
            black_box(m.alloc_ref_array(8).unwrap());
            m.release_handles(mark);
        })
    });

    drop(m);
    runtime.shutdown();
    group.finish();
}

fn bench_field_access(c: &mut Criterion) {
    let mut group = c.benchmark_group("field_access");

    let runtime = create_runtime(HeuristicsMode::Adaptive);
    let m = runtime.attach("bench").unwrap();
    let holder = m.alloc_ref_array(4).unwrap();
    let value = m.alloc_prim_array(64).unwrap();

    group.bench_function("store_ref", |b| {
        b.iter(|| m.store_ref(holder, 1, black_box(Some(value))).unwrap())
    });

    group.bench_function("load_ref", |b| {
        let mark = m.handle_mark();
        b.iter(|| {
            black_box(m.load_ref(holder, 1).unwrap());
            m.release_handles(mark);
        })
    });

    group.bench_function("store_load_word", |b| {
        b.iter(|| {
            m.store_word(value, 3, black_box(42)).unwrap();
            black_box(m.load_word(value, 3).unwrap())
        })
    });

    group.bench_function("cas_ref", |b| {
        b.iter(|| black_box(m.cas_ref(holder, 1, Some(value), Some(value)).unwrap()))
    });

    drop(m);
    runtime.shutdown();
    group.finish();
}

fn bench_gc_cycles(c: &mut Criterion) {
    let mut group = c.benchmark_group("gc_cycles");
    group.sample_size(10);

    for &live in &[1_000usize, 10_000] {
        let runtime = create_runtime(HeuristicsMode::Passive);
        {
            let m = runtime.attach("bench").unwrap();
            let graph = build_graph(&m, live);
            let _global = m.new_global(Some(graph)).unwrap();
        }

        group.bench_with_input(BenchmarkId::new("full", live), &live, |b, _| {
            b.iter(|| runtime.request_gc(GcCause::SystemGc).unwrap())
        });
        runtime.shutdown();
    }

    group.finish();
}

criterion_group!(
    benches,
    bench_runtime_creation,
    bench_allocation,
    bench_field_access,
    bench_gc_cycles
);
criterion_main!(benches);
