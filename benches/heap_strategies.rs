//! Heap strategy benchmarks.

use criterion::{BenchmarkId, Criterion, Throughput, criterion_group, criterion_main};
use crossheap::heap::{SharedHeap, StrategyKind};
use crossheap::memory::LocalRegion;

fn bench_allocate_free(c: &mut Criterion) {
    let mut group = c.benchmark_group("allocate_free");

    for kind in [StrategyKind::FreeList, StrategyKind::Embedded] {
        let region = LocalRegion::new(1024 * 1024).unwrap();
        let mut heap = unsafe { SharedHeap::initialize(&region, kind).unwrap() };

        group.throughput(Throughput::Elements(1));
        group.bench_with_input(BenchmarkId::from_parameter(kind), &kind, |b, _| {
            b.iter(|| {
                let block = heap.allocate(128).unwrap();
                std::hint::black_box(block);
                unsafe { heap.free(block.as_ptr()).unwrap() };
            });
        });
    }

    group.finish();
}

fn bench_fragmented(c: &mut Criterion) {
    let mut group = c.benchmark_group("fragmented_allocate");

    for kind in [StrategyKind::FreeList, StrategyKind::Embedded] {
        let region = LocalRegion::new(4 * 1024 * 1024).unwrap();
        let mut heap = unsafe { SharedHeap::initialize(&region, kind).unwrap() };

        // Leave every other block allocated so the heap is full of holes.
        let blocks: Vec<_> = (0..1000).map(|_| heap.allocate(64).unwrap()).collect();
        for block in blocks.iter().step_by(2) {
            unsafe { heap.free(block.as_ptr()).unwrap() };
        }

        group.throughput(Throughput::Elements(1));
        group.bench_with_input(BenchmarkId::from_parameter(kind), &kind, |b, _| {
            b.iter(|| {
                let block = heap.allocate(256).unwrap();
                std::hint::black_box(block);
                unsafe { heap.free(block.as_ptr()).unwrap() };
            });
        });
    }

    group.finish();
}

fn bench_bump(c: &mut Criterion) {
    c.bench_function("bump_allocate", |b| {
        b.iter_batched(
            || {
                let region = LocalRegion::new(64 * 1024).unwrap();
                let heap = unsafe { SharedHeap::initialize(&region, StrategyKind::Bump).unwrap() };
                (region, heap)
            },
            |(_region, mut heap)| {
                for _ in 0..100 {
                    std::hint::black_box(heap.allocate(32).unwrap());
                }
            },
            criterion::BatchSize::SmallInput,
        );
    });
}

criterion_group!(benches, bench_allocate_free, bench_fragmented, bench_bump);
criterion_main!(benches);
