//! Allocator benchmarks.

use criterion::{BenchmarkId, Criterion, criterion_group, criterion_main};
use trackalloc::HeapManager;

fn bench_alloc_free_cycle(c: &mut Criterion) {
    let sizes: &[usize] = &[16, 64, 256, 1024, 4096];
    let mut group = c.benchmark_group("alloc_free_cycle");

    for &size in sizes {
        group.bench_with_input(BenchmarkId::new("trackalloc", size), &size, |b, &sz| {
            let mut heap = HeapManager::new();
            b.iter(|| {
                let ptr = heap.allocate(sz).unwrap();
                criterion::black_box(ptr);
                heap.deallocate(ptr).unwrap();
            });
        });
    }
    group.finish();
}

fn bench_alloc_burst(c: &mut Criterion) {
    let mut group = c.benchmark_group("alloc_burst");

    group.bench_function("1000x64B", |b| {
        b.iter(|| {
            let mut heap = HeapManager::new();
            let ptrs: Vec<_> = (0..1000).map(|_| heap.allocate(64).unwrap()).collect();
            for &ptr in &ptrs {
                heap.deallocate(ptr).unwrap();
            }
            criterion::black_box(ptrs.len());
        });
    });

    group.bench_function("churned_reuse", |b| {
        let mut heap = HeapManager::new();
        let ptrs: Vec<_> = (0..100).map(|_| heap.allocate(16).unwrap()).collect();
        for &ptr in &ptrs {
            heap.deallocate(ptr).unwrap();
        }
        b.iter(|| {
            let ptr = heap.allocate(256).unwrap();
            criterion::black_box(ptr);
            heap.deallocate(ptr).unwrap();
        });
    });

    group.finish();
}

criterion_group!(benches, bench_alloc_free_cycle, bench_alloc_burst);
criterion_main!(benches);
