//! Block allocator benchmarks using criterion.
//!
//! Run with: cargo bench --bench block_bench

use keel_runtime::config::MemoryConfig;
use keel_runtime::memory::{AllocationStrategy, BlockAllocator, CommitPolicy};
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};

const BLOCK: usize = 16 * 1024;

fn allocator(strategy: AllocationStrategy, commit_policy: CommitPolicy) -> BlockAllocator {
    let config = MemoryConfig {
        block_size: BLOCK,
        reservation_size: 4096 * BLOCK,
        reservation_retries: 0,
        commit_policy,
        strategy,
    };
    BlockAllocator::new(&config).unwrap()
}

/// Benchmark a single allocate/free pair
fn bench_alloc_free(c: &mut Criterion) {
    let mut group = c.benchmark_group("block_alloc_free");

    let cases = [
        ("reserved_decommit", AllocationStrategy::Reserved, CommitPolicy::Decommit),
        ("reserved_protect", AllocationStrategy::Reserved, CommitPolicy::Protect),
        ("system", AllocationStrategy::System, CommitPolicy::Decommit),
    ];

    for (name, strategy, policy) in cases {
        if strategy == AllocationStrategy::Reserved && !AllocationStrategy::reserved_supported() {
            continue;
        }
        let allocator = allocator(strategy, policy);
        group.bench_function(name, |b| {
            b.iter(|| {
                let block = allocator.try_allocate_block().unwrap();
                unsafe { allocator.free_aligned_memory(black_box(block)) };
            });
        });
    }

    group.finish();
}

/// Benchmark the bitmap scan with many blocks already live
fn bench_scan_depth(c: &mut Criterion) {
    if !AllocationStrategy::reserved_supported() {
        return;
    }
    let mut group = c.benchmark_group("block_scan_depth");

    for live in [0usize, 256, 2048, 4000] {
        let allocator = allocator(AllocationStrategy::Reserved, CommitPolicy::Decommit);
        let held: Vec<_> = (0..live).map(|_| allocator.try_allocate_block().unwrap()).collect();

        group.throughput(Throughput::Elements(1));
        group.bench_with_input(BenchmarkId::from_parameter(live), &live, |b, _| {
            b.iter(|| {
                let block = allocator.try_allocate_block().unwrap();
                unsafe { allocator.free_aligned_memory(black_box(block)) };
            });
        });

        for block in held {
            unsafe { allocator.free_aligned_memory(block) };
        }
    }

    group.finish();
}

criterion_group!(benches, bench_alloc_free, bench_scan_depth);
criterion_main!(benches);
