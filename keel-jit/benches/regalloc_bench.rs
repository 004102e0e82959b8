//! Register allocator benchmarks using criterion.
//!
//! Run with: cargo bench --bench regalloc_bench

use keel_jit::arch::{aarch64, x86_64};
use keel_jit::RegisterAllocator;
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};

/// Benchmark allocation with free registers available
fn bench_allocate_free(c: &mut Criterion) {
    let mut group = c.benchmark_group("regalloc_allocate_free");

    group.bench_function("x86_64_fill_bank", |b| {
        b.iter(|| {
            let mut regs =
                RegisterAllocator::<x86_64::Gpr, u32>::with_registers(x86_64::allocatable_gprs());
            let mut sink = |_: x86_64::Gpr, _: u32| {};
            for v in 0..13 {
                black_box(regs.allocate(v, Some(v), None, &mut sink));
            }
            regs
        });
    });

    group.finish();
}

/// Benchmark allocation under pressure, where every request evicts
fn bench_allocate_evict(c: &mut Criterion) {
    let mut group = c.benchmark_group("regalloc_evict");

    for ops in [16u32, 256, 4096] {
        group.throughput(Throughput::Elements(ops as u64));
        group.bench_with_input(BenchmarkId::new("aarch64", ops), &ops, |b, &ops| {
            b.iter(|| {
                let bank = aarch64::allocatable_gprs();
                let mut regs = RegisterAllocator::<aarch64::XReg, u32>::with_registers(bank);
                let mut spilled = 0u32;
                let mut sink = |_: aarch64::XReg, v: u32| spilled = spilled.wrapping_add(v);
                for v in 0..ops {
                    let hint = v.wrapping_mul(2654435761) >> 24;
                    let reg = regs.allocate(v, Some(hint), None, &mut sink);
                    regs.lock(reg);
                    regs.unlock(reg);
                }
                drop(sink);
                black_box(spilled)
            });
        });
    }

    group.finish();
}

/// Benchmark flushing the whole bank at a join point
fn bench_flush_all(c: &mut Criterion) {
    c.bench_function("regalloc_flush_all", |b| {
        b.iter(|| {
            let mut regs =
                RegisterAllocator::<x86_64::Xmm, u32>::with_registers(x86_64::allocatable_fprs());
            let mut sink = |_: x86_64::Xmm, v: u32| {
                black_box(v);
            };
            for v in 0..15 {
                regs.allocate(v, None, None, &mut sink);
            }
            regs.flush_all_registers(&mut sink);
            regs
        });
    });
}

criterion_group!(benches, bench_allocate_free, bench_allocate_evict, bench_flush_all);
criterion_main!(benches);
