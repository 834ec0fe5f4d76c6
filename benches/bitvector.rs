#![allow(unused)]
extern crate trivm;

use criterion::{criterion_group, criterion_main, Criterion, Throughput};
use std::hint::black_box;
use trivm::{BitVector, BitVectorPool, Trilean, VirtualMemory};

/// Bitwise operations over fully-known and partially-unknown 64-bit vectors.
fn bench_bitwise(c: &mut Criterion) {
    let known = BitVector::from_i64(0x0123_4567_89AB_CDEF);
    let mut partial = BitVector::from_i64(0x0F0F_0F0F_0F0F_0F0F);
    partial.set_bit(17, Trilean::Unknown);
    partial.set_bit(42, Trilean::Unknown);

    let mut group = c.benchmark_group("bitwise_and");
    group.throughput(Throughput::Bytes(8));
    group.bench_function("fully_known", |b| {
        b.iter(|| {
            let mut target = known.clone();
            target
                .as_span_mut()
                .and(&black_box(&known).as_span())
                .unwrap();
            black_box(target)
        });
    });
    group.bench_function("partially_unknown", |b| {
        b.iter(|| {
            let mut target = partial.clone();
            target
                .as_span_mut()
                .and(&black_box(&known).as_span())
                .unwrap();
            black_box(target)
        });
    });
    group.finish();
}

/// Addition through the native fast path versus the trilean ripple adder.
fn bench_add(c: &mut Criterion) {
    let known = BitVector::from_i64(0x1111_2222_3333_4444);
    let mut partial = known.clone();
    partial.set_bit(5, Trilean::Unknown);

    let mut group = c.benchmark_group("integer_add");
    group.bench_function("native_fast_path", |b| {
        b.iter(|| {
            let mut target = known.clone();
            target
                .as_span_mut()
                .integer_add(&black_box(&known).as_span())
                .unwrap();
            black_box(target)
        });
    });
    group.bench_function("ripple_adder", |b| {
        b.iter(|| {
            let mut target = partial.clone();
            target
                .as_span_mut()
                .integer_add(&black_box(&known).as_span())
                .unwrap();
            black_box(target)
        });
    });
    group.finish();
}

/// Shifts through the native fast path versus the general bit-by-bit path.
fn bench_shift(c: &mut Criterion) {
    let known = BitVector::from_i64(-12345);
    let mut partial = known.clone();
    partial.set_bit(63, Trilean::Unknown);

    let mut group = c.benchmark_group("shift_right_signed");
    group.bench_function("native_fast_path", |b| {
        b.iter(|| {
            let mut target = known.clone();
            target.as_span_mut().shift_right(black_box(7), true);
            black_box(target)
        });
    });
    group.bench_function("general_path", |b| {
        b.iter(|| {
            let mut target = partial.clone();
            target.as_span_mut().shift_right(black_box(7), true);
            black_box(target)
        });
    });
    group.finish();
}

/// Pool rent/release versus raw allocation in the dispatch hot path shape.
fn bench_pool(c: &mut Criterion) {
    let mut group = c.benchmark_group("pool");
    group.bench_function("rent_release", |b| {
        let mut pool = BitVectorPool::new();
        b.iter(|| {
            let vector = pool.rent(64, false);
            pool.release(black_box(vector));
        });
    });
    group.bench_function("raw_alloc", |b| {
        b.iter(|| black_box(BitVector::new(64, false)));
    });
    group.finish();
}

/// Virtual memory round trips, within and across page boundaries.
fn bench_memory(c: &mut Criterion) {
    let mut memory = VirtualMemory::new();
    memory.write_bytes(0x4000, &[0xAA; 256]);

    let mut group = c.benchmark_group("virtual_memory");
    group.throughput(Throughput::Bytes(64));
    group.bench_function("read_mapped", |b| {
        let mut buffer = BitVector::new(64 * 8, false);
        b.iter(|| {
            memory.read(black_box(0x4000), &mut buffer.as_span_mut());
            black_box(&buffer);
        });
    });
    group.bench_function("read_unmapped", |b| {
        let mut buffer = BitVector::new(64 * 8, false);
        b.iter(|| {
            memory.read(black_box(0x9_0000), &mut buffer.as_span_mut());
            black_box(&buffer);
        });
    });
    group.finish();
}

criterion_group!(
    benches,
    bench_bitwise,
    bench_add,
    bench_shift,
    bench_pool,
    bench_memory
);
criterion_main!(benches);
