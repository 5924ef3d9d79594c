//! Benchmarks for C1's GF(2^64)/GF(2^128) carry-less multiply and
//! exponentiation, which sit on the hot path of both `verify` (one Horner
//! step per field element of the reconciled key) and anything that needs a
//! field inverse.

use cascade_qkd_core::bitfield::{gf128_mul, gf64_mul, FieldElement};
use criterion::{black_box, criterion_group, criterion_main, Criterion};

fn bench_gf64_mul(c: &mut Criterion) {
    let a = 0xdead_beef_1234_5678u64;
    let b = 0x0bad_c0de_f00d_baadu64;
    c.bench_function("gf64_mul", |bencher| {
        bencher.iter(|| gf64_mul(black_box(a), black_box(b)))
    });
}

fn bench_gf128_mul(c: &mut Criterion) {
    let a = 0x1234_5678_9abc_def1_0011_2233_4455_6677u128;
    let b = 0x0bad_c0de_f00d_baad_f00d_f00d_f00d_f00du128;
    c.bench_function("gf128_mul", |bencher| {
        bencher.iter(|| gf128_mul(black_box(a), black_box(b)))
    });
}

fn bench_gf64_pow(c: &mut Criterion) {
    let r = FieldElement::Gf64(0x1234_5678_9abc_def1);
    c.bench_function("gf64_pow_inverse", |bencher| {
        bencher.iter(|| black_box(r).pow((1u128 << 64) - 2))
    });
}

criterion_group!(benches, bench_gf64_mul, bench_gf128_mul, bench_gf64_pow);
criterion_main!(benches);
