//! Benchmarks the dominant cost of C3: a full multi-pass Cascade run between
//! two in-process parties over a paired `AuthenticatedChannel`, at a couple
//! of representative key sizes and error rates.

use bitvec::prelude::*;
use cascade_qkd_core::cascade::{CascadeConfig, CascadeReconciler, PreSharedSeed};
use cascade_qkd_core::channel::{AuthenticatedChannel, SharedChannelKey};
use cascade_qkd_core::Role;
use criterion::{criterion_group, criterion_main, Criterion};
use rand::{RngCore, SeedableRng};
use rand_chacha::ChaCha20Rng;
use tokio::runtime::Runtime;

fn random_bits(n: usize, rng: &mut impl RngCore) -> BitVec<u8, Msb0> {
    let mut bits = BitVec::<u8, Msb0>::with_capacity(n);
    for _ in 0..n {
        bits.push(rng.next_u32() & 1 == 1);
    }
    bits
}

fn with_errors(bits: &BitVec<u8, Msb0>, rate: f64, rng: &mut impl RngCore) -> BitVec<u8, Msb0> {
    let mut out = bits.clone();
    for mut b in out.iter_mut() {
        if (rng.next_u32() as f64 / u32::MAX as f64) < rate {
            let v = *b;
            *b = !v;
        }
    }
    out
}

fn run_reconciliation(n: usize, qber: f64) {
    let rt = Runtime::new().unwrap();
    rt.block_on(async move {
        let mut rng = ChaCha20Rng::seed_from_u64(42);
        let a_bits = random_bits(n, &mut rng);
        let mut b_bits = with_errors(&a_bits, qber, &mut rng);
        let mut a_bits_mut = a_bits.clone();

        let seed = PreSharedSeed::new(vec![3u8; 32]);
        let key = SharedChannelKey::new(vec![4u8; 32]).unwrap();
        let (mut chan_a, mut chan_b) = AuthenticatedChannel::paired(key, 256);
        let reconciler_a = CascadeReconciler::new(CascadeConfig::default());
        let reconciler_b = CascadeReconciler::new(CascadeConfig::default());

        let (res_a, res_b) = tokio::join!(
            reconciler_a.reconcile(Role::Initiator, &mut a_bits_mut, qber, &seed, &mut chan_a),
            reconciler_b.reconcile(Role::Responder, &mut b_bits, qber, &seed, &mut chan_b),
        );
        res_a.unwrap();
        res_b.unwrap();
    });
}

fn benchmark_small_key_low_error(c: &mut Criterion) {
    c.bench_function("cascade_1024_qber_0.02", |b| {
        b.iter(|| run_reconciliation(1024, 0.02))
    });
}

fn benchmark_large_key_moderate_error(c: &mut Criterion) {
    c.bench_function("cascade_4096_qber_0.05", |b| {
        b.iter(|| run_reconciliation(4096, 0.05))
    });
}

criterion_group!(
    benches,
    benchmark_small_key_low_error,
    benchmark_large_key_moderate_error
);
criterion_main!(benches);
