//! Toeplitz-hash privacy amplification (C5).
//!
//! Compresses the reconciled key down to the Devetak-Winter secure-key
//! length using a 2-universal Toeplitz hash family: the Leftover Hash Lemma
//! then bounds the final key's distinguishability from uniform by the
//! session's `epsilon_sec`.

use bitvec::prelude::*;

use crate::channel::{AuthenticatedChannel, FrameBody};
use crate::security_foundation::EntropyService;
use crate::{QkdError, Result, Role};

/// Binary Shannon entropy, h(p) = -p*log2(p) - (1-p)*log2(1-p). Defined to be
/// 0 at the endpoints, where the usual formula would evaluate 0*log2(0).
pub fn binary_entropy(p: f64) -> f64 {
    if p <= 0.0 || p >= 1.0 {
        return 0.0;
    }
    -(p * p.log2() + (1.0 - p) * (1.0 - p).log2())
}

/// One-sided Wilson score upper confidence bound on the true error rate,
/// given `errors` observed in `sample_size` trials at confidence `z`
/// (1.96 for ~97.5% one-sided confidence).
pub fn wilson_score_upper_bound(errors: u64, sample_size: u64, z: f64) -> f64 {
    if sample_size == 0 {
        return 1.0;
    }
    let n = sample_size as f64;
    let phat = errors as f64 / n;
    let z2 = z * z;
    let denom = 1.0 + z2 / n;
    let center = phat + z2 / (2.0 * n);
    let spread = z * ((phat * (1.0 - phat) / n) + z2 / (4.0 * n * n)).sqrt();
    ((center + spread) / denom).min(1.0)
}

/// Computes the Devetak-Winter final key length in bits. Returns `None` when
/// the bound is non-positive (leakage and the security margin already
/// consume the entire reconciled key).
pub fn devetak_winter_length(
    n_rec: u64,
    q_upper: f64,
    total_leakage_bits: u64,
    epsilon_sec: f64,
) -> Option<u64> {
    let raw = n_rec as f64 * (1.0 - binary_entropy(q_upper))
        - total_leakage_bits as f64
        - 2.0 * (1.0 / epsilon_sec).log2();
    if raw <= 0.0 {
        None
    } else {
        Some(raw.floor() as u64)
    }
}

/// Outcome of a completed amplification round.
#[derive(Debug, Clone)]
pub struct AmplificationOutcome {
    pub final_key: BitVec<u8, Msb0>,
    pub leakage_bits: u64,
}

pub struct ToeplitzAmplifier;

impl ToeplitzAmplifier {
    /// Compresses `reconciled_key` (length n_rec) to a final key of length
    /// `m`. The Initiator samples the seed; the Responder receives it over
    /// the channel. Both construct and apply the same matrix.
    pub async fn amplify(
        &self,
        role: Role,
        reconciled_key: &BitVec<u8, Msb0>,
        m: u64,
        entropy: &mut EntropyService,
        channel: &mut AuthenticatedChannel,
    ) -> Result<AmplificationOutcome> {
        let n_rec = reconciled_key.len() as u64;
        let seed_len = n_rec + m - 1;

        let seed = match role {
            Role::Initiator => {
                let seed = sample_seed(seed_len, entropy)?;
                channel
                    .send(FrameBody::PaSeed {
                        seed: bits_to_bytes(&seed),
                    })
                    .await?;
                seed
            }
            Role::Responder => {
                let frame = channel.recv_expect("PaSeed").await?;
                let bytes = match frame {
                    FrameBody::PaSeed { seed } => seed,
                    _ => unreachable!("recv_expect guarantees the frame kind"),
                };
                bytes_to_bits(&bytes, seed_len as usize)
            }
        };

        let final_key = toeplitz_multiply(&seed, reconciled_key, m as usize);

        Ok(AmplificationOutcome {
            final_key,
            leakage_bits: seed_len,
        })
    }
}

fn sample_seed(len: u64, entropy: &mut EntropyService) -> Result<BitVec<u8, Msb0>> {
    let byte_len = (len as usize).div_ceil(8);
    let bytes = entropy.generate_bytes(byte_len)?;
    Ok(bytes_to_bits(&bytes, len as usize))
}

fn bits_to_bytes(bits: &BitSlice<u8, Msb0>) -> Vec<u8> {
    let mut out = vec![0u8; bits.len().div_ceil(8)];
    for (i, b) in bits.iter().enumerate() {
        if *b {
            out[i / 8] |= 1 << (7 - (i % 8));
        }
    }
    out
}

fn bytes_to_bits(bytes: &[u8], len: usize) -> BitVec<u8, Msb0> {
    let mut out = BitVec::<u8, Msb0>::from_vec(bytes.to_vec());
    out.truncate(len);
    out
}

/// `T(seed) * reconciled_key` over GF(2), where `T[i][c] = seed[i - c +
/// (n_rec - 1)]` is constant along each diagonal. For fixed row `i`, as `c`
/// ranges over `0..n_rec` the seed index sweeps the contiguous window
/// `seed[i .. i+n_rec]` in reverse, so each output bit is computed as a
/// sliding XOR-AND over that window rather than a dense matrix-vector
/// product.
fn toeplitz_multiply(
    seed: &BitSlice<u8, Msb0>,
    reconciled_key: &BitSlice<u8, Msb0>,
    m: usize,
) -> BitVec<u8, Msb0> {
    let n_rec = reconciled_key.len();
    let mut out = BitVec::<u8, Msb0>::with_capacity(m);
    for i in 0..m {
        let window = &seed[i..i + n_rec];
        let mut acc = false;
        for c in 0..n_rec {
            acc ^= window[n_rec - 1 - c] && reconciled_key[c];
        }
        out.push(acc);
    }
    out
}
