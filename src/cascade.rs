//! Cascade information reconciliation (C3).
//!
//! Explicit-barrier variant with intra-barrier backtracking (see
//! `DESIGN.md`): a `CascadePassSync` frame closes every pass, and
//! backtracking only re-tests blocks of already-completed passes, never
//! reaches into the in-flight pass. Both parties run identical code; only
//! the Responder actually flips corrected bits, matching the convention
//! fixed in the component design.

use bitvec::prelude::*;
use hkdf::Hkdf;
use rand::SeedableRng;
use rand::seq::SliceRandom;
use rand_chacha::ChaCha20Rng;
use sha3::Sha3_256;
use smallvec::SmallVec;
use zeroize::Zeroizing;

/// Inline capacity for a Cascade block's index list. Block sizes start at
/// `n/4` or `0.73/QBER` and only grow, so early, numerous small blocks are
/// the common case this avoids a heap allocation for.
type BlockIndices = SmallVec<[usize; 32]>;

use crate::bitfield::parity_over_indices;
use crate::channel::{AuthenticatedChannel, FrameBody};
use crate::{QkdError, Result, Role};

/// Deterministic shared randomness source for per-pass permutations. Must be
/// identical on both parties; distinct from any raw key material.
#[derive(Clone)]
pub struct PreSharedSeed(std::sync::Arc<Zeroizing<Vec<u8>>>);

impl PreSharedSeed {
    pub fn new(bytes: Vec<u8>) -> Self {
        Self(std::sync::Arc::new(Zeroizing::new(bytes)))
    }
}

/// Configuration knobs for the reconciler. `num_passes` is P in the spec;
/// `max_passes` is the implementation safety bound distinct from P that
/// guards against pathological, non-converging inputs.
#[derive(Debug, Clone)]
pub struct CascadeConfig {
    pub num_passes: u32,
    pub max_passes: u32,
}

impl Default for CascadeConfig {
    fn default() -> Self {
        Self {
            num_passes: 4,
            max_passes: 8,
        }
    }
}

/// Outcome of a full reconciliation run: leakage accounting is mandatory,
/// never optional, per the spec's leakage-counting design note.
#[derive(Debug, Clone)]
pub struct ReconciliationOutcome {
    pub leakage_bits: u64,
}

/// One completed pass's permutation/block structure, retained for
/// backtracking.
struct PassState {
    /// For each block, the original-index members of that block.
    block_ranges: Vec<BlockIndices>,
}

impl PassState {
    fn block_containing(&self, index: usize) -> (usize, &[usize]) {
        self.block_ranges
            .iter()
            .enumerate()
            .find(|(_, block)| block.contains(&index))
            .map(|(i, block)| (i, block.as_slice()))
            .expect("every index belongs to exactly one block per pass")
    }
}

pub struct CascadeReconciler {
    config: CascadeConfig,
}

impl CascadeReconciler {
    pub fn new(config: CascadeConfig) -> Self {
        Self { config }
    }

    /// Run reconciliation to completion on `local_bits` (mutated in place
    /// for the Responder role; read-only reference data for the Initiator).
    pub async fn reconcile(
        &self,
        role: Role,
        local_bits: &mut BitVec<u8, Msb0>,
        qber_estimate: f64,
        preshared_seed: &PreSharedSeed,
        channel: &mut AuthenticatedChannel,
    ) -> Result<ReconciliationOutcome> {
        let n = local_bits.len();
        if n == 0 {
            return Ok(ReconciliationOutcome { leakage_bits: 0 });
        }

        let mut leakage_bits: u64 = 0;
        let mut history: Vec<PassState> = Vec::new();
        let mut block_size = initial_block_size(qber_estimate, n);

        if self.config.num_passes > self.config.max_passes {
            return Err(QkdError::ReconciliationDivergence(
                "num_passes exceeds max_passes".into(),
            ));
        }

        for pass_index in 0..self.config.num_passes {
            let permutation = derive_permutation(preshared_seed, pass_index, n);
            let blocks = build_blocks(&permutation, block_size);

            for (block_index, indices) in blocks.iter().enumerate() {
                let local_parity = parity_over_indices(local_bits, indices);
                let mismatch = exchange_and_compare(
                    channel,
                    local_parity,
                    |bit| FrameBody::CascadePassParity {
                        pass_index,
                        block_index: block_index as u32,
                        parity_bit: bit,
                    },
                    "CascadePassParity",
                )
                .await?;
                leakage_bits += 2;

                if mismatch {
                    let located = binary_search_localize(
                        channel,
                        local_bits,
                        indices,
                        &mut leakage_bits,
                    )
                    .await?;
                    if role == Role::Responder {
                        flip(local_bits, located);
                    }

                    backtrack(
                        channel,
                        role,
                        local_bits,
                        &history,
                        located,
                        &mut leakage_bits,
                    )
                    .await?;
                }
            }

            history.push(PassState {
                block_ranges: blocks,
            });

            // Barrier: both parties confirm pass completion before starting
            // the next pass's permutation derivation.
            exchange_and_compare(
                channel,
                0,
                |_| FrameBody::CascadePassSync { pass_index },
                "CascadePassSync",
            )
            .await?;

            block_size = (block_size * 2).min(n.max(1));
        }

        Ok(ReconciliationOutcome { leakage_bits })
    }
}

fn initial_block_size(qber_estimate: f64, n: usize) -> usize {
    let by_qber = if qber_estimate > 0.0 {
        (0.73 / qber_estimate).floor() as i64
    } else {
        i64::MAX
    };
    let by_n = (n / 4) as i64;
    (4i64.max(by_qber.min(by_n.max(1)))) as usize
}

fn derive_permutation(seed: &PreSharedSeed, pass_index: u32, n: usize) -> Vec<usize> {
    let identity: Vec<usize> = (0..n).collect();
    if pass_index == 0 {
        return identity;
    }

    let hk = Hkdf::<Sha3_256>::new(None, &seed.0);
    let mut okm = [0u8; 32];
    let info = format!("cascade-pass{pass_index}");
    hk.expand(info.as_bytes(), &mut okm)
        .expect("32 bytes is a valid HKDF-SHA3-256 output length");

    let mut rng = ChaCha20Rng::from_seed(okm);
    let mut permuted = identity;
    permuted.shuffle(&mut rng);
    permuted
}

fn build_blocks(permutation: &[usize], block_size: usize) -> Vec<BlockIndices> {
    permutation
        .chunks(block_size.max(1))
        .map(BlockIndices::from_slice)
        .collect()
}

fn flip(bits: &mut BitVec<u8, Msb0>, index: usize) {
    let current = bits[index];
    bits.set(index, !current);
}

/// Both parties announce their local parity bit for the same index set and
/// compare. Leakage is counted by the caller at two bits per round: both
/// directions carry a parity bit on the wire, and on mismatch the two values
/// disagree, so an eavesdropper observing both frames learns two absolute
/// bits, not one.
async fn exchange_and_compare(
    channel: &mut AuthenticatedChannel,
    local_bit: u8,
    make_frame: impl Fn(u8) -> FrameBody,
    expected_kind: &'static str,
) -> Result<bool> {
    channel.send(make_frame(local_bit)).await?;
    let peer_frame = channel.recv_expect(expected_kind).await?;
    let peer_bit = extract_bit(&peer_frame)?;
    Ok(peer_bit != local_bit)
}

fn extract_bit(frame: &FrameBody) -> Result<u8> {
    match frame {
        FrameBody::CascadePassParity { parity_bit, .. } => Ok(*parity_bit),
        FrameBody::CascadeBinSearchParity { subrange_parity_bit } => Ok(*subrange_parity_bit),
        FrameBody::CascadeBacktrackParity { parity_bit, .. } => Ok(*parity_bit),
        FrameBody::CascadePassSync { .. } => Ok(0),
        other => Err(QkdError::ProtocolError(format!(
            "unexpected frame in cascade exchange: {:?}",
            other.kind()
        ))),
    }
}

/// Recursively halves `indices` until a single disagreeing position is
/// found. Implemented iteratively to avoid async recursion.
async fn binary_search_localize(
    channel: &mut AuthenticatedChannel,
    local_bits: &BitVec<u8, Msb0>,
    indices: &[usize],
    leakage_bits: &mut u64,
) -> Result<usize> {
    let mut current = indices.to_vec();
    while current.len() > 1 {
        let mid = current.len() / 2;
        let left = &current[..mid];
        let local_parity = parity_over_indices(local_bits, left);
        let mismatch = exchange_and_compare(
            channel,
            local_parity,
            |bit| FrameBody::CascadeBinSearchParity {
                subrange_parity_bit: bit,
            },
            "CascadeBinSearchParity",
        )
        .await?;
        *leakage_bits += 2;

        current = if mismatch {
            left.to_vec()
        } else {
            current[mid..].to_vec()
        };
    }
    Ok(current[0])
}

/// Single backward sweep through already-completed passes, carrying forward
/// whichever position most recently needed correction. A mismatch in an
/// older pass's block replaces `current` with the newly localized position
/// before continuing into yet-older passes, which is how a correction in
/// pass j cascades into pass j' < j.
async fn backtrack(
    channel: &mut AuthenticatedChannel,
    role: Role,
    local_bits: &mut BitVec<u8, Msb0>,
    history: &[PassState],
    located: usize,
    leakage_bits: &mut u64,
) -> Result<()> {
    let mut current = located;
    for (pass_index, pass_state) in history.iter().enumerate().rev() {
        let (block_index, block) = pass_state.block_containing(current);
        let local_parity = parity_over_indices(local_bits, block);
        let pass_index = pass_index as u32;
        let block_index = block_index as u32;
        let mismatch = exchange_and_compare(
            channel,
            local_parity,
            |bit| FrameBody::CascadeBacktrackParity {
                pass_index,
                block_index,
                parity_bit: bit,
            },
            "CascadeBacktrackParity",
        )
        .await?;
        *leakage_bits += 2;

        if mismatch {
            let relocated = binary_search_localize(channel, local_bits, block, leakage_bits).await?;
            if role == Role::Responder {
                flip(local_bits, relocated);
            }
            current = relocated;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::SharedChannelKey;
    use rand::RngCore;

    fn make_seed() -> PreSharedSeed {
        PreSharedSeed::new(vec![42u8; 32])
    }

    fn channel_key() -> SharedChannelKey {
        SharedChannelKey::new(vec![9u8; 32]).unwrap()
    }

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

    #[tokio::test]
    async fn reconciles_low_error_rate_keys() {
        let mut rng = ChaCha20Rng::seed_from_u64(1);
        let n = 256;
        let a_bits = random_bits(n, &mut rng);
        let mut b_bits = with_errors(&a_bits, 0.02, &mut rng);
        let mut a_bits_mut = a_bits.clone();

        let seed = make_seed();
        let (mut chan_a, mut chan_b) = AuthenticatedChannel::paired(channel_key(), 64);
        let reconciler_a = CascadeReconciler::new(CascadeConfig::default());
        let reconciler_b = CascadeReconciler::new(CascadeConfig::default());

        let (res_a, res_b) = tokio::join!(
            reconciler_a.reconcile(Role::Initiator, &mut a_bits_mut, 0.02, &seed, &mut chan_a),
            reconciler_b.reconcile(Role::Responder, &mut b_bits, 0.02, &seed, &mut chan_b),
        );

        let outcome_a = res_a.unwrap();
        let outcome_b = res_b.unwrap();
        assert!(outcome_a.leakage_bits > 0);
        assert!(outcome_b.leakage_bits > 0);
        assert_eq!(a_bits_mut, b_bits);
    }

    #[test]
    fn initial_block_size_clamps_for_zero_qber() {
        assert_eq!(initial_block_size(0.0, 1024), 1024 / 4);
    }

    #[test]
    fn initial_block_size_has_floor_of_four() {
        assert_eq!(initial_block_size(0.9, 16), 4);
    }
}
