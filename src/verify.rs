//! Polynomial-hash verification (C4).
//!
//! Confirms reconciled-key equality without revealing it: the Initiator
//! samples a random field evaluation point, both parties evaluate a
//! Horner-form GF(2^n) hash of their own reconciled key at that point, and
//! exchange tags symmetrically — the same simplification `cascade` uses for
//! its parity exchange — so each side reaches the same pass/fail decision
//! without an extra signaling frame back to the Initiator.

use bitvec::prelude::*;
use subtle::ConstantTimeEq;

use crate::bitfield::{horner_eval, pack_into_field, FieldElement, FieldWidth};
use crate::channel::{AuthenticatedChannel, FrameBody};
use crate::security_foundation::EntropyService;
use crate::{QkdError, Result, Role};

/// Outcome of a verification round. `leakage_bits` covers the evaluation
/// point and both parties' tags, all transmitted in clear.
#[derive(Debug, Clone)]
pub struct VerificationOutcome {
    pub leakage_bits: u64,
}

pub struct PolynomialVerifier {
    width: FieldWidth,
}

impl PolynomialVerifier {
    pub fn new(width: FieldWidth) -> Self {
        Self { width }
    }

    pub async fn verify(
        &self,
        role: Role,
        reconciled_key: &BitVec<u8, Msb0>,
        entropy: &mut EntropyService,
        channel: &mut AuthenticatedChannel,
    ) -> Result<VerificationOutcome> {
        let width_bits = self.width.bits() as u64;
        let mut leakage_bits = 0u64;

        let r = match role {
            Role::Initiator => {
                let r = sample_nonzero_element(self.width, entropy)?;
                channel
                    .send(FrameBody::VerifyChallenge {
                        evaluation_point: r.to_bytes(),
                    })
                    .await?;
                r
            }
            Role::Responder => {
                let frame = channel.recv_expect("VerifyChallenge").await?;
                let bytes = match frame {
                    FrameBody::VerifyChallenge { evaluation_point } => evaluation_point,
                    _ => unreachable!("recv_expect guarantees the frame kind"),
                };
                FieldElement::from_bytes(self.width, &bytes)
            }
        };
        leakage_bits += width_bits;

        let elements = pack_into_field(reconciled_key, self.width);
        let local_tag_bytes = horner_eval(&elements, r).to_bytes();

        channel
            .send(FrameBody::VerifyTag {
                tag: local_tag_bytes.clone(),
            })
            .await?;
        leakage_bits += width_bits;

        let peer_frame = channel.recv_expect("VerifyTag").await?;
        let peer_tag_bytes = match peer_frame {
            FrameBody::VerifyTag { tag } => tag,
            _ => unreachable!("recv_expect guarantees the frame kind"),
        };
        leakage_bits += width_bits;

        if local_tag_bytes.ct_eq(&peer_tag_bytes).unwrap_u8() != 1 {
            return Err(QkdError::VerificationFailed(
                "polynomial hash tags disagree".into(),
            ));
        }

        Ok(VerificationOutcome { leakage_bits })
    }
}

/// Rejection-samples a nonzero evaluation point. A zero point would make
/// `horner_eval` degenerate to 0 regardless of key content.
fn sample_nonzero_element(width: FieldWidth, entropy: &mut EntropyService) -> Result<FieldElement> {
    for _ in 0..16 {
        let bytes = entropy.generate_bytes(width.bits() / 8)?;
        let element = FieldElement::from_bytes(width, &bytes);
        if !element.is_zero() {
            return Ok(element);
        }
    }
    Err(QkdError::InsufficientEntropy(
        "failed to sample a nonzero field element after 16 attempts".into(),
    ))
}
