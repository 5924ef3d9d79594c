//! # Cascade QKD Core
//!
//! Post-processing core for a two-party BB84 quantum key distribution
//! pipeline: two correlated, partially-erroneous raw key bit vectors go in,
//! an information-theoretically-secure shared symmetric key comes out (or an
//! explicit abort reason, when noise or adversarial interference exceed
//! tolerance).
//!
//! ## Pipeline
//!
//! The raw-key-distribution front end (quantum simulator, EPR-pair
//! generation and measurement, BB84 basis sifting) is out of scope and
//! modeled as an opaque [`orchestrator::RawKeySource`]. Everything downstream
//! of sifting lives here, run identically on both parties (differing only in
//! [`Role`]):
//!
//! 1. [`bitfield`] — GF(2^n) arithmetic and bit-vector packing shared by
//!    verification and privacy amplification.
//! 2. [`channel`] — HMAC-SHA3-256-authenticated framed messaging with
//!    per-direction sequence counters.
//! 3. [`cascade`] — Brassard-Salvail Cascade reconciliation: shuffled-block
//!    parity correction, binary-search localization, bounded backtracking.
//! 4. [`verify`] — polynomial-hash equality check over GF(2^n) to catch
//!    residual reconciliation errors.
//! 5. [`privacy_amplification`] — Toeplitz-hash compression to the
//!    Devetak-Winter secure-key length.
//! 6. [`orchestrator`] — sequences 3-5, owns session state and the abort
//!    decision.
//!
//! Ambient production hardening ([`error_handling`], [`logging`],
//! [`production_monitor`], [`security_foundation`]) carries over the
//! teacher's circuit-breaker, structured-logging, health-monitoring and
//! entropy/threat-detection layers, generalized to this pipeline's own
//! stages and error kinds; see `DESIGN.md` for the full grounding ledger.

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub mod bitfield;
pub mod cascade;
pub mod channel;
pub mod error_handling;
pub mod logging;
pub mod orchestrator;
pub mod privacy_amplification;
pub mod production_monitor;
pub mod security_foundation;
pub mod verify;

pub use orchestrator::{QKDResult, QkdSession};

/// Which of the two correlated raw keys this process holds. Fixes, among
/// other things, which party flips corrected bits during Cascade (the
/// Responder) and which samples session randomness (the Initiator).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Role {
    Initiator,
    Responder,
}

/// The seven fatal error kinds a session can terminate with (§7 of the
/// design). All are terminal for the session in which they occur; recovery
/// is the caller's responsibility via a fresh session with fresh raw key
/// material.
#[derive(Error, Debug, Clone, Serialize, Deserialize)]
pub enum QkdError {
    /// Estimated QBER exceeds the abort threshold before reconciliation even
    /// starts.
    #[error("QBER too high: {0}")]
    QberTooHigh(String),

    /// Cascade failed to converge within the configured pass budget.
    #[error("reconciliation failed to converge: {0}")]
    ReconciliationDivergence(String),

    /// Post-reconciliation polynomial-hash tags disagree.
    #[error("verification failed: {0}")]
    VerificationFailed(String),

    /// Computed Devetak-Winter final key length is below `MIN_KEY_LENGTH`.
    #[error("insufficient entropy for a secure key: {0}")]
    InsufficientEntropy(String),

    /// HMAC authentication failed on an inbound frame.
    #[error("integrity failure: {0}")]
    IntegrityFailure(String),

    /// The underlying channel closed or produced corrupt data.
    #[error("transport failure: {0}")]
    TransportFailure(String),

    /// Unexpected message type or sequence number at a protocol turn.
    #[error("protocol error: {0}")]
    ProtocolError(String),
}

impl QkdError {
    /// Stable, secret-independent reason code for `QKDResult` and for the
    /// wire-level `Abort` frame. No information about key material or
    /// intermediate state is encoded here, per §7's propagation policy.
    pub fn reason_code(&self) -> u8 {
        match self {
            QkdError::QberTooHigh(_) => 1,
            QkdError::ReconciliationDivergence(_) => 2,
            QkdError::VerificationFailed(_) => 3,
            QkdError::InsufficientEntropy(_) => 4,
            QkdError::IntegrityFailure(_) => 5,
            QkdError::TransportFailure(_) => 6,
            QkdError::ProtocolError(_) => 7,
        }
    }
}

/// Result type used throughout the pipeline.
pub type Result<T> = std::result::Result<T, QkdError>;
