//! Protocol orchestrator (C6).
//!
//! Sequences the pipeline identically on both parties: reconcile (C3),
//! verify (C4), compute the Devetak-Winter final length, amplify (C5).
//! Mirrors the teacher's `crypto_protocols::QKDSession` state shape
//! (`Initializing -> ... -> Completed | Aborted`) and
//! `streamlined_client::StreamlinedSecureClient`'s session-establishment
//! wiring into the ambient logging/monitoring/error-handling layers, but
//! walks the real five-step pipeline instead of the teacher's simulated
//! `exchange_key`.

use async_trait::async_trait;
use bitvec::prelude::*;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::bitfield::FieldWidth;
use crate::cascade::{CascadeConfig, CascadeReconciler, PreSharedSeed};
use crate::channel::AuthenticatedChannel;
use crate::error_handling::{create_error_context, ErrorHandler};
use crate::logging::{log_audit, log_error, log_info, LogCategory, PerformanceTimer};
use crate::privacy_amplification::{
    devetak_winter_length, wilson_score_upper_bound, ToeplitzAmplifier,
};
use crate::production_monitor::ProductionMonitor;
use crate::security_foundation::EntropyService;
use crate::verify::PolynomialVerifier;
use crate::{QkdError, Result, Role};

/// Raw key material handed off by the (out-of-scope) raw-key-distribution
/// front end: two correlated bit vectors plus an estimate of where they
/// disagree.
#[derive(Debug, Clone)]
pub struct RawKeyMaterial {
    pub bits: BitVec<u8, Msb0>,
    pub qber_estimate: f64,
    pub sample_size: u64,
}

/// Opaque boundary to the quantum simulator / EPR / BB84-sifting front end.
/// Its implementation is out of scope for this crate (spec §1); the core
/// only needs one raw key and a QBER estimate per session.
#[async_trait]
pub trait RawKeySource: Send + Sync {
    async fn next_raw_key(&mut self) -> Result<RawKeyMaterial>;
}

/// Session-wide configuration. Defaults match the spec's own test scenarios
/// (§8): `min_key_length = 32`, `abort_threshold ~= 0.11`.
#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    /// QBER above which the orchestrator aborts before invoking Cascade.
    pub abort_threshold: f64,
    /// Minimum acceptable Devetak-Winter final-key length.
    pub min_key_length: u64,
    /// Target distinguishability-from-uniform bound for the final key.
    pub epsilon_sec: f64,
    /// GF(2^n) width used by the polynomial-hash verifier.
    pub field_width: FieldWidth,
    /// Cascade pass count / safety bound.
    pub cascade: CascadeConfig,
    /// Confidence z-score for the Wilson score upper bound on QBER (1.96 ~=
    /// 97.5% one-sided confidence).
    pub wilson_z: f64,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            abort_threshold: 0.11,
            min_key_length: 32,
            epsilon_sec: 1e-12,
            field_width: FieldWidth::Gf64,
            cascade: CascadeConfig::default(),
            wilson_z: 1.96,
        }
    }
}

/// Progression of one party's session. Retained for audit logging; the
/// orchestrator itself does not branch on it beyond the linear walk below.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SessionState {
    Initializing,
    Reconciling,
    Verifying,
    Amplifying,
    Completed,
    Aborted,
}

/// Outbound result (§6): success plus final key, or an explicit abort reason.
/// No secret-dependent information is placed in `reason` per §7's
/// propagation policy — it carries only the `QkdError`'s `Display` text,
/// which is itself secret-independent.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QKDResult {
    pub success: bool,
    pub final_key: Option<BitVec<u8, Msb0>>,
    pub estimated_qber: f64,
    pub leakage_bits: u64,
    pub reason: Option<String>,
    pub reason_code: Option<u8>,
}

impl QKDResult {
    fn aborted(qber: f64, leakage_bits: u64, err: &QkdError) -> Self {
        Self {
            success: false,
            final_key: None,
            estimated_qber: qber,
            leakage_bits,
            reason: Some(err.to_string()),
            reason_code: Some(err.reason_code()),
        }
    }

    fn completed(final_key: BitVec<u8, Msb0>, qber: f64, leakage_bits: u64) -> Self {
        Self {
            success: true,
            final_key: Some(final_key),
            estimated_qber: qber,
            leakage_bits,
            reason: None,
            reason_code: None,
        }
    }
}

/// Owns one session's ambient production layer (circuit breakers, session
/// monitoring) and sequences C3 -> C4 -> C5 for a single run.
pub struct QkdSession {
    config: OrchestratorConfig,
    error_handler: std::sync::Arc<ErrorHandler>,
    monitor: std::sync::Arc<ProductionMonitor>,
}

impl QkdSession {
    pub fn new(config: OrchestratorConfig) -> Self {
        Self {
            config,
            error_handler: std::sync::Arc::new(ErrorHandler::new()),
            monitor: std::sync::Arc::new(crate::production_monitor::create_production_monitor()),
        }
    }

    pub fn with_ambient(
        config: OrchestratorConfig,
        error_handler: std::sync::Arc<ErrorHandler>,
        monitor: std::sync::Arc<ProductionMonitor>,
    ) -> Self {
        Self {
            config,
            error_handler,
            monitor,
        }
    }

    #[must_use]
    pub fn error_handler(&self) -> &ErrorHandler {
        &self.error_handler
    }

    #[must_use]
    pub fn monitor(&self) -> &ProductionMonitor {
        &self.monitor
    }

    /// Run one full session as `role` against `peer_id`. Returns a
    /// `QKDResult` rather than a `Result<_>`: every `QkdError` this pipeline
    /// can raise is fatal for the session but is itself the *answer*, not a
    /// caller-facing failure to propagate with `?` (§7 propagation policy).
    pub async fn run(
        &self,
        role: Role,
        peer_id: &str,
        source: &mut dyn RawKeySource,
        preshared_seed: &PreSharedSeed,
        channel: &mut AuthenticatedChannel,
    ) -> QKDResult {
        let session_id = Uuid::new_v4();

        if !self.error_handler.is_peer_available(peer_id) {
            let err = QkdError::TransportFailure(format!(
                "circuit breaker open for peer {peer_id}"
            ));
            log_error(
                LogCategory::Orchestrator,
                &format!("session {session_id} rejected: peer circuit breaker open"),
            );
            return QKDResult::aborted(0.0, 0, &err);
        }

        let result = self.run_inner(role, peer_id, session_id, source, preshared_seed, channel).await;

        match &result {
            Ok(qkd_result) => {
                self.error_handler.record_success(peer_id);
                self.monitor.record_session(
                    qkd_result.leakage_bits,
                    self.config.cascade.num_passes,
                    true,
                );
                log_audit(
                    "session completed",
                    serde_json::json!({
                        "session_id": session_id.to_string(),
                        "peer_id": peer_id,
                        "leakage_bits": qkd_result.leakage_bits,
                        "qber": qkd_result.estimated_qber,
                    }),
                );
                qkd_result.clone()
            }
            Err((err, qber, leakage_bits)) => {
                let ctx = create_error_context(
                    "run",
                    "orchestrator",
                    Some(session_id.to_string()),
                    err.severity(),
                );
                self.error_handler.record_failure(peer_id, err, ctx);
                self.monitor
                    .record_session(*leakage_bits, self.config.cascade.num_passes, false);
                channel.abort(err.reason_code()).await;
                log_error(
                    LogCategory::Orchestrator,
                    &format!("session {session_id} aborted: {err}"),
                );
                QKDResult::aborted(*qber, *leakage_bits, err)
            }
        }
    }

    /// The linear pipeline walk (§4.6). Returns `Err((err, qber,
    /// leakage_so_far))` on any abort so the caller can still report
    /// accumulated leakage and the observed QBER in the final `QKDResult`.
    async fn run_inner(
        &self,
        role: Role,
        peer_id: &str,
        session_id: Uuid,
        source: &mut dyn RawKeySource,
        preshared_seed: &PreSharedSeed,
        channel: &mut AuthenticatedChannel,
    ) -> std::result::Result<QKDResult, (QkdError, f64, u64)> {
        log_info(
            LogCategory::Orchestrator,
            &format!("session {session_id} starting as {role:?} against {peer_id}"),
        );

        let raw = source.next_raw_key().await.map_err(|e| (e, 0.0, 0u64))?;
        let qber = raw.qber_estimate;

        if qber > self.config.abort_threshold {
            return Err((
                QkdError::QberTooHigh(format!(
                    "estimated QBER {qber:.4} exceeds abort threshold {:.4}",
                    self.config.abort_threshold
                )),
                qber,
                0,
            ));
        }

        let mut reconciled_bits = raw.bits;
        let mut entropy = EntropyService::new(
            vec![crate::security_foundation::EntropySource::SystemRandom],
            3,
        );

        let reconcile_timer = PerformanceTimer::start(LogCategory::Cascade, "reconcile");
        let reconciler = CascadeReconciler::new(self.config.cascade.clone());
        let reconcile_outcome = reconciler
            .reconcile(
                role,
                &mut reconciled_bits,
                qber,
                preshared_seed,
                channel,
            )
            .await
            .map_err(|e| (e, qber, 0u64))?;
        reconcile_timer.finish();
        let mut total_leakage = reconcile_outcome.leakage_bits;

        let verify_timer = PerformanceTimer::start(LogCategory::Verification, "verify");
        let verifier = PolynomialVerifier::new(self.config.field_width);
        let verify_outcome = verifier
            .verify(role, &reconciled_bits, &mut entropy, channel)
            .await
            .map_err(|e| (e, qber, total_leakage))?;
        verify_timer.finish();
        total_leakage += verify_outcome.leakage_bits;

        let n_rec = reconciled_bits.len() as u64;
        let errors_observed = (qber * raw.sample_size as f64).round() as u64;
        let q_upper = wilson_score_upper_bound(errors_observed, raw.sample_size.max(1), self.config.wilson_z);
        let m = devetak_winter_length(n_rec, q_upper, total_leakage, self.config.epsilon_sec);

        let m = match m {
            Some(m) if m >= self.config.min_key_length => m,
            _ => {
                return Err((
                    QkdError::InsufficientEntropy(format!(
                        "devetak-winter bound yields {m:?} bits, below minimum {}",
                        self.config.min_key_length
                    )),
                    qber,
                    total_leakage,
                ))
            }
        };

        let amplify_timer = PerformanceTimer::start(LogCategory::PrivacyAmplification, "amplify");
        let amplifier = ToeplitzAmplifier;
        let amplify_outcome = amplifier
            .amplify(role, &reconciled_bits, m, &mut entropy, channel)
            .await
            .map_err(|e| (e, qber, total_leakage))?;
        amplify_timer.finish();
        total_leakage += amplify_outcome.leakage_bits;

        Ok(QKDResult::completed(
            amplify_outcome.final_key,
            qber,
            total_leakage,
        ))
    }
}

/// A `RawKeySource` that yields a single, pre-computed `RawKeyMaterial` and
/// then errors on any further call. Suitable for the single-session-per-
/// process model tests in this crate exercise; a real deployment's front end
/// produces a fresh key per session.
pub struct StaticRawKeySource(Option<RawKeyMaterial>);

impl StaticRawKeySource {
    pub fn new(material: RawKeyMaterial) -> Self {
        Self(Some(material))
    }
}

#[async_trait]
impl RawKeySource for StaticRawKeySource {
    async fn next_raw_key(&mut self) -> Result<RawKeyMaterial> {
        self.0.take().ok_or_else(|| {
            QkdError::ProtocolError("StaticRawKeySource exhausted".into())
        })
    }
}
