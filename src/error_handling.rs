//! Production error hardening: circuit breakers, error statistics and
//! structured error context for every [`crate::QkdError`] a session raises.
//!
//! Every `QkdError` kind in this crate is fatal for the session in which it
//! occurs (§7 of the design) — there is no in-session retry path. What
//! survives from the teacher's generic `error_handling` module is the
//! per-peer circuit breaker: repeated session failures against the same peer
//! should stop that peer from being retried immediately, independent of any
//! single session's outcome. The teacher's `RetryConfig`/backoff scheduling
//! is dropped (see `DESIGN.md`) since it modeled retrying *within* an
//! operation, which does not apply here.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use backtrace::Backtrace;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::{error, warn};

use crate::QkdError;

/// Severity associated with a failed session, used to decide whether an
/// [`AlertEvent`] should be raised.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum SecuritySeverity {
    Low,
    Medium,
    High,
    Critical,
}

impl std::fmt::Display for SecuritySeverity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SecuritySeverity::Low => write!(f, "low"),
            SecuritySeverity::Medium => write!(f, "medium"),
            SecuritySeverity::High => write!(f, "high"),
            SecuritySeverity::Critical => write!(f, "critical"),
        }
    }
}

impl QkdError {
    /// Severity classification used for circuit-breaking and alerting.
    /// `IntegrityFailure` is always `Critical` — it is the strongest signal
    /// of active tampering this crate can observe.
    pub fn severity(&self) -> SecuritySeverity {
        match self {
            QkdError::IntegrityFailure(_) => SecuritySeverity::Critical,
            QkdError::ReconciliationDivergence(_) => SecuritySeverity::High,
            QkdError::VerificationFailed(_) => SecuritySeverity::High,
            QkdError::TransportFailure(_) => SecuritySeverity::Medium,
            QkdError::ProtocolError(_) => SecuritySeverity::Medium,
            QkdError::QberTooHigh(_) => SecuritySeverity::Low,
            QkdError::InsufficientEntropy(_) => SecuritySeverity::Low,
        }
    }
}

/// Contextual metadata attached to a failure at the point it crosses the
/// orchestrator boundary.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorContext {
    pub operation: String,
    pub component: String,
    pub session_id: Option<String>,
    pub timestamp: DateTime<Utc>,
    #[serde(skip)]
    pub stack_trace: Option<String>,
}

/// Build an [`ErrorContext`], capturing a backtrace for `Critical`/`High`
/// severity failures only (backtrace capture is not free and is not useful
/// for routine aborts like `QberTooHigh`).
pub fn create_error_context(
    operation: &str,
    component: &str,
    session_id: Option<String>,
    severity: SecuritySeverity,
) -> ErrorContext {
    let stack_trace = if severity >= SecuritySeverity::High {
        Some(format!("{:?}", Backtrace::new()))
    } else {
        None
    };

    ErrorContext {
        operation: operation.to_string(),
        component: component.to_string(),
        session_id,
        timestamp: Utc::now(),
        stack_trace,
    }
}

/// Circuit breaker state, one per peer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CircuitBreakerState {
    Closed,
    Open,
    HalfOpen,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CircuitBreakerConfig {
    pub failure_threshold: u32,
    pub failure_window: Duration,
    pub recovery_timeout: Duration,
    pub success_threshold: u32,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            failure_window: Duration::from_secs(60),
            recovery_timeout: Duration::from_secs(30),
            success_threshold: 3,
        }
    }
}

/// Tracks consecutive session failures against one peer and trips to `Open`
/// once `failure_threshold` is exceeded within `failure_window`, independent
/// of which `QkdError` kind caused each failure.
#[derive(Debug)]
pub struct CircuitBreaker {
    config: CircuitBreakerConfig,
    state: CircuitBreakerState,
    failure_count: u32,
    success_count: u32,
    window_start: Instant,
    opened_at: Option<Instant>,
}

impl CircuitBreaker {
    pub fn new(config: CircuitBreakerConfig) -> Self {
        Self {
            config,
            state: CircuitBreakerState::Closed,
            failure_count: 0,
            success_count: 0,
            window_start: Instant::now(),
            opened_at: None,
        }
    }

    pub fn state(&self) -> CircuitBreakerState {
        self.state
    }

    pub fn failure_count(&self) -> u32 {
        self.failure_count
    }

    /// Whether a new session against this peer may proceed.
    pub fn can_execute(&mut self) -> bool {
        match self.state {
            CircuitBreakerState::Closed => true,
            CircuitBreakerState::Open => {
                if let Some(opened_at) = self.opened_at {
                    if opened_at.elapsed() >= self.config.recovery_timeout {
                        self.state = CircuitBreakerState::HalfOpen;
                        self.success_count = 0;
                        return true;
                    }
                }
                false
            }
            CircuitBreakerState::HalfOpen => true,
        }
    }

    pub fn record_success(&mut self) {
        match self.state {
            CircuitBreakerState::HalfOpen => {
                self.success_count += 1;
                if self.success_count >= self.config.success_threshold {
                    self.state = CircuitBreakerState::Closed;
                    self.failure_count = 0;
                    self.opened_at = None;
                }
            }
            CircuitBreakerState::Closed => {
                self.failure_count = 0;
            }
            CircuitBreakerState::Open => {}
        }
    }

    pub fn record_failure(&mut self) {
        if self.window_start.elapsed() > self.config.failure_window {
            self.failure_count = 0;
            self.window_start = Instant::now();
        }

        self.failure_count += 1;

        match self.state {
            CircuitBreakerState::HalfOpen => {
                self.state = CircuitBreakerState::Open;
                self.opened_at = Some(Instant::now());
            }
            CircuitBreakerState::Closed if self.failure_count >= self.config.failure_threshold => {
                self.state = CircuitBreakerState::Open;
                self.opened_at = Some(Instant::now());
            }
            _ => {}
        }
    }
}

/// Cumulative counts of each `QkdError` kind observed, keyed by peer.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ErrorStats {
    pub total_failures: u64,
    pub by_kind: HashMap<String, u64>,
}

/// A raised alert for a high/critical-severity failure, suitable for
/// forwarding to an external paging system.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlertEvent {
    pub peer_id: String,
    pub severity: SecuritySeverity,
    pub message: String,
    pub context: ErrorContext,
}

/// Tracks a [`CircuitBreaker`] and [`ErrorStats`] per peer, and produces
/// [`AlertEvent`]s for high-severity failures.
pub struct ErrorHandler {
    breakers: Arc<RwLock<HashMap<String, CircuitBreaker>>>,
    stats: Arc<RwLock<HashMap<String, ErrorStats>>>,
    breaker_config: CircuitBreakerConfig,
}

impl ErrorHandler {
    pub fn new() -> Self {
        Self::with_config(CircuitBreakerConfig::default())
    }

    pub fn with_config(breaker_config: CircuitBreakerConfig) -> Self {
        Self {
            breakers: Arc::new(RwLock::new(HashMap::new())),
            stats: Arc::new(RwLock::new(HashMap::new())),
            breaker_config,
        }
    }

    /// Record a session failure against `peer_id`, update its circuit
    /// breaker and error stats, log the failure, and return an alert when
    /// the severity warrants one.
    pub fn record_failure(
        &self,
        peer_id: &str,
        err: &QkdError,
        context: ErrorContext,
    ) -> Option<AlertEvent> {
        {
            let mut breakers = self.breakers.write();
            let breaker = breakers
                .entry(peer_id.to_string())
                .or_insert_with(|| CircuitBreaker::new(self.breaker_config.clone()));
            breaker.record_failure();
        }

        {
            let mut stats = self.stats.write();
            let entry = stats.entry(peer_id.to_string()).or_default();
            entry.total_failures += 1;
            *entry.by_kind.entry(kind_name(err).to_string()).or_insert(0) += 1;
        }

        let severity = err.severity();
        match severity {
            SecuritySeverity::Critical | SecuritySeverity::High => {
                error!(peer_id, %severity, "session failed: {err}");
            }
            _ => {
                warn!(peer_id, %severity, "session aborted: {err}");
            }
        }

        if severity >= SecuritySeverity::High {
            Some(AlertEvent {
                peer_id: peer_id.to_string(),
                severity,
                message: err.to_string(),
                context,
            })
        } else {
            None
        }
    }

    pub fn record_success(&self, peer_id: &str) {
        let mut breakers = self.breakers.write();
        if let Some(breaker) = breakers.get_mut(peer_id) {
            breaker.record_success();
        }
    }

    /// Whether a new session may be started against `peer_id` (false while
    /// that peer's circuit breaker is open).
    pub fn is_peer_available(&self, peer_id: &str) -> bool {
        let mut breakers = self.breakers.write();
        breakers
            .entry(peer_id.to_string())
            .or_insert_with(|| CircuitBreaker::new(self.breaker_config.clone()))
            .can_execute()
    }

    pub fn circuit_breaker_state(&self, peer_id: &str) -> Option<CircuitBreakerState> {
        self.breakers.read().get(peer_id).map(|b| b.state())
    }

    pub fn error_stats(&self, peer_id: &str) -> ErrorStats {
        self.stats.read().get(peer_id).cloned().unwrap_or_default()
    }
}

impl Default for ErrorHandler {
    fn default() -> Self {
        Self::new()
    }
}

fn kind_name(err: &QkdError) -> &'static str {
    match err {
        QkdError::QberTooHigh(_) => "QberTooHigh",
        QkdError::ReconciliationDivergence(_) => "ReconciliationDivergence",
        QkdError::VerificationFailed(_) => "VerificationFailed",
        QkdError::InsufficientEntropy(_) => "InsufficientEntropy",
        QkdError::IntegrityFailure(_) => "IntegrityFailure",
        QkdError::TransportFailure(_) => "TransportFailure",
        QkdError::ProtocolError(_) => "ProtocolError",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn circuit_breaker_trips_after_threshold() {
        let mut breaker = CircuitBreaker::new(CircuitBreakerConfig {
            failure_threshold: 2,
            ..Default::default()
        });
        assert!(breaker.can_execute());
        assert_eq!(breaker.state(), CircuitBreakerState::Closed);

        breaker.record_failure();
        assert!(breaker.can_execute());

        breaker.record_failure();
        assert!(!breaker.can_execute());
        assert_eq!(breaker.state(), CircuitBreakerState::Open);
    }

    #[test]
    fn circuit_breaker_recovers_after_timeout() {
        let mut breaker = CircuitBreaker::new(CircuitBreakerConfig {
            failure_threshold: 1,
            recovery_timeout: Duration::from_millis(0),
            success_threshold: 1,
            ..Default::default()
        });
        breaker.record_failure();
        assert_eq!(breaker.state(), CircuitBreakerState::Open);
        assert!(breaker.can_execute());
        assert_eq!(breaker.state(), CircuitBreakerState::HalfOpen);
        breaker.record_success();
        assert_eq!(breaker.state(), CircuitBreakerState::Closed);
    }

    #[test]
    fn error_handler_tracks_stats_and_alerts() {
        let handler = ErrorHandler::new();
        let ctx = create_error_context(
            "reconcile",
            "cascade",
            Some("session-1".into()),
            SecuritySeverity::Critical,
        );
        let alert = handler.record_failure(
            "peer-a",
            &QkdError::IntegrityFailure("tag mismatch".into()),
            ctx,
        );
        assert!(alert.is_some());
        assert_eq!(handler.error_stats("peer-a").total_failures, 1);
    }

    #[test]
    fn low_severity_failure_raises_no_alert() {
        let handler = ErrorHandler::new();
        let ctx = create_error_context("qber_check", "orchestrator", None, SecuritySeverity::Low);
        let alert = handler.record_failure(
            "peer-b",
            &QkdError::QberTooHigh("0.2 > 0.11".into()),
            ctx,
        );
        assert!(alert.is_none());
    }
}
