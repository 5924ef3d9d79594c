//! Session-level monitoring and alerting.
//!
//! Tracks completed sessions rather than HTTP-style requests: per-session
//! outcome (completed/aborted + reason), leakage and pass-count history, and
//! system resource gauges exported through `metrics`/Prometheus.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use metrics::{counter, gauge, histogram};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::{
    atomic::{AtomicU64, Ordering},
    Arc,
};
use std::time::{Duration, Instant};
use tokio::sync::broadcast;

use crate::logging::{log_info, LogCategory};
use crate::Result;

/// Aggregate report over sessions observed since the monitor started.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionReport {
    pub avg_leakage_bits: f64,
    pub p95_leakage_bits: f64,
    pub sessions_per_second: f64,
    pub success_rate: f64,
    pub total_sessions: u64,
    pub abort_rate: f64,
    pub avg_pass_count: f64,
}

/// Rolling session-outcome tracker backing [`SessionReport`].
pub struct SessionMonitor {
    leakages: Arc<RwLock<VecDeque<u64>>>,
    pass_counts: Arc<RwLock<VecDeque<u32>>>,
    completed_count: Arc<AtomicU64>,
    aborted_count: Arc<AtomicU64>,
    session_timestamps: Arc<RwLock<VecDeque<Instant>>>,
}

impl SessionMonitor {
    pub fn new() -> Self {
        Self {
            leakages: Arc::new(RwLock::new(VecDeque::with_capacity(10000))),
            pass_counts: Arc::new(RwLock::new(VecDeque::with_capacity(10000))),
            completed_count: Arc::new(AtomicU64::new(0)),
            aborted_count: Arc::new(AtomicU64::new(0)),
            session_timestamps: Arc::new(RwLock::new(VecDeque::with_capacity(10000))),
        }
    }

    /// Record one session's outcome.
    pub fn record_session(&self, leakage_bits: u64, pass_count: u32, completed: bool) {
        let mut leakages = self.leakages.write();
        leakages.push_back(leakage_bits);
        if leakages.len() > 10000 {
            leakages.pop_front();
        }

        let mut passes = self.pass_counts.write();
        passes.push_back(pass_count);
        if passes.len() > 10000 {
            passes.pop_front();
        }

        if completed {
            self.completed_count.fetch_add(1, Ordering::Relaxed);
        } else {
            self.aborted_count.fetch_add(1, Ordering::Relaxed);
        }

        let mut timestamps = self.session_timestamps.write();
        timestamps.push_back(Instant::now());
        if timestamps.len() > 10000 {
            timestamps.pop_front();
        }
    }

    pub fn get_report(&self) -> SessionReport {
        let leakages = self.leakages.read();
        let passes = self.pass_counts.read();
        let timestamps = self.session_timestamps.read();

        let avg_leakage = if leakages.is_empty() {
            0.0
        } else {
            leakages.iter().sum::<u64>() as f64 / leakages.len() as f64
        };

        let p95_leakage = if leakages.is_empty() {
            0.0
        } else {
            let mut sorted: Vec<_> = leakages.iter().copied().collect();
            sorted.sort_unstable();
            let index = (sorted.len() as f64 * 0.95) as usize;
            sorted.get(index.min(sorted.len() - 1)).copied().unwrap_or(0) as f64
        };

        let avg_pass_count = if passes.is_empty() {
            0.0
        } else {
            passes.iter().sum::<u32>() as f64 / passes.len() as f64
        };

        let sessions_per_second = if timestamps.len() < 2 {
            0.0
        } else {
            let span = timestamps
                .back()
                .unwrap()
                .duration_since(*timestamps.front().unwrap());
            if span.as_secs() > 0 {
                timestamps.len() as f64 / span.as_secs_f64()
            } else {
                0.0
            }
        };

        let completed = self.completed_count.load(Ordering::Relaxed);
        let aborted = self.aborted_count.load(Ordering::Relaxed);
        let total = completed + aborted;

        let success_rate = if total > 0 {
            (completed as f64) / (total as f64) * 100.0
        } else {
            0.0
        };

        SessionReport {
            avg_leakage_bits: avg_leakage,
            p95_leakage_bits: p95_leakage,
            sessions_per_second,
            success_rate,
            total_sessions: total,
            abort_rate: 100.0 - success_rate,
            avg_pass_count,
        }
    }
}

impl Default for SessionMonitor {
    fn default() -> Self {
        Self::new()
    }
}

/// System health status levels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum HealthStatus {
    Healthy,
    Warning,
    Degraded,
    Critical,
    Down,
}

impl std::fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            HealthStatus::Healthy => write!(f, "HEALTHY"),
            HealthStatus::Warning => write!(f, "WARNING"),
            HealthStatus::Degraded => write!(f, "DEGRADED"),
            HealthStatus::Critical => write!(f, "CRITICAL"),
            HealthStatus::Down => write!(f, "DOWN"),
        }
    }
}

/// Point-in-time resource and session-rate snapshot.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    pub timestamp: DateTime<Utc>,
    pub cpu_usage_percent: f64,
    pub memory_usage_mb: u64,
    pub active_sessions: u32,
    pub sessions_per_second: f64,
    pub abort_rate_percent: f64,
}

/// Alert thresholds.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlertConfig {
    pub cpu_threshold_percent: f64,
    pub memory_threshold_percent: f64,
    pub abort_rate_threshold_percent: f64,
    pub alert_cooldown: Duration,
}

impl Default for AlertConfig {
    fn default() -> Self {
        Self {
            cpu_threshold_percent: 80.0,
            memory_threshold_percent: 85.0,
            abort_rate_threshold_percent: 10.0,
            alert_cooldown: Duration::from_secs(300),
        }
    }
}

/// Monitoring configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonitoringConfig {
    pub monitoring_interval: Duration,
    pub metrics_retention: Duration,
    pub alerts: AlertConfig,
}

impl Default for MonitoringConfig {
    fn default() -> Self {
        Self {
            monitoring_interval: Duration::from_secs(10),
            metrics_retention: Duration::from_secs(24 * 60 * 60),
            alerts: AlertConfig::default(),
        }
    }
}

/// An alert raised by the monitor.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlertEvent {
    pub id: String,
    pub severity: HealthStatus,
    pub component: String,
    pub message: String,
    pub timestamp: DateTime<Utc>,
}

/// Owns session statistics, resource gauges, and the alert broadcast channel
/// for one running process.
#[derive(Clone)]
pub struct ProductionMonitor {
    config: MonitoringConfig,
    sessions: Arc<SessionMonitor>,
    current_snapshot: Arc<RwLock<MetricsSnapshot>>,
    alert_sender: broadcast::Sender<AlertEvent>,
    last_alerts: Arc<DashMap<String, Instant>>,
    start_time: Instant,
}

impl ProductionMonitor {
    pub fn new(config: MonitoringConfig) -> Self {
        let (alert_sender, _) = broadcast::channel(1000);

        let default_snapshot = MetricsSnapshot {
            timestamp: Utc::now(),
            cpu_usage_percent: 0.0,
            memory_usage_mb: 0,
            active_sessions: 0,
            sessions_per_second: 0.0,
            abort_rate_percent: 0.0,
        };

        Self {
            config,
            sessions: Arc::new(SessionMonitor::new()),
            current_snapshot: Arc::new(RwLock::new(default_snapshot)),
            alert_sender,
            last_alerts: Arc::new(DashMap::new()),
            start_time: Instant::now(),
        }
    }

    pub async fn start(&self) -> Result<()> {
        log_info(LogCategory::System, "starting production monitoring");
        gauge!("qkd_health_score", 100.0);
        counter!("qkd_sessions_total", 0);
        Ok(())
    }

    pub async fn stop(&self) {
        log_info(LogCategory::System, "stopping production monitoring");
    }

    /// Record a session's outcome and update exported metrics.
    pub fn record_session(&self, leakage_bits: u64, pass_count: u32, completed: bool) {
        self.sessions.record_session(leakage_bits, pass_count, completed);

        counter!("qkd_sessions_total", 1);
        histogram!("qkd_session_leakage_bits", leakage_bits as f64);
        histogram!("qkd_session_pass_count", pass_count as f64);
        if !completed {
            counter!("qkd_sessions_aborted_total", 1);
        }

        let report = self.sessions.get_report();
        let mut snapshot = self.current_snapshot.write();
        snapshot.timestamp = Utc::now();
        snapshot.sessions_per_second = report.sessions_per_second;
        snapshot.abort_rate_percent = report.abort_rate;
    }

    pub fn get_session_report(&self) -> SessionReport {
        self.sessions.get_report()
    }

    pub fn get_current_metrics(&self) -> MetricsSnapshot {
        self.current_snapshot.read().clone()
    }

    pub fn get_system_health(&self) -> HealthStatus {
        let snapshot = self.current_snapshot.read();
        let alerts = &self.config.alerts;

        if snapshot.abort_rate_percent > alerts.abort_rate_threshold_percent * 2.0
            || snapshot.cpu_usage_percent > 95.0
        {
            HealthStatus::Critical
        } else if snapshot.abort_rate_percent > alerts.abort_rate_threshold_percent
            || snapshot.cpu_usage_percent > alerts.cpu_threshold_percent
        {
            HealthStatus::Degraded
        } else if snapshot.cpu_usage_percent > 60.0 {
            HealthStatus::Warning
        } else {
            HealthStatus::Healthy
        }
    }

    pub fn subscribe_to_alerts(&self) -> broadcast::Receiver<AlertEvent> {
        self.alert_sender.subscribe()
    }

    /// Update resource gauges (sampled by the caller from OS APIs).
    pub fn update_resource_metrics(&self, cpu: f64, memory_mb: u64, active_sessions: u32) {
        let mut snapshot = self.current_snapshot.write();
        snapshot.timestamp = Utc::now();
        snapshot.cpu_usage_percent = cpu;
        snapshot.memory_usage_mb = memory_mb;
        snapshot.active_sessions = active_sessions;

        gauge!("qkd_cpu_usage_percent", cpu);
        gauge!("qkd_memory_usage_mb", memory_mb as f64);
        gauge!("qkd_active_sessions", active_sessions as f64);
    }

    pub fn generate_system_report(&self) -> serde_json::Value {
        let snapshot = self.current_snapshot.read();
        let report = self.sessions.get_report();
        let uptime = self.start_time.elapsed().as_secs();

        serde_json::json!({
            "status": "operational",
            "uptime_seconds": uptime,
            "health": self.get_system_health(),
            "resources": {
                "cpu_usage_percent": snapshot.cpu_usage_percent,
                "memory_usage_mb": snapshot.memory_usage_mb,
                "active_sessions": snapshot.active_sessions,
            },
            "sessions": report,
            "timestamp": Utc::now()
        })
    }
}

/// Sample CPU usage via `sysinfo`, cached in a process-wide handle.
pub fn sample_cpu_usage() -> f64 {
    use std::sync::OnceLock;

    static SYSTEM: OnceLock<std::sync::Mutex<sysinfo::System>> = OnceLock::new();
    let system = SYSTEM.get_or_init(|| {
        let mut sys = sysinfo::System::new_all();
        sys.refresh_cpu();
        std::sync::Mutex::new(sys)
    });

    if let Ok(mut sys) = system.lock() {
        sys.refresh_cpu();
        sys.global_cpu_info().cpu_usage() as f64
    } else {
        0.0
    }
}

/// Sample resident memory usage in bytes via `sysinfo`.
pub fn sample_memory_usage() -> u64 {
    use std::sync::OnceLock;

    static SYSTEM: OnceLock<std::sync::Mutex<sysinfo::System>> = OnceLock::new();
    let system = SYSTEM.get_or_init(|| {
        let mut sys = sysinfo::System::new_all();
        sys.refresh_memory();
        std::sync::Mutex::new(sys)
    });

    if let Ok(mut sys) = system.lock() {
        sys.refresh_memory();
        sys.used_memory()
    } else {
        0
    }
}

pub fn create_production_monitor() -> ProductionMonitor {
    ProductionMonitor::new(MonitoringConfig::default())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_production_monitor_creation() {
        let monitor = ProductionMonitor::new(MonitoringConfig::default());
        assert_eq!(monitor.get_system_health(), HealthStatus::Healthy);
    }

    #[tokio::test]
    async fn test_session_recording() {
        let monitor = ProductionMonitor::new(MonitoringConfig::default());
        monitor.record_session(128, 4, true);
        monitor.record_session(256, 5, false);

        let report = monitor.get_session_report();
        assert_eq!(report.total_sessions, 2);
        assert_eq!(report.success_rate, 50.0);
    }

    #[tokio::test]
    async fn test_resource_metrics_update() {
        let monitor = ProductionMonitor::new(MonitoringConfig::default());
        monitor.update_resource_metrics(50.0, 2048, 10);

        let metrics = monitor.get_current_metrics();
        assert_eq!(metrics.cpu_usage_percent, 50.0);
        assert_eq!(metrics.memory_usage_mb, 2048);
        assert_eq!(metrics.active_sessions, 10);
    }

    #[test]
    fn test_health_status_display() {
        assert_eq!(format!("{}", HealthStatus::Healthy), "HEALTHY");
        assert_eq!(format!("{}", HealthStatus::Warning), "WARNING");
        assert_eq!(format!("{}", HealthStatus::Critical), "CRITICAL");
    }

    #[tokio::test]
    async fn test_high_abort_rate_degrades_health() {
        let monitor = ProductionMonitor::new(MonitoringConfig::default());
        for _ in 0..9 {
            monitor.record_session(100, 4, false);
        }
        monitor.record_session(100, 4, true);
        assert_ne!(monitor.get_system_health(), HealthStatus::Healthy);
    }
}
