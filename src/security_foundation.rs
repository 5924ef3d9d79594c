//! Entropy generation and real-time threat detection.
//!
//! Ambient hardening shared by [`crate::verify`] (evaluation-point sampling)
//! and [`crate::privacy_amplification`] (Toeplitz seed sampling): a
//! multi-source entropy pool mixed with SHA-3, and a statistical timing-attack
//! detector that session code can feed operation durations into.
//!
//! ## Entropy sources
//! - `SystemRandom` — OS-provided entropy via `ChaCha20Rng`.
//! - `HashMixed` — a second derived stream, mixed in for source redundancy.
//! - `TimingJitter` — hardware timing variation.
//! - `Environmental` — low-quality ambient noise, included only at
//!   [`SecurityLevel::Maximum`].
//!
//! Multiple sources are combined and conditioned through repeated SHA-3
//! rounds rather than used directly, so a single degraded source cannot
//! dominate the output.

use crate::Result;
use rand::{Rng, RngCore, SeedableRng};
use rand_chacha::ChaCha20Rng;
use std::collections::HashMap;
use std::time::{Instant, SystemTime, UNIX_EPOCH};

/// Security levels controlling entropy mixing depth and threat sensitivity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum SecurityLevel {
    Standard,
    High,
    Maximum,
}

impl SecurityLevel {
    pub fn entropy_rounds(&self) -> usize {
        match self {
            Self::Standard => 3,
            Self::High => 5,
            Self::Maximum => 7,
        }
    }

    pub fn detection_sensitivity(&self) -> f64 {
        match self {
            Self::Standard => 0.7,
            Self::High => 0.85,
            Self::Maximum => 0.95,
        }
    }
}

/// Security configuration for the foundation layer.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct SecurityConfig {
    pub level: SecurityLevel,
    pub enable_threat_detection: bool,
    pub enable_timing_protection: bool,
    pub entropy_sources: Vec<EntropySource>,
    pub custom_params: HashMap<String, String>,
}

impl SecurityConfig {
    pub fn production_ready() -> Self {
        Self {
            level: SecurityLevel::High,
            enable_threat_detection: true,
            enable_timing_protection: true,
            entropy_sources: vec![
                EntropySource::SystemRandom,
                EntropySource::HashMixed,
                EntropySource::TimingJitter,
            ],
            custom_params: HashMap::new(),
        }
    }

    pub fn maximum_security() -> Self {
        Self {
            level: SecurityLevel::Maximum,
            enable_threat_detection: true,
            enable_timing_protection: true,
            entropy_sources: vec![
                EntropySource::SystemRandom,
                EntropySource::HashMixed,
                EntropySource::TimingJitter,
                EntropySource::Environmental,
            ],
            custom_params: HashMap::new(),
        }
    }
}

/// One of the entropy sources mixed into [`EntropyService`] output.
#[derive(Debug, Clone, Copy, PartialEq, Hash, Eq, serde::Serialize, serde::Deserialize)]
pub enum EntropySource {
    SystemRandom,
    HashMixed,
    TimingJitter,
    Environmental,
}

/// Threat categories the detector recognizes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum ThreatType {
    TimingAnalysis,
}

/// A detected security event, retained for the audit trail.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct SecurityEvent {
    pub timestamp: u64,
    pub threat_type: ThreatType,
    pub confidence: f64,
    pub component: String,
    pub details: HashMap<String, String>,
}

/// Multi-source entropy pool with health-monitored sources and SHA-3 mixing.
#[derive(Debug)]
pub struct EntropyService {
    rng: ChaCha20Rng,
    sources: Vec<EntropySource>,
    mixing_rounds: usize,
    health_scores: HashMap<EntropySource, f64>,
}

impl EntropyService {
    pub fn new(sources: Vec<EntropySource>, mixing_rounds: usize) -> Self {
        let seed = Self::generate_initial_seed();
        let rng = ChaCha20Rng::from_seed(seed);

        let mut health_scores = HashMap::new();
        for source in &sources {
            health_scores.insert(*source, 1.0);
        }

        Self {
            rng,
            sources,
            mixing_rounds,
            health_scores,
        }
    }

    /// Generate `count` secure random bytes. Requests of 32 bytes or fewer
    /// skip the mixing pool and draw straight from the CSPRNG.
    pub fn generate_bytes(&mut self, count: usize) -> Result<Vec<u8>> {
        if count <= 32 {
            let mut bytes = vec![0u8; count];
            self.rng.fill_bytes(&mut bytes);
            return Ok(bytes);
        }

        let mut base_bytes = vec![0u8; count];
        self.rng.fill_bytes(&mut base_bytes);

        let mut entropy_pool = Vec::with_capacity(count + 128);
        for source in &self.sources.clone() {
            let source_entropy = self.collect_source_entropy(*source);
            entropy_pool.extend_from_slice(&source_entropy);
            if entropy_pool.len() >= count + 64 {
                break;
            }
        }
        entropy_pool.extend_from_slice(&base_bytes);

        let mixed_entropy = self.mix_entropy(&entropy_pool, count);

        if rand::random::<f64>() < 0.1 {
            self.update_health_scores();
        }

        Ok(mixed_entropy)
    }

    fn mix_entropy(&mut self, data: &[u8], output_size: usize) -> Vec<u8> {
        use sha3::{Digest, Sha3_256};

        let mut hasher = Sha3_256::new();
        hasher.update(data);
        let random_salt: u64 = self.rng.gen();
        hasher.update(random_salt.to_le_bytes());
        let timestamp = self.get_timestamp();
        hasher.update(timestamp.to_le_bytes());

        let mut current_hash = hasher.finalize().to_vec();

        for round in 0..self.mixing_rounds {
            let mut round_hasher = Sha3_256::new();
            round_hasher.update(&current_hash);
            round_hasher.update(round.to_le_bytes());
            let round_random: u32 = self.rng.gen();
            round_hasher.update(round_random.to_le_bytes());
            current_hash = round_hasher.finalize().to_vec();
        }

        let mut result = Vec::with_capacity(output_size);
        let mut counter = 0u32;
        while result.len() < output_size {
            let mut expand_hasher = Sha3_256::new();
            expand_hasher.update(&current_hash);
            expand_hasher.update(counter.to_le_bytes());
            let chunk = expand_hasher.finalize();
            let remaining = output_size - result.len();
            result.extend_from_slice(&chunk[..remaining.min(32)]);
            counter += 1;
        }

        result
    }

    fn collect_source_entropy(&mut self, source: EntropySource) -> Vec<u8> {
        match source {
            EntropySource::SystemRandom => {
                let mut bytes = vec![0u8; 32];
                self.rng.fill_bytes(&mut bytes);
                bytes
            }
            EntropySource::HashMixed => {
                let mut mixed = vec![0u8; 32];
                let mut base = vec![0u8; 32];
                self.rng.fill_bytes(&mut base);
                for i in 0..32 {
                    let factor = ((i % 15) + 1) as u8;
                    mixed[i] = base[i] ^ factor ^ u8::try_from(self.get_timestamp()).unwrap_or(0);
                }
                mixed
            }
            EntropySource::TimingJitter => {
                let start = std::time::Instant::now();
                let mut timing_bytes = vec![0u8; 16];
                for (i, timing_byte) in timing_bytes.iter_mut().enumerate().take(16) {
                    let micro_start = std::time::Instant::now();
                    let _ = self.rng.next_u32();
                    let jitter = u8::try_from(micro_start.elapsed().as_nanos()).unwrap_or(0);
                    *timing_byte = jitter ^ u8::try_from(i).unwrap_or(0);
                }
                let collection_time = u8::try_from(start.elapsed().as_nanos()).unwrap_or(0);
                timing_bytes[0] ^= collection_time;
                timing_bytes
            }
            EntropySource::Environmental => {
                let mut env_bytes = vec![0u8; 16];
                let timestamp = self.get_timestamp();
                for (i, env_byte) in env_bytes.iter_mut().enumerate().take(16) {
                    let shift_amount = (i * 4) % 64;
                    *env_byte = u8::try_from(timestamp >> shift_amount).unwrap_or(0)
                        ^ u8::try_from(i).unwrap_or(0)
                        ^ rand::random::<u8>();
                }
                env_bytes
            }
        }
    }

    fn generate_initial_seed() -> [u8; 32] {
        let mut seed = [0u8; 32];
        let timestamp = u64::try_from(
            SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .unwrap_or_default()
                .as_nanos(),
        )
        .unwrap_or(0);
        seed[0..8].copy_from_slice(&timestamp.to_le_bytes());
        for byte in seed.iter_mut().skip(8) {
            *byte = rand::random();
        }
        seed
    }

    fn get_timestamp(&self) -> u64 {
        u64::try_from(
            SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .unwrap_or_default()
                .as_nanos(),
        )
        .unwrap_or(0)
    }

    fn update_health_scores(&mut self) {
        for source in &self.sources.clone() {
            let entropy_sample = self.collect_source_entropy(*source);
            let quality = self.assess_entropy_quality(&entropy_sample);
            self.health_scores.insert(*source, quality);
        }
    }

    fn assess_entropy_quality(&self, data: &[u8]) -> f64 {
        if data.is_empty() {
            return 0.0;
        }

        let mut byte_counts = [0u32; 256];
        for &byte in data {
            byte_counts[byte as usize] += 1;
        }

        let len = data.len() as f64;
        let mut entropy = 0.0;
        for &count in &byte_counts {
            if count > 0 {
                let p = f64::from(count) / len;
                entropy -= p * p.log2();
            }
        }

        entropy / 8.0
    }
}

/// Timing-attack detector: tracks a rolling window of operation durations
/// and flags outliers by z-score.
#[derive(Debug)]
pub struct ThreatDetector {
    sensitivity: f64,
    recent_events: Vec<SecurityEvent>,
    timing_measurements: Vec<u64>,
    max_events: usize,
}

impl ThreatDetector {
    #[must_use]
    pub fn new(sensitivity: f64) -> Self {
        Self {
            sensitivity,
            recent_events: Vec::new(),
            timing_measurements: Vec::new(),
            max_events: 1000,
        }
    }

    pub fn record_timing(&mut self, operation: &str, duration_ns: u64) {
        self.timing_measurements.push(duration_ns);
        if self.timing_measurements.len() > 100 {
            self.timing_measurements.remove(0);
        }

        if let Some(event) = self.detect_timing_attack(operation, duration_ns) {
            self.record_event(event);
        }
    }

    fn detect_timing_attack(&self, operation: &str, duration_ns: u64) -> Option<SecurityEvent> {
        if self.timing_measurements.len() < 10 {
            return None;
        }

        let sum: u64 = self.timing_measurements.iter().sum();
        let mean = sum as f64 / self.timing_measurements.len() as f64;

        let variance: f64 = self
            .timing_measurements
            .iter()
            .map(|&x| {
                let diff = x as f64 - mean;
                diff * diff
            })
            .sum::<f64>()
            / self.timing_measurements.len() as f64;

        let std_dev = variance.sqrt();
        let z_score = (duration_ns as f64 - mean) / std_dev;

        if z_score.abs() > 3.0 && z_score.abs() > self.sensitivity * 5.0 {
            let mut details = HashMap::new();
            details.insert("operation".to_string(), operation.to_string());
            details.insert("duration_ns".to_string(), duration_ns.to_string());
            details.insert("z_score".to_string(), format!("{z_score:.2}"));

            Some(SecurityEvent {
                timestamp: u64::try_from(
                    SystemTime::now()
                        .duration_since(UNIX_EPOCH)
                        .unwrap_or_default()
                        .as_millis(),
                )
                .unwrap_or(0),
                threat_type: ThreatType::TimingAnalysis,
                confidence: (z_score.abs() / 10.0).min(1.0),
                component: "ThreatDetector".to_string(),
                details,
            })
        } else {
            None
        }
    }

    pub fn record_event(&mut self, event: SecurityEvent) {
        self.recent_events.push(event);
        if self.recent_events.len() > self.max_events {
            self.recent_events.remove(0);
        }
    }

    #[must_use]
    pub fn get_recent_events(&self) -> &[SecurityEvent] {
        &self.recent_events
    }

    pub fn get_threat_level(&self) -> f64 {
        if self.recent_events.is_empty() {
            return 0.0;
        }

        let recent_window = 60_000;
        let current_time = u64::try_from(
            SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .unwrap_or_default()
                .as_millis(),
        )
        .unwrap_or(0);

        let mut threat_score = 0.0;
        let mut event_count = 0;
        for event in &self.recent_events {
            if current_time - event.timestamp < recent_window {
                threat_score += event.confidence;
                event_count += 1;
            }
        }

        if event_count > 0 {
            threat_score / f64::from(event_count)
        } else {
            0.0
        }
    }
}

/// Setup-time cost of building a [`SecurityFoundation`], kept for parity
/// with the production monitor's reporting rather than any hot-path use.
#[derive(Debug, Clone, Copy, Default)]
pub struct FoundationMetrics {
    pub setup_ms: u64,
}

/// Owns the entropy pool and threat detector for one session.
pub struct SecurityFoundation {
    entropy: EntropyService,
    detector: ThreatDetector,
    config: SecurityConfig,
    metrics: FoundationMetrics,
}

impl SecurityFoundation {
    /// # Errors
    /// Never fails today; returns `Result` so future entropy-source checks
    /// (hardware RNG probing, FIPS-mode assertions) can fail without an API
    /// break.
    pub async fn new(config: SecurityConfig) -> Result<Self> {
        let start_time = Instant::now();

        let entropy = EntropyService::new(
            config.entropy_sources.clone(),
            config.level.entropy_rounds(),
        );
        let detector = ThreatDetector::new(config.level.detection_sensitivity());

        let metrics = FoundationMetrics {
            setup_ms: u64::try_from(start_time.elapsed().as_millis()).unwrap_or(0),
        };

        Ok(Self {
            entropy,
            detector,
            config,
            metrics,
        })
    }

    /// # Errors
    /// Propagates failures from the underlying entropy pool.
    pub fn generate_secure_bytes(&mut self, count: usize) -> Result<Vec<u8>> {
        let start_time = Instant::now();
        let result = self.entropy.generate_bytes(count);
        let duration = u64::try_from(start_time.elapsed().as_nanos()).unwrap_or(0);

        if self.config.enable_timing_protection {
            self.detector.record_timing("entropy_generation", duration);
        }

        result
    }

    pub fn record_operation_timing(&mut self, operation: &str, duration_ns: u64) {
        if self.config.enable_threat_detection {
            self.detector.record_timing(operation, duration_ns);
        }
    }

    #[must_use]
    pub fn get_threat_level(&self) -> f64 {
        self.detector.get_threat_level()
    }

    #[must_use]
    pub fn get_security_events(&self) -> &[SecurityEvent] {
        self.detector.get_recent_events()
    }

    pub fn check_entropy_health(&mut self) -> HashMap<EntropySource, f64> {
        self.entropy.health_scores.clone()
    }

    #[must_use]
    pub fn get_metrics(&self) -> &FoundationMetrics {
        &self.metrics
    }

    #[must_use]
    pub fn get_config(&self) -> &SecurityConfig {
        &self.config
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_security_foundation_creation() {
        let config = SecurityConfig::production_ready();
        let foundation = SecurityFoundation::new(config).await;
        assert!(foundation.is_ok());
    }

    #[tokio::test]
    async fn test_entropy_generation() {
        let config = SecurityConfig::production_ready();
        let mut foundation = SecurityFoundation::new(config).await.unwrap();

        let bytes = foundation.generate_secure_bytes(32).unwrap();
        assert_eq!(bytes.len(), 32);

        let bytes2 = foundation.generate_secure_bytes(32).unwrap();
        assert_ne!(bytes, bytes2);
    }

    #[tokio::test]
    async fn test_threat_detection() {
        let config = SecurityConfig::production_ready();
        let mut foundation = SecurityFoundation::new(config).await.unwrap();

        for i in 0..20 {
            foundation.record_operation_timing("test_op", 1_000_000 + i * 10_000);
        }
        foundation.record_operation_timing("test_op", 10_000_000);

        let threat_level = foundation.get_threat_level();
        assert!(threat_level >= 0.0);
    }

    #[test]
    fn test_security_levels() {
        assert_eq!(SecurityLevel::Standard.entropy_rounds(), 3);
        assert_eq!(SecurityLevel::High.entropy_rounds(), 5);
        assert_eq!(SecurityLevel::Maximum.entropy_rounds(), 7);

        assert!(
            SecurityLevel::Maximum.detection_sensitivity()
                > SecurityLevel::Standard.detection_sensitivity()
        );
    }
}
