pub mod detectors;
pub mod pattern;
pub mod thresholds;
pub mod types;

pub use pattern::{ModelStore, PatternModel};
pub use thresholds::{StatisticalThreshold, ThresholdStore};
pub use types::{AnomalyScore, AnomalyType, Severity};

use chrono::{DateTime, Utc};

use crate::config::DetectionConfig;
use crate::metrics::TransactionMetric;
use crate::profile::RiskProfile;

/// Runs the five detectors against one event. Detectors are independent
/// and read-only over shared snapshots; a fault in one is logged and the
/// others still run.
pub struct DetectionEngine {
    config: DetectionConfig,
    thresholds: ThresholdStore,
    models: ModelStore,
}

impl DetectionEngine {
    pub fn new(config: DetectionConfig) -> Self {
        let thresholds =
            ThresholdStore::new(config.z_score_threshold, config.moving_average_window);
        Self {
            config,
            thresholds,
            models: ModelStore::new(),
        }
    }

    pub fn config(&self) -> &DetectionConfig {
        &self.config
    }

    pub fn thresholds(&self) -> &ThresholdStore {
        &self.thresholds
    }

    pub fn models(&self) -> &ModelStore {
        &self.models
    }

    /// Score one event with every detector. `window` is the post-append
    /// snapshot; `profile` is the entity state before this event was
    /// folded in. All detectors complete (or individually fail) before
    /// this returns, keeping the caller's risk update deterministic.
    pub fn run_all(
        &self,
        metric: &TransactionMetric,
        window: &[TransactionMetric],
        profile: &RiskProfile,
        _now: DateTime<Utc>,
    ) -> Vec<AnomalyScore> {
        let threshold = self.thresholds.get(metric.metric_type);
        let model = self.models.get(metric.metric_type);

        let results = [
            detectors::check_amount(metric, &threshold),
            detectors::check_frequency(metric, window, profile, &self.config),
            detectors::check_velocity(metric, window, profile, &self.config),
            detectors::check_pattern(metric, &model, profile, &self.config),
            detectors::check_behavior(metric, profile, &self.config),
        ];

        let mut scores = Vec::new();
        for result in results {
            match result {
                Ok(Some(score)) => scores.push(score),
                Ok(None) => {}
                Err(e) => {
                    tracing::error!(
                        detector = e.detector,
                        entity = %metric.entity_id,
                        error = %e,
                        "Detector fault, continuing with remaining detectors"
                    );
                }
            }
        }
        scores
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::MetricType;

    fn metric(amount: f64) -> TransactionMetric {
        TransactionMetric {
            entity_id: "U1".to_string(),
            transaction_id: "tx".to_string(),
            metric_type: MetricType::Transaction,
            amount,
            currency: "USD".to_string(),
            category: "misc".to_string(),
            merchant_id: None,
            location: None,
            timestamp: Utc::now(),
        }
    }

    #[test]
    fn test_all_detectors_abstain_on_cold_start() {
        let engine = DetectionEngine::new(DetectionConfig::default());
        let now = Utc::now();
        let profile = RiskProfile::new("U1", now);
        let m = metric(1_000_000.0);
        let scores = engine.run_all(&m, &[m.clone()], &profile, now);
        // Nothing calibrated or trained, window too small: model-not-ready
        // abstention everywhere, never an error.
        assert!(scores.is_empty());
    }

    #[test]
    fn test_faulted_detector_does_not_stop_the_others() {
        let engine = DetectionEngine::new(DetectionConfig::default());
        let now = Utc::now();
        // A calibrated threshold with zero spread makes the amount
        // detector return an error instead of a score.
        engine.thresholds().replace(
            MetricType::Transaction,
            StatisticalThreshold {
                mean: 100.0,
                std_dev: 0.0,
                z_score_threshold: 3.0,
                moving_average_window: 100,
                calibrated: true,
                last_updated: now,
            },
        );

        // Profile and window that make the velocity detector fire: small
        // historical average, ten large amounts one second apart.
        let mut profile = RiskProfile::new("U1", now - chrono::Duration::days(10));
        for _ in 0..100 {
            profile.fold_metric(&metric(50.0), now);
        }
        let window: Vec<_> = (0..10)
            .map(|i| {
                let mut m = metric(500.0);
                m.timestamp = now - chrono::Duration::seconds(10 - i);
                m
            })
            .collect();

        let current = window[9].clone();
        let scores = engine.run_all(&current, &window, &profile, now);
        // The amount fault is swallowed; velocity still reports.
        assert!(scores
            .iter()
            .any(|s| s.anomaly_type == AnomalyType::VelocityAnomaly));
        assert!(!scores
            .iter()
            .any(|s| s.anomaly_type == AnomalyType::AmountAnomaly));
    }

    #[test]
    fn test_calibrated_threshold_enables_amount_detector() {
        let engine = DetectionEngine::new(DetectionConfig::default());
        let now = Utc::now();
        engine.thresholds().replace(
            MetricType::Transaction,
            StatisticalThreshold {
                mean: 100.0,
                std_dev: 10.0,
                z_score_threshold: 3.0,
                moving_average_window: 100,
                calibrated: true,
                last_updated: now,
            },
        );
        let profile = RiskProfile::new("U1", now);
        let m = metric(145.0);
        let scores = engine.run_all(&m, &[m.clone()], &profile, now);
        assert_eq!(scores.len(), 1);
        assert_eq!(scores[0].anomaly_type, AnomalyType::AmountAnomaly);
        assert_eq!(scores[0].score, 1.0);
    }
}
