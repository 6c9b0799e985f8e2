use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;

use crate::metrics::{MetricType, TransactionMetric};
use crate::profile::RiskProfile;

/// Fixed feature vector layout used by the pattern detector.
pub const FEATURE_NAMES: [&str; 7] = [
    "amount",
    "hour_of_day",
    "day_of_week",
    "category_hash",
    "location_distance_km",
    "is_round_number",
    "is_weekend",
];

/// Per-feature distribution learned from training samples.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeatureStats {
    pub mean: f64,
    pub std_dev: f64,
}

/// Multivariate novelty model for one metric type. Replaced wholesale on
/// retrain so in-flight scoring always uses a consistent snapshot. The
/// scoring contract: higher dispersion from the training distribution
/// gives a higher score in [0, 1].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PatternModel {
    pub feature_stats: Vec<FeatureStats>,
    pub sample_count: usize,
    pub trained: bool,
    pub last_trained_at: Option<DateTime<Utc>>,
}

impl PatternModel {
    pub fn untrained() -> Self {
        Self {
            feature_stats: Vec::new(),
            sample_count: 0,
            trained: false,
            last_trained_at: None,
        }
    }

    /// Fit per-feature mean/std from feature vectors. Returns None when
    /// the sample is empty or ragged.
    pub fn train(samples: &[Vec<f64>], now: DateTime<Utc>) -> Option<Self> {
        let first = samples.first()?;
        let dims = first.len();
        if dims == 0 || samples.iter().any(|s| s.len() != dims) {
            return None;
        }
        let n = samples.len() as f64;
        let mut stats = Vec::with_capacity(dims);
        for d in 0..dims {
            let mean = samples.iter().map(|s| s[d]).sum::<f64>() / n;
            let variance = samples.iter().map(|s| (s[d] - mean).powi(2)).sum::<f64>() / n;
            stats.push(FeatureStats {
                mean,
                // Floor keeps constant training features from exploding z.
                std_dev: variance.sqrt().max(1e-6),
            });
        }
        Some(Self {
            feature_stats: stats,
            sample_count: samples.len(),
            trained: true,
            last_trained_at: Some(now),
        })
    }

    /// Novelty score in [0, 1]: mean of per-feature |z|/3, each clamped
    /// to 1. Monotonic in feature dispersion from the training set.
    pub fn score(&self, features: &[f64]) -> f64 {
        if !self.trained || features.len() != self.feature_stats.len() {
            return 0.0;
        }
        let sum: f64 = features
            .iter()
            .zip(&self.feature_stats)
            .map(|(x, stats)| (((x - stats.mean).abs() / stats.std_dev) / 3.0).min(1.0))
            .sum();
        sum / self.feature_stats.len() as f64
    }
}

/// Stable FNV-1a hash bucketing a category into [0, 1000).
fn hash_category(category: &str) -> f64 {
    let mut hash: u64 = 0xcbf29ce484222325;
    for byte in category.as_bytes() {
        hash ^= *byte as u64;
        hash = hash.wrapping_mul(0x100000001b3);
    }
    (hash % 1000) as f64
}

/// Extract the fixed feature vector for one event against its profile.
pub fn extract_features(metric: &TransactionMetric, profile: &RiskProfile) -> Vec<f64> {
    let location_distance = match (&metric.location, profile.typical_location()) {
        (Some(loc), Some(typical)) => loc.distance_km(&typical),
        _ => 0.0,
    };
    let is_round = metric.amount.fract() == 0.0 && metric.amount % 10.0 == 0.0;
    let is_weekend = metric.day_of_week() >= 5;
    vec![
        metric.amount,
        metric.hour_of_day() as f64,
        metric.day_of_week() as f64,
        hash_category(&metric.category),
        location_distance,
        if is_round { 1.0 } else { 0.0 },
        if is_weekend { 1.0 } else { 0.0 },
    ]
}

/// Copy-on-write pattern model snapshots, keyed by metric type. Retraining
/// swaps the whole model; readers never see a partially trained one.
pub struct ModelStore {
    inner: RwLock<HashMap<MetricType, Arc<PatternModel>>>,
}

impl ModelStore {
    pub fn new() -> Self {
        let mut map = HashMap::new();
        for metric_type in MetricType::ALL {
            map.insert(metric_type, Arc::new(PatternModel::untrained()));
        }
        Self {
            inner: RwLock::new(map),
        }
    }

    pub fn get(&self, metric_type: MetricType) -> Arc<PatternModel> {
        self.inner
            .read()
            .get(&metric_type)
            .cloned()
            .unwrap_or_else(|| Arc::new(PatternModel::untrained()))
    }

    /// Atomically publish a retrained model.
    pub fn replace(&self, metric_type: MetricType, model: PatternModel) {
        self.inner.write().insert(metric_type, Arc::new(model));
    }

    pub fn snapshot_all(&self) -> Vec<(MetricType, Arc<PatternModel>)> {
        self.inner
            .read()
            .iter()
            .map(|(k, v)| (*k, v.clone()))
            .collect()
    }
}

impl Default for ModelStore {
    fn default() -> Self {
        Self::new()
    }
}
