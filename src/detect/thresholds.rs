use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;

use crate::metrics::MetricType;

/// Calibrated amount statistics for one metric type. Replaced wholesale by
/// the lifecycle manager; readers always hold a consistent snapshot.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatisticalThreshold {
    pub mean: f64,
    pub std_dev: f64,
    pub z_score_threshold: f64,
    pub moving_average_window: usize,
    pub calibrated: bool,
    pub last_updated: DateTime<Utc>,
}

impl StatisticalThreshold {
    /// An uncalibrated threshold. No amount alert can fire from it.
    pub fn uncalibrated(z_score_threshold: f64, moving_average_window: usize) -> Self {
        Self {
            mean: 0.0,
            std_dev: 0.0,
            z_score_threshold,
            moving_average_window,
            calibrated: false,
            last_updated: Utc::now(),
        }
    }

    /// Calibrate from a sample of amounts. Returns None when the sample is
    /// too small or degenerate (zero spread) to calibrate from.
    pub fn from_samples(
        samples: &[f64],
        z_score_threshold: f64,
        moving_average_window: usize,
        now: DateTime<Utc>,
    ) -> Option<Self> {
        if samples.len() < 2 {
            return None;
        }
        let n = samples.len() as f64;
        let mean = samples.iter().sum::<f64>() / n;
        let variance = samples.iter().map(|x| (x - mean).powi(2)).sum::<f64>() / (n - 1.0);
        let std_dev = variance.sqrt();
        if !std_dev.is_finite() || std_dev <= 1e-9 {
            return None;
        }
        Some(Self {
            mean,
            std_dev,
            z_score_threshold,
            moving_average_window,
            calibrated: true,
            last_updated: now,
        })
    }
}

/// Copy-on-write threshold snapshots, keyed by metric type. Readers clone
/// an `Arc` and never observe a half-written mean/std pair; the lifecycle
/// manager swaps in a fully-formed replacement.
pub struct ThresholdStore {
    inner: RwLock<HashMap<MetricType, Arc<StatisticalThreshold>>>,
}

impl ThresholdStore {
    pub fn new(z_score_threshold: f64, moving_average_window: usize) -> Self {
        let mut map = HashMap::new();
        for metric_type in MetricType::ALL {
            map.insert(
                metric_type,
                Arc::new(StatisticalThreshold::uncalibrated(
                    z_score_threshold,
                    moving_average_window,
                )),
            );
        }
        Self {
            inner: RwLock::new(map),
        }
    }

    pub fn get(&self, metric_type: MetricType) -> Arc<StatisticalThreshold> {
        self.inner
            .read()
            .get(&metric_type)
            .cloned()
            .unwrap_or_else(|| Arc::new(StatisticalThreshold::uncalibrated(3.0, 100)))
    }

    /// Atomically publish a new threshold snapshot.
    pub fn replace(&self, metric_type: MetricType, threshold: StatisticalThreshold) {
        self.inner.write().insert(metric_type, Arc::new(threshold));
    }

    pub fn snapshot_all(&self) -> Vec<(MetricType, Arc<StatisticalThreshold>)> {
        self.inner
            .read()
            .iter()
            .map(|(k, v)| (*k, v.clone()))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_samples() {
        let samples: Vec<f64> = (0..50).map(|i| 95.0 + (i % 11) as f64).collect();
        let t = StatisticalThreshold::from_samples(&samples, 3.0, 100, Utc::now()).unwrap();
        assert!(t.calibrated);
        assert!((t.mean - 99.9).abs() < 1.0);
        assert!(t.std_dev > 0.0);
    }

    #[test]
    fn test_from_samples_rejects_degenerate() {
        assert!(StatisticalThreshold::from_samples(&[100.0], 3.0, 100, Utc::now()).is_none());
        let constant = vec![50.0; 20];
        assert!(StatisticalThreshold::from_samples(&constant, 3.0, 100, Utc::now()).is_none());
    }

    #[test]
    fn test_store_starts_uncalibrated() {
        let store = ThresholdStore::new(3.0, 100);
        assert!(!store.get(MetricType::Transaction).calibrated);
        assert!(!store.get(MetricType::Payment).calibrated);
    }

    #[test]
    fn test_replace_is_atomic_snapshot() {
        let store = ThresholdStore::new(3.0, 100);
        let before = store.get(MetricType::Transaction);

        let t =
            StatisticalThreshold::from_samples(&[90.0, 100.0, 110.0], 3.0, 100, Utc::now()).unwrap();
        store.replace(MetricType::Transaction, t);

        // The old snapshot is untouched; the new one is fully formed.
        assert!(!before.calibrated);
        let after = store.get(MetricType::Transaction);
        assert!(after.calibrated);
        assert!((after.mean - 100.0).abs() < 1e-9);
    }

    #[test]
    fn test_concurrent_reader_sees_old_or_new_pair() {
        use std::sync::atomic::{AtomicBool, Ordering};

        let store = Arc::new(ThresholdStore::new(3.0, 100));
        store.replace(
            MetricType::Transaction,
            StatisticalThreshold::from_samples(&[10.0, 10.0, 40.0], 3.0, 100, Utc::now()).unwrap(),
        );
        let old = store.get(MetricType::Transaction);

        let stop = Arc::new(AtomicBool::new(false));
        let reader = {
            let store = store.clone();
            let stop = stop.clone();
            let old_mean = old.mean;
            let old_std = old.std_dev;
            std::thread::spawn(move || {
                while !stop.load(Ordering::Relaxed) {
                    let t = store.get(MetricType::Transaction);
                    // Either the full old pair or the full new pair.
                    let is_old = t.mean == old_mean && t.std_dev == old_std;
                    let is_new = t.mean == 200.0 && t.std_dev == 50.0;
                    assert!(is_old || is_new, "observed a mixed pair: {:?}", t);
                }
            })
        };

        for _ in 0..1000 {
            store.replace(
                MetricType::Transaction,
                StatisticalThreshold {
                    mean: 200.0,
                    std_dev: 50.0,
                    z_score_threshold: 3.0,
                    moving_average_window: 100,
                    calibrated: true,
                    last_updated: Utc::now(),
                },
            );
        }
        stop.store(true, Ordering::Relaxed);
        reader.join().unwrap();
    }
}
