use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{HashSet, VecDeque};

use crate::detect::types::{AnomalyScore, AnomalyType};
use crate::metrics::{GeoPoint, TransactionMetric};

/// How many anomaly records a profile retains, most recent first.
pub const ANOMALY_HISTORY_CAPACITY: usize = 100;

/// Running transaction aggregates, updated incrementally on every event.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TransactionHistory {
    pub count: u64,
    pub total_amount: f64,
    pub average_amount: f64,
    pub currencies: HashSet<String>,
    pub merchants: HashSet<String>,
    /// Coarse 0.1-degree grid cells of observed locations.
    pub locations: HashSet<(i32, i32)>,
}

/// Time-of-day and day-of-week histograms of observed activity.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BehaviorPatterns {
    pub hour_histogram: [u64; 24],
    pub day_histogram: [u64; 7],
}

impl BehaviorPatterns {
    /// Fraction of history falling in the given hour. None until any
    /// history exists.
    pub fn hour_share(&self, hour: usize) -> Option<f64> {
        let total: u64 = self.hour_histogram.iter().sum();
        if total == 0 {
            return None;
        }
        Some(self.hour_histogram[hour % 24] as f64 / total as f64)
    }

    pub fn total_samples(&self) -> u64 {
        self.hour_histogram.iter().sum()
    }
}

/// Compact record of a past anomaly kept on the profile.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnomalyRecord {
    pub anomaly_type: AnomalyType,
    pub score: f64,
    pub timestamp: DateTime<Utc>,
}

/// Per-entity behavioral model: running aggregates, histograms, and a
/// decaying anomaly-weighted risk score. Created lazily on first event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RiskProfile {
    pub entity_id: String,
    /// Blended risk in [0, 1].
    pub risk_score: f64,
    pub history: TransactionHistory,
    pub behavior: BehaviorPatterns,
    /// Most-recent-first, bounded to ANOMALY_HISTORY_CAPACITY.
    pub anomaly_history: VecDeque<AnomalyRecord>,
    pub created_at: DateTime<Utc>,
    pub last_updated: DateTime<Utc>,
}

impl RiskProfile {
    pub fn new(entity_id: &str, now: DateTime<Utc>) -> Self {
        Self {
            entity_id: entity_id.to_string(),
            risk_score: 0.0,
            history: TransactionHistory::default(),
            behavior: BehaviorPatterns::default(),
            anomaly_history: VecDeque::new(),
            created_at: now,
            last_updated: now,
        }
    }

    /// Fold one event into the running aggregates. Incremental only; never
    /// recomputes from history.
    pub fn fold_metric(&mut self, metric: &TransactionMetric, now: DateTime<Utc>) {
        self.history.count += 1;
        self.history.total_amount += metric.amount;
        self.history.average_amount = self.history.total_amount / self.history.count as f64;
        self.history.currencies.insert(metric.currency.clone());
        if let Some(merchant) = &metric.merchant_id {
            self.history.merchants.insert(merchant.clone());
        }
        if let Some(location) = &metric.location {
            self.history.locations.insert(location.grid_cell());
        }
        self.behavior.hour_histogram[metric.hour_of_day()] += 1;
        self.behavior.day_histogram[metric.day_of_week()] += 1;
        self.last_updated = now;
    }

    /// Blend qualifying anomaly scores (>= 0.5) into the risk score:
    /// `new = old*0.7 + max*0.2 + avg*0.1`, clamped to [0, 1]. Appends
    /// compact records to the bounded anomaly history.
    pub fn apply_anomaly_scores(&mut self, scores: &[AnomalyScore], now: DateTime<Utc>) {
        let qualifying: Vec<&AnomalyScore> = scores.iter().filter(|s| s.score >= 0.5).collect();
        if qualifying.is_empty() {
            return;
        }
        let max = qualifying.iter().map(|s| s.score).fold(0.0_f64, f64::max);
        let avg = qualifying.iter().map(|s| s.score).sum::<f64>() / qualifying.len() as f64;
        self.risk_score = (self.risk_score * 0.7 + max * 0.2 + avg * 0.1).clamp(0.0, 1.0);

        for score in qualifying {
            self.anomaly_history.push_front(AnomalyRecord {
                anomaly_type: score.anomaly_type,
                score: score.score,
                timestamp: score.timestamp,
            });
        }
        self.anomaly_history.truncate(ANOMALY_HISTORY_CAPACITY);
        self.last_updated = now;
    }

    /// Centroid of known location grid cells, if any.
    pub fn typical_location(&self) -> Option<GeoPoint> {
        if self.history.locations.is_empty() {
            return None;
        }
        let n = self.history.locations.len() as f64;
        let (lat_sum, lon_sum) = self
            .history
            .locations
            .iter()
            .fold((0.0, 0.0), |(la, lo), (cell_lat, cell_lon)| {
                (la + *cell_lat as f64 / 10.0, lo + *cell_lon as f64 / 10.0)
            });
        Some(GeoPoint {
            lat: lat_sum / n,
            lon: lon_sum / n,
        })
    }

    /// Profile age in hours, floored at one hour so rate baselines stay
    /// finite for brand-new entities.
    pub fn age_hours(&self, now: DateTime<Utc>) -> f64 {
        ((now - self.created_at).num_seconds() as f64 / 3600.0).max(1.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detect::types::AnomalyScore;
    use crate::metrics::MetricType;

    fn metric(amount: f64, merchant: Option<&str>) -> TransactionMetric {
        TransactionMetric {
            entity_id: "U1".to_string(),
            transaction_id: "tx".to_string(),
            metric_type: MetricType::Transaction,
            amount,
            currency: "USD".to_string(),
            category: "misc".to_string(),
            merchant_id: merchant.map(String::from),
            location: None,
            timestamp: Utc::now(),
        }
    }

    fn score(value: f64) -> AnomalyScore {
        AnomalyScore::new(
            AnomalyType::AmountAnomaly,
            value,
            "test".to_string(),
            serde_json::json!({}),
            Utc::now(),
        )
    }

    #[test]
    fn test_fold_keeps_count_in_step() {
        let now = Utc::now();
        let mut profile = RiskProfile::new("U1", now);
        for i in 1..=25 {
            profile.fold_metric(&metric(10.0, Some("m1")), now);
            assert_eq!(profile.history.count, i);
        }
        assert!((profile.history.average_amount - 10.0).abs() < 1e-9);
        assert_eq!(profile.history.merchants.len(), 1);
        assert_eq!(profile.behavior.total_samples(), 25);
    }

    #[test]
    fn test_risk_monotonically_approaches_one() {
        let now = Utc::now();
        let mut profile = RiskProfile::new("U1", now);
        let mut previous = profile.risk_score;
        for _ in 0..50 {
            profile.apply_anomaly_scores(&[score(1.0)], now);
            assert!(profile.risk_score >= previous);
            assert!(profile.risk_score <= 1.0);
            previous = profile.risk_score;
        }
        assert!(profile.risk_score > 0.9);
    }

    #[test]
    fn test_risk_ignores_low_scores() {
        let now = Utc::now();
        let mut profile = RiskProfile::new("U1", now);
        profile.apply_anomaly_scores(&[score(0.3)], now);
        assert_eq!(profile.risk_score, 0.0);
        assert!(profile.anomaly_history.is_empty());
    }

    #[test]
    fn test_anomaly_history_bounded_most_recent_first() {
        let now = Utc::now();
        let mut profile = RiskProfile::new("U1", now);
        for i in 0..(ANOMALY_HISTORY_CAPACITY + 20) {
            let mut s = score(0.6);
            s.timestamp = now + chrono::Duration::seconds(i as i64);
            profile.apply_anomaly_scores(&[s], now);
        }
        assert_eq!(profile.anomaly_history.len(), ANOMALY_HISTORY_CAPACITY);
        // Most recent first.
        assert!(
            profile.anomaly_history[0].timestamp > profile.anomaly_history[1].timestamp
        );
    }

    #[test]
    fn test_typical_location_centroid() {
        let now = Utc::now();
        let mut profile = RiskProfile::new("U1", now);
        let mut m = metric(5.0, None);
        m.location = Some(GeoPoint { lat: 10.0, lon: 20.0 });
        profile.fold_metric(&m, now);
        let mut m2 = metric(5.0, None);
        m2.location = Some(GeoPoint { lat: 30.0, lon: 40.0 });
        profile.fold_metric(&m2, now);

        let typical = profile.typical_location().unwrap();
        assert!((typical.lat - 20.0).abs() < 0.2);
        assert!((typical.lon - 30.0).abs() < 0.2);
    }
}
