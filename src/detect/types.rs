use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

/// Kinds of anomalies the detectors can report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnomalyType {
    AmountAnomaly,
    FrequencyAnomaly,
    VelocityAnomaly,
    PatternAnomaly,
    BehaviorAnomaly,
}

impl AnomalyType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::AmountAnomaly => "amount_anomaly",
            Self::FrequencyAnomaly => "frequency_anomaly",
            Self::VelocityAnomaly => "velocity_anomaly",
            Self::PatternAnomaly => "pattern_anomaly",
            Self::BehaviorAnomaly => "behavior_anomaly",
        }
    }
}

/// Alert severity, derived from the anomaly score.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

impl Severity {
    pub fn from_score(score: f64) -> Self {
        if score >= 0.9 {
            Self::Critical
        } else if score >= 0.7 {
            Self::High
        } else if score >= 0.5 {
            Self::Medium
        } else {
            Self::Low
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
            Self::Critical => "critical",
        }
    }
}

/// One detector's verdict on one event. Ephemeral; only alerts derived
/// from it are persisted.
#[derive(Debug, Clone, Serialize)]
pub struct AnomalyScore {
    pub anomaly_type: AnomalyType,
    /// Normalized score in [0, 1].
    pub score: f64,
    pub severity: Severity,
    pub description: String,
    pub features: JsonValue,
    pub confidence: f64,
    pub timestamp: DateTime<Utc>,
}

impl AnomalyScore {
    pub fn new(
        anomaly_type: AnomalyType,
        score: f64,
        description: String,
        features: JsonValue,
        timestamp: DateTime<Utc>,
    ) -> Self {
        let score = score.clamp(0.0, 1.0);
        Self {
            anomaly_type,
            score,
            severity: Severity::from_score(score),
            description,
            features,
            confidence: (score * 0.8).min(0.95),
            timestamp,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_severity_mapping() {
        assert_eq!(Severity::from_score(0.95), Severity::Critical);
        assert_eq!(Severity::from_score(0.9), Severity::Critical);
        assert_eq!(Severity::from_score(0.75), Severity::High);
        assert_eq!(Severity::from_score(0.5), Severity::Medium);
        assert_eq!(Severity::from_score(0.2), Severity::Low);
    }

    #[test]
    fn test_score_clamped() {
        let s = AnomalyScore::new(
            AnomalyType::AmountAnomaly,
            1.7,
            "z-score over threshold".to_string(),
            serde_json::json!({}),
            Utc::now(),
        );
        assert_eq!(s.score, 1.0);
        assert_eq!(s.severity, Severity::Critical);
        assert!(s.confidence <= 0.95);
    }
}
