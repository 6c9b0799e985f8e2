use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::detect::types::{AnomalyScore, AnomalyType, Severity};

/// Alert life-cycle. Created in `active`; `resolved` and `false_positive`
/// are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertStatus {
    Active,
    Investigating,
    Resolved,
    FalsePositive,
}

impl AlertStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Resolved | Self::FalsePositive)
    }

    /// Operators may move `active`/`investigating` to any other state.
    /// Nothing leaves a terminal state.
    pub fn can_transition_to(&self, next: AlertStatus) -> bool {
        !self.is_terminal() && *self != next
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Investigating => "investigating",
            Self::Resolved => "resolved",
            Self::FalsePositive => "false_positive",
        }
    }
}

/// A persisted, severity-ranked alert derived from an anomaly score.
/// `status` is the only field mutable after creation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnomalyAlert {
    pub id: Uuid,
    pub entity_id: String,
    pub transaction_id: String,
    pub anomaly_type: AnomalyType,
    pub severity: Severity,
    pub score: f64,
    pub confidence: f64,
    pub description: String,
    pub features: serde_json::Value,
    pub timestamp: DateTime<Utc>,
    pub status: AlertStatus,
    pub investigation_required: bool,
}

impl AnomalyAlert {
    pub fn from_score(entity_id: &str, transaction_id: &str, score: &AnomalyScore) -> Self {
        Self {
            id: Uuid::new_v4(),
            entity_id: entity_id.to_string(),
            transaction_id: transaction_id.to_string(),
            anomaly_type: score.anomaly_type,
            severity: score.severity,
            score: score.score,
            confidence: score.confidence,
            description: score.description.clone(),
            features: score.features.clone(),
            timestamp: score.timestamp,
            status: AlertStatus::Active,
            investigation_required: score.severity >= Severity::High,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_terminal_states_reject_transitions() {
        for terminal in [AlertStatus::Resolved, AlertStatus::FalsePositive] {
            for next in [
                AlertStatus::Active,
                AlertStatus::Investigating,
                AlertStatus::Resolved,
                AlertStatus::FalsePositive,
            ] {
                assert!(!terminal.can_transition_to(next));
            }
        }
    }

    #[test]
    fn test_active_transitions_anywhere_else() {
        assert!(AlertStatus::Active.can_transition_to(AlertStatus::Investigating));
        assert!(AlertStatus::Active.can_transition_to(AlertStatus::Resolved));
        assert!(AlertStatus::Active.can_transition_to(AlertStatus::FalsePositive));
        assert!(!AlertStatus::Active.can_transition_to(AlertStatus::Active));
        assert!(AlertStatus::Investigating.can_transition_to(AlertStatus::Resolved));
    }

    #[test]
    fn test_high_severity_requires_investigation() {
        let score = AnomalyScore::new(
            AnomalyType::AmountAnomaly,
            0.95,
            "test".to_string(),
            serde_json::json!({}),
            Utc::now(),
        );
        let alert = AnomalyAlert::from_score("U1", "tx-1", &score);
        assert_eq!(alert.status, AlertStatus::Active);
        assert!(alert.investigation_required);

        let mild = AnomalyScore::new(
            AnomalyType::BehaviorAnomaly,
            0.55,
            "test".to_string(),
            serde_json::json!({}),
            Utc::now(),
        );
        assert!(!AnomalyAlert::from_score("U1", "tx-2", &mild).investigation_required);
    }
}
