use chrono::{DateTime, Utc};
use dashmap::DashMap;
use std::collections::{HashSet, VecDeque};

use super::types::RiskProfile;
use crate::detect::types::AnomalyScore;
use crate::metrics::TransactionMetric;

/// Bounded set of recently seen transaction ids, used to make ingestion
/// idempotent against at-least-once redelivery.
#[derive(Debug, Default)]
pub struct RecentIdSet {
    capacity: usize,
    order: VecDeque<String>,
    seen: HashSet<String>,
}

impl RecentIdSet {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            order: VecDeque::with_capacity(capacity),
            seen: HashSet::with_capacity(capacity),
        }
    }

    /// Record an id. Returns false if it was already present (duplicate).
    pub fn insert(&mut self, id: &str) -> bool {
        if self.seen.contains(id) {
            return false;
        }
        if self.order.len() == self.capacity {
            if let Some(evicted) = self.order.pop_front() {
                self.seen.remove(&evicted);
            }
        }
        self.order.push_back(id.to_string());
        self.seen.insert(id.to_string());
        true
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }
}

/// Per-entity risk profiles plus the duplicate-id windows that guard them.
/// Same-entity mutation is serialized by the engine's keyed entity lock.
pub struct ProfileStore {
    recent_id_capacity: usize,
    profiles: DashMap<String, RiskProfile>,
    recent_ids: DashMap<String, RecentIdSet>,
}

impl ProfileStore {
    pub fn new(recent_id_capacity: usize) -> Self {
        Self {
            recent_id_capacity,
            profiles: DashMap::new(),
            recent_ids: DashMap::new(),
        }
    }

    /// Record a transaction id for an entity. Returns false for a
    /// duplicate within the bounded recent-id window.
    pub fn mark_seen(&self, entity_id: &str, transaction_id: &str) -> bool {
        let mut ids = self
            .recent_ids
            .entry(entity_id.to_string())
            .or_insert_with(|| RecentIdSet::new(self.recent_id_capacity));
        ids.insert(transaction_id)
    }

    /// Fold a metric into the entity's profile, creating it lazily.
    /// Returns a snapshot of the updated profile.
    pub fn update(&self, metric: &TransactionMetric, now: DateTime<Utc>) -> RiskProfile {
        let mut profile = self
            .profiles
            .entry(metric.entity_id.clone())
            .or_insert_with(|| RiskProfile::new(&metric.entity_id, now));
        profile.fold_metric(metric, now);
        profile.clone()
    }

    /// Blend anomaly scores into the entity's risk score. Returns the new
    /// risk score, or None if the profile does not exist.
    pub fn apply_anomaly_scores(
        &self,
        entity_id: &str,
        scores: &[AnomalyScore],
        now: DateTime<Utc>,
    ) -> Option<f64> {
        let mut profile = self.profiles.get_mut(entity_id)?;
        profile.apply_anomaly_scores(scores, now);
        Some(profile.risk_score)
    }

    pub fn get(&self, entity_id: &str) -> Option<RiskProfile> {
        self.profiles.get(entity_id).map(|p| p.clone())
    }

    pub fn get_or_create(&self, entity_id: &str, now: DateTime<Utc>) -> RiskProfile {
        self.profiles
            .entry(entity_id.to_string())
            .or_insert_with(|| RiskProfile::new(entity_id, now))
            .clone()
    }

    /// Restore a checkpointed profile (startup path).
    pub fn restore(&self, profile: RiskProfile) {
        self.profiles.insert(profile.entity_id.clone(), profile);
    }

    pub fn entity_ids(&self) -> Vec<String> {
        self.profiles.iter().map(|e| e.key().clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.profiles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.profiles.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::MetricType;

    fn metric(entity: &str, tx: &str, amount: f64) -> TransactionMetric {
        TransactionMetric {
            entity_id: entity.to_string(),
            transaction_id: tx.to_string(),
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
    fn test_recent_ids_detect_duplicates() {
        let mut ids = RecentIdSet::new(3);
        assert!(ids.insert("a"));
        assert!(!ids.insert("a"));
        assert!(ids.insert("b"));
        assert!(ids.insert("c"));
        // "a" evicted once capacity rolls over
        assert!(ids.insert("d"));
        assert!(ids.insert("a"));
        assert_eq!(ids.len(), 3);
    }

    #[test]
    fn test_duplicate_not_double_counted() {
        let store = ProfileStore::new(16);
        let now = Utc::now();
        let m = metric("U1", "tx-1", 10.0);

        assert!(store.mark_seen("U1", "tx-1"));
        store.update(&m, now);
        // Redelivery: caller checks mark_seen before update.
        assert!(!store.mark_seen("U1", "tx-1"));

        assert_eq!(store.get("U1").unwrap().history.count, 1);
    }

    #[test]
    fn test_lazy_creation() {
        let store = ProfileStore::new(16);
        assert!(store.get("U1").is_none());
        let profile = store.update(&metric("U1", "tx-1", 10.0), Utc::now());
        assert_eq!(profile.history.count, 1);
        assert_eq!(store.len(), 1);
    }
}
