use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use std::collections::{HashMap, VecDeque};
use uuid::Uuid;

use super::{Store, StoreResult};
use crate::alerts::types::AnomalyAlert;
use crate::metrics::TransactionMetric;
use crate::profile::RiskProfile;

/// Cap on retained feature records; oldest are discarded beyond it.
const METRIC_HISTORY_CAP: usize = 100_000;

/// In-process implementation of the durable-store boundary. Used by the
/// binary and by tests; a database-backed implementation plugs in behind
/// the same trait.
#[derive(Default)]
pub struct MemoryStore {
    alerts: RwLock<HashMap<Uuid, AnomalyAlert>>,
    profiles: RwLock<HashMap<String, RiskProfile>>,
    metrics: RwLock<VecDeque<TransactionMetric>>,
    model_states: RwLock<HashMap<String, serde_json::Value>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn alert_count(&self) -> usize {
        self.alerts.read().len()
    }

    pub fn profile_count(&self) -> usize {
        self.profiles.read().len()
    }

    pub fn metric_count(&self) -> usize {
        self.metrics.read().len()
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn put_alert(&self, alert: &AnomalyAlert) -> StoreResult<()> {
        self.alerts.write().insert(alert.id, alert.clone());
        Ok(())
    }

    async fn get_alert(&self, id: Uuid) -> StoreResult<Option<AnomalyAlert>> {
        Ok(self.alerts.read().get(&id).cloned())
    }

    async fn query_alerts(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        entity_id: Option<&str>,
    ) -> StoreResult<Vec<AnomalyAlert>> {
        let mut alerts: Vec<AnomalyAlert> = self
            .alerts
            .read()
            .values()
            .filter(|a| a.timestamp >= start && a.timestamp <= end)
            .filter(|a| entity_id.map(|e| a.entity_id == e).unwrap_or(true))
            .cloned()
            .collect();
        alerts.sort_by_key(|a| std::cmp::Reverse(a.timestamp));
        Ok(alerts)
    }

    async fn delete_alerts_before(&self, cutoff: DateTime<Utc>) -> StoreResult<u64> {
        let mut alerts = self.alerts.write();
        let before = alerts.len();
        alerts.retain(|_, a| a.timestamp >= cutoff);
        Ok((before - alerts.len()) as u64)
    }

    async fn put_profile(&self, profile: &RiskProfile) -> StoreResult<()> {
        self.profiles
            .write()
            .insert(profile.entity_id.clone(), profile.clone());
        Ok(())
    }

    async fn get_profile(&self, entity_id: &str) -> StoreResult<Option<RiskProfile>> {
        Ok(self.profiles.read().get(entity_id).cloned())
    }

    async fn list_profiles(&self) -> StoreResult<Vec<RiskProfile>> {
        Ok(self.profiles.read().values().cloned().collect())
    }

    async fn put_metric(&self, metric: &TransactionMetric) -> StoreResult<()> {
        let mut metrics = self.metrics.write();
        if metrics.len() == METRIC_HISTORY_CAP {
            metrics.pop_front();
        }
        metrics.push_back(metric.clone());
        Ok(())
    }

    async fn query_metrics(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        entity_id: Option<&str>,
        limit: usize,
    ) -> StoreResult<Vec<TransactionMetric>> {
        Ok(self
            .metrics
            .read()
            .iter()
            .filter(|m| m.timestamp >= start && m.timestamp <= end)
            .filter(|m| entity_id.map(|e| m.entity_id == e).unwrap_or(true))
            .take(limit)
            .cloned()
            .collect())
    }

    async fn put_model_state(&self, key: &str, state: serde_json::Value) -> StoreResult<()> {
        self.model_states.write().insert(key.to_string(), state);
        Ok(())
    }

    async fn get_model_state(&self, key: &str) -> StoreResult<Option<serde_json::Value>> {
        Ok(self.model_states.read().get(key).cloned())
    }
}
