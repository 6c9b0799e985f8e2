use chrono::{DateTime, Utc};
use dashmap::DashMap;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

use crate::config::AlertConfig;
use crate::detect::types::{AnomalyScore, AnomalyType};
use crate::errors::AlertError;
use crate::metrics::TransactionMetric;
use crate::realtime::Broadcaster;
use crate::storage::{self, Store};

use super::types::{AlertStatus, AnomalyAlert};

/// Converts qualifying anomaly scores into deduplicated alerts, owns the
/// alert status state machine, and keeps an in-process cache of
/// non-terminal alerts. Cooldown reads/writes for one entity happen under
/// the engine's keyed entity lock.
pub struct AlertManager {
    config: AlertConfig,
    alert_threshold: f64,
    store_timeout: Duration,
    store: Arc<dyn Store>,
    broadcaster: Arc<Broadcaster>,
    cooldowns: DashMap<(String, AnomalyType), DateTime<Utc>>,
    active: DashMap<Uuid, AnomalyAlert>,
}

impl AlertManager {
    pub fn new(
        config: AlertConfig,
        alert_threshold: f64,
        store_timeout: Duration,
        store: Arc<dyn Store>,
        broadcaster: Arc<Broadcaster>,
    ) -> Self {
        Self {
            config,
            alert_threshold,
            store_timeout,
            store,
            broadcaster,
            cooldowns: DashMap::new(),
            active: DashMap::new(),
        }
    }

    /// Raise alerts for every score at or above the alert threshold,
    /// suppressing repeats of the same (entity, type) inside the cooldown
    /// window. Created alerts are persisted (best-effort) and published.
    pub async fn process_scores(
        &self,
        metric: &TransactionMetric,
        scores: &[AnomalyScore],
    ) -> Vec<AnomalyAlert> {
        let mut raised = Vec::new();
        for score in scores {
            if score.score < self.alert_threshold {
                continue;
            }
            let key = (metric.entity_id.clone(), score.anomaly_type);
            if let Some(last) = self.cooldowns.get(&key) {
                if score.timestamp - *last < self.config.cooldown() {
                    tracing::debug!(
                        entity = %metric.entity_id,
                        anomaly_type = score.anomaly_type.as_str(),
                        "Alert suppressed by cooldown"
                    );
                    continue;
                }
            }
            self.cooldowns.insert(key, score.timestamp);

            let alert = AnomalyAlert::from_score(&metric.entity_id, &metric.transaction_id, score);
            tracing::warn!(
                alert_id = %alert.id,
                entity = %alert.entity_id,
                anomaly_type = alert.anomaly_type.as_str(),
                severity = alert.severity.as_str(),
                score = alert.score,
                "ANOMALY ALERT"
            );

            if let Err(e) =
                storage::with_timeout(self.store_timeout, self.store.put_alert(&alert)).await
            {
                tracing::error!(
                    alert_id = %alert.id,
                    error = %e,
                    "Failed to persist alert, in-memory state remains authoritative"
                );
            }
            self.active.insert(alert.id, alert.clone());
            self.broadcaster.publish_alert(&alert, metric.metric_type);
            raised.push(alert);
        }
        raised
    }

    /// Apply an operator status transition. Terminal states reject all
    /// further transitions; terminal alerts leave the active cache.
    pub async fn update_status(
        &self,
        id: Uuid,
        status: AlertStatus,
    ) -> Result<AnomalyAlert, AlertError> {
        let mut alert = match self.active.get(&id).map(|a| a.clone()) {
            Some(alert) => alert,
            None => storage::with_timeout(self.store_timeout, self.store.get_alert(id))
                .await?
                .ok_or(AlertError::NotFound(id))?,
        };

        if !alert.status.can_transition_to(status) {
            return Err(AlertError::InvalidTransition {
                from: alert.status,
                to: status,
            });
        }
        alert.status = status;

        storage::with_timeout(self.store_timeout, self.store.put_alert(&alert)).await?;
        if status.is_terminal() {
            self.active.remove(&id);
        } else {
            self.active.insert(id, alert.clone());
        }
        tracing::info!(alert_id = %id, status = status.as_str(), "Alert status updated");
        Ok(alert)
    }

    /// Non-terminal alerts, optionally filtered by entity, newest first.
    pub fn active_alerts(&self, entity_id: Option<&str>) -> Vec<AnomalyAlert> {
        let mut alerts: Vec<AnomalyAlert> = self
            .active
            .iter()
            .filter(|a| entity_id.map(|e| a.entity_id == e).unwrap_or(true))
            .map(|a| a.clone())
            .collect();
        alerts.sort_by_key(|a| std::cmp::Reverse(a.timestamp));
        alerts
    }

    pub fn active_count(&self) -> usize {
        self.active.len()
    }

    /// Drop alerts older than the cutoff from the store, the active cache,
    /// and stale cooldown entries. Returns how many the store removed.
    pub async fn expire_before(&self, cutoff: DateTime<Utc>) -> Result<u64, AlertError> {
        let removed =
            storage::with_timeout(self.store_timeout, self.store.delete_alerts_before(cutoff))
                .await?;
        self.active.retain(|_, a| a.timestamp >= cutoff);
        self.cooldowns.retain(|_, last| *last >= cutoff);
        Ok(removed)
    }
}
