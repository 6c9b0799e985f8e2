use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};
use uuid::Uuid;

use crate::alerts::{AlertManager, AlertStatus, AnomalyAlert};
use crate::config::Config;
use crate::detect::{AnomalyScore, DetectionEngine};
use crate::errors::{AlertError, IngestError, StoreError};
use crate::metrics::{MetricType, TransactionMetric, WindowStore};
use crate::profile::{ProfileStore, RiskProfile};
use crate::realtime::{Broadcaster, MetricSnapshot, RealtimeMessage};
use crate::storage::{self, Store};

/// Sharded keyed mutex serializing all mutations for one entity. Two
/// concurrent events for the same entity cannot interleave their
/// read-modify-write of windows, profile, or cooldown state; distinct
/// entities proceed fully in parallel.
struct EntityLocks {
    locks: DashMap<String, Arc<Mutex<()>>>,
}

impl EntityLocks {
    fn new() -> Self {
        Self {
            locks: DashMap::new(),
        }
    }

    fn for_entity(&self, entity_id: &str) -> Arc<Mutex<()>> {
        self.locks
            .entry(entity_id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }
}

/// Result of ingesting one event.
#[derive(Debug)]
pub enum IngestOutcome {
    Processed {
        scores: Vec<AnomalyScore>,
        alerts: Vec<AnomalyAlert>,
        risk_score: f64,
    },
    /// The transaction id was already seen recently (at-least-once
    /// redelivery); the event was dropped without side effects.
    Duplicate,
}

#[derive(Debug, Clone, Serialize)]
pub struct ThresholdSummary {
    pub metric_type: MetricType,
    pub calibrated: bool,
    pub mean: f64,
    pub std_dev: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct EntitySnapshot {
    pub entity_id: String,
    pub risk_score: f64,
    pub transaction_count: u64,
    pub window_len: usize,
    pub active_alerts: usize,
}

/// Point-in-time view of the engine for the query surface.
#[derive(Debug, Clone, Serialize)]
pub struct RealtimeSnapshot {
    /// Epoch milliseconds.
    pub timestamp: i64,
    pub entity_count: usize,
    pub active_alerts: usize,
    pub subscriber_count: usize,
    pub thresholds: Vec<ThresholdSummary>,
    pub entity: Option<EntitySnapshot>,
}

/// Outcome counts for one checkpoint run.
#[derive(Debug, Default)]
pub struct CheckpointSummary {
    pub profiles_written: usize,
    pub models_written: usize,
    pub failures: usize,
}

/// Process-scoped anomaly-detection engine: windows, profiles, detectors,
/// alerting and realtime fan-out behind one ingest entry point.
/// Constructed at startup, checkpointed periodically, flushed on shutdown.
pub struct Engine {
    config: Config,
    windows: WindowStore,
    profiles: ProfileStore,
    detection: DetectionEngine,
    alerts: AlertManager,
    broadcaster: Arc<Broadcaster>,
    store: Arc<dyn Store>,
    entity_locks: EntityLocks,
}

impl Engine {
    pub fn new(config: Config, store: Arc<dyn Store>) -> Self {
        let broadcaster = Arc::new(Broadcaster::new(config.realtime.subscriber_buffer));
        let alerts = AlertManager::new(
            config.alerts.clone(),
            config.detection.alert_threshold,
            config.storage.timeout(),
            store.clone(),
            broadcaster.clone(),
        );
        Self {
            windows: WindowStore::new(config.ingest.window_capacity),
            profiles: ProfileStore::new(config.ingest.recent_id_capacity),
            detection: DetectionEngine::new(config.detection.clone()),
            alerts,
            broadcaster,
            store,
            entity_locks: EntityLocks::new(),
            config,
        }
    }

    /// Ingest one event: validate, dedupe, window, score with every
    /// detector, raise alerts, and fold the result into the risk profile.
    /// Data-quality rejections surface as `IngestError`; everything else
    /// degrades to "scored with fewer detectors" and never panics the
    /// caller.
    pub async fn ingest(&self, metric: TransactionMetric) -> Result<IngestOutcome, IngestError> {
        let now = Utc::now();
        metric.validate(&self.config.ingest, now)?;

        let lock = self.entity_locks.for_entity(&metric.entity_id);
        let guard = lock.lock().await;

        if !self.profiles.mark_seen(&metric.entity_id, &metric.transaction_id) {
            tracing::debug!(
                entity = %metric.entity_id,
                transaction = %metric.transaction_id,
                "Duplicate transaction id, dropping redelivered event"
            );
            return Ok(IngestOutcome::Duplicate);
        }

        // Window snapshot includes the new event; detectors see the
        // profile as it stood before this event.
        let window = self.windows.push(metric.clone());
        let profile_before = self.profiles.get_or_create(&metric.entity_id, now);

        let scores = self
            .detection
            .run_all(&metric, &window, &profile_before, now);

        let alerts = self.alerts.process_scores(&metric, &scores).await;

        self.profiles.update(&metric, now);
        let risk_score = self
            .profiles
            .apply_anomaly_scores(&metric.entity_id, &scores, now)
            .unwrap_or(profile_before.risk_score);

        drop(guard);

        // Persistence and fan-out happen outside the entity lock; a slow
        // store call must not stall other events for this entity.
        if let Err(e) = storage::with_timeout(
            self.config.storage.timeout(),
            self.store.put_metric(&metric),
        )
        .await
        {
            tracing::error!(
                entity = %metric.entity_id,
                error = %e,
                "Failed to persist metric, will be absent from recalibration samples"
            );
        }
        self.broadcaster
            .publish_metric(&MetricSnapshot::from_metric(&metric));

        Ok(IngestOutcome::Processed {
            scores,
            alerts,
            risk_score,
        })
    }

    // === Query surface (consumed by the HTTP layer) ===

    pub fn realtime_snapshot(&self, entity_id: Option<&str>) -> RealtimeSnapshot {
        let thresholds = self
            .detection
            .thresholds()
            .snapshot_all()
            .into_iter()
            .map(|(metric_type, t)| ThresholdSummary {
                metric_type,
                calibrated: t.calibrated,
                mean: t.mean,
                std_dev: t.std_dev,
            })
            .collect();

        let entity = entity_id.and_then(|id| {
            self.profiles.get(id).map(|profile| EntitySnapshot {
                entity_id: id.to_string(),
                risk_score: profile.risk_score,
                transaction_count: profile.history.count,
                window_len: self.windows.len(id, MetricType::Transaction)
                    + self.windows.len(id, MetricType::Payment),
                active_alerts: self.alerts.active_alerts(Some(id)).len(),
            })
        });

        RealtimeSnapshot {
            timestamp: Utc::now().timestamp_millis(),
            entity_count: self.profiles.len(),
            active_alerts: self.alerts.active_count(),
            subscriber_count: self.broadcaster.subscriber_count(),
            thresholds,
            entity,
        }
    }

    pub async fn historical_data(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        entity_id: Option<&str>,
        limit: usize,
    ) -> Result<Vec<TransactionMetric>, StoreError> {
        storage::with_timeout(
            self.config.storage.timeout(),
            self.store.query_metrics(start, end, entity_id, limit),
        )
        .await
    }

    pub fn active_alerts(&self, entity_id: Option<&str>) -> Vec<AnomalyAlert> {
        self.alerts.active_alerts(entity_id)
    }

    pub async fn update_alert_status(
        &self,
        id: Uuid,
        status: AlertStatus,
    ) -> Result<AnomalyAlert, AlertError> {
        self.alerts.update_status(id, status).await
    }

    /// The entity's risk profile: the live in-memory one, falling back to
    /// the last checkpointed copy for entities not seen since a restart.
    pub async fn risk_profile(&self, entity_id: &str) -> Option<RiskProfile> {
        if let Some(profile) = self.profiles.get(entity_id) {
            return Some(profile);
        }
        match storage::with_timeout(
            self.config.storage.timeout(),
            self.store.get_profile(entity_id),
        )
        .await
        {
            Ok(profile) => profile,
            Err(e) => {
                tracing::warn!(entity = %entity_id, error = %e, "Profile lookup failed");
                None
            }
        }
    }

    // === Realtime channel boundary ===

    pub fn subscribe(
        &self,
        channels: impl IntoIterator<Item = String>,
    ) -> (Uuid, mpsc::Receiver<RealtimeMessage>) {
        self.broadcaster.subscribe(channels)
    }

    pub fn unsubscribe(&self, id: Uuid) -> bool {
        self.broadcaster.unsubscribe(id)
    }

    // === Component access for the lifecycle manager and tests ===

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn detection(&self) -> &DetectionEngine {
        &self.detection
    }

    pub fn profiles(&self) -> &ProfileStore {
        &self.profiles
    }

    pub fn alerts(&self) -> &AlertManager {
        &self.alerts
    }

    pub fn broadcaster(&self) -> &Arc<Broadcaster> {
        &self.broadcaster
    }

    pub fn store(&self) -> &Arc<dyn Store> {
        &self.store
    }

    /// Checkpoint every in-memory profile plus the current threshold and
    /// model snapshots to the durable store. Each entity is captured under
    /// its own lock so a checkpoint never races live ingestion. Store
    /// failures are counted and retried on the next scheduled run.
    pub async fn checkpoint(&self) -> CheckpointSummary {
        let mut summary = CheckpointSummary::default();

        for entity_id in self.profiles.entity_ids() {
            let lock = self.entity_locks.for_entity(&entity_id);
            let profile = {
                let _guard = lock.lock().await;
                self.profiles.get(&entity_id)
            };
            let Some(profile) = profile else { continue };

            match storage::with_timeout(
                self.config.storage.timeout(),
                self.store.put_profile(&profile),
            )
            .await
            {
                Ok(()) => summary.profiles_written += 1,
                Err(e) => {
                    summary.failures += 1;
                    tracing::error!(entity = %entity_id, error = %e, "Profile checkpoint failed");
                }
            }
        }

        for (metric_type, threshold) in self.detection.thresholds().snapshot_all() {
            let key = format!("threshold_{}", metric_type.as_str());
            let state = serde_json::to_value(threshold.as_ref()).unwrap_or_default();
            match storage::with_timeout(
                self.config.storage.timeout(),
                self.store.put_model_state(&key, state),
            )
            .await
            {
                Ok(()) => summary.models_written += 1,
                Err(e) => {
                    summary.failures += 1;
                    tracing::error!(key = %key, error = %e, "Threshold checkpoint failed");
                }
            }
        }

        for (metric_type, model) in self.detection.models().snapshot_all() {
            let key = format!("pattern_{}", metric_type.as_str());
            let state = serde_json::to_value(model.as_ref()).unwrap_or_default();
            match storage::with_timeout(
                self.config.storage.timeout(),
                self.store.put_model_state(&key, state),
            )
            .await
            {
                Ok(()) => summary.models_written += 1,
                Err(e) => {
                    summary.failures += 1;
                    tracing::error!(key = %key, error = %e, "Model checkpoint failed");
                }
            }
        }

        tracing::info!(
            profiles = summary.profiles_written,
            models = summary.models_written,
            failures = summary.failures,
            "Checkpoint complete"
        );
        summary
    }
}
