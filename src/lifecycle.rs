use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{interval_at, Instant};
use tokio_util::sync::CancellationToken;

use crate::detect::pattern::{extract_features, PatternModel};
use crate::detect::thresholds::StatisticalThreshold;
use crate::engine::Engine;
use crate::metrics::MetricType;
use crate::profile::RiskProfile;
use crate::storage::{self, Store};

/// Scheduled model maintenance: threshold recalibration, pattern
/// retraining, alert expiry, and state checkpoints. Jobs run on their own
/// cadence off one task; each failure is isolated to that run.
pub struct LifecycleManager {
    engine: Arc<Engine>,
}

impl LifecycleManager {
    pub fn new(engine: Arc<Engine>) -> Self {
        Self { engine }
    }

    /// Drive all scheduled jobs until cancellation, then take a final
    /// checkpoint so a restart resumes from fresh state.
    pub async fn run(self, shutdown: CancellationToken) {
        let lifecycle = &self.engine.config().lifecycle;
        let mut recalibrate = delayed_interval(lifecycle.recalibrate_secs);
        let mut retrain = delayed_interval(lifecycle.retrain_secs);
        let mut expire = delayed_interval(lifecycle.expire_secs);
        let mut checkpoint = delayed_interval(lifecycle.checkpoint_secs);

        tracing::info!(
            recalibrate_secs = lifecycle.recalibrate_secs,
            retrain_secs = lifecycle.retrain_secs,
            expire_secs = lifecycle.expire_secs,
            checkpoint_secs = lifecycle.checkpoint_secs,
            "Lifecycle manager started"
        );

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    tracing::info!("Lifecycle manager stopping, taking final checkpoint");
                    self.engine.checkpoint().await;
                    break;
                }
                _ = recalibrate.tick() => self.run_recalibration().await,
                _ = retrain.tick() => self.run_retraining().await,
                _ = expire.tick() => self.run_expiry().await,
                _ = checkpoint.tick() => {
                    self.engine.checkpoint().await;
                }
            }
        }
    }

    /// Recalibrate amount thresholds from recent persisted metrics. A type
    /// with too few samples, a degenerate sample, or a failed query keeps
    /// its previous threshold untouched.
    pub async fn run_recalibration(&self) {
        let config = self.engine.config();
        let now = Utc::now();
        let start = now - chrono::Duration::days(config.lifecycle.sample_window_days as i64);

        let metrics = match storage::with_timeout(
            config.storage.timeout(),
            self.engine
                .store()
                .query_metrics(start, now, None, config.lifecycle.max_sample_size),
        )
        .await
        {
            Ok(metrics) => metrics,
            Err(e) => {
                tracing::error!(error = %e, "Recalibration sample query failed, keeping thresholds");
                return;
            }
        };

        for metric_type in MetricType::ALL {
            let samples: Vec<f64> = metrics
                .iter()
                .filter(|m| m.metric_type == metric_type)
                .map(|m| m.amount)
                .collect();
            if samples.len() < config.lifecycle.min_calibration_samples {
                tracing::warn!(
                    metric_type = metric_type.as_str(),
                    samples = samples.len(),
                    required = config.lifecycle.min_calibration_samples,
                    "Too few samples to recalibrate, keeping previous threshold"
                );
                continue;
            }
            match StatisticalThreshold::from_samples(
                &samples,
                config.detection.z_score_threshold,
                config.detection.moving_average_window,
                now,
            ) {
                Some(threshold) => {
                    tracing::info!(
                        metric_type = metric_type.as_str(),
                        samples = samples.len(),
                        mean = threshold.mean,
                        std_dev = threshold.std_dev,
                        "Threshold recalibrated"
                    );
                    self.engine.detection().thresholds().replace(metric_type, threshold);
                }
                None => {
                    tracing::warn!(
                        metric_type = metric_type.as_str(),
                        "Degenerate sample, keeping previous threshold"
                    );
                }
            }
        }
    }

    /// Retrain pattern models from recent persisted metrics and persist
    /// the trained snapshot. Types with too few samples keep the previous
    /// model.
    pub async fn run_retraining(&self) {
        let config = self.engine.config();
        let now = Utc::now();
        let start = now - chrono::Duration::days(config.lifecycle.sample_window_days as i64);

        let metrics = match storage::with_timeout(
            config.storage.timeout(),
            self.engine
                .store()
                .query_metrics(start, now, None, config.lifecycle.max_sample_size),
        )
        .await
        {
            Ok(metrics) => metrics,
            Err(e) => {
                tracing::error!(error = %e, "Retraining sample query failed, keeping models");
                return;
            }
        };

        for metric_type in MetricType::ALL {
            let samples: Vec<Vec<f64>> = metrics
                .iter()
                .filter(|m| m.metric_type == metric_type)
                .map(|m| {
                    let profile = self
                        .engine
                        .profiles()
                        .get(&m.entity_id)
                        .unwrap_or_else(|| RiskProfile::new(&m.entity_id, now));
                    extract_features(m, &profile)
                })
                .collect();
            if samples.len() < config.lifecycle.min_training_samples {
                tracing::warn!(
                    metric_type = metric_type.as_str(),
                    samples = samples.len(),
                    required = config.lifecycle.min_training_samples,
                    "Too few samples to retrain, keeping previous model"
                );
                continue;
            }
            let Some(model) = PatternModel::train(&samples, now) else {
                tracing::warn!(
                    metric_type = metric_type.as_str(),
                    "Training produced no model, keeping previous one"
                );
                continue;
            };
            tracing::info!(
                metric_type = metric_type.as_str(),
                samples = model.sample_count,
                "Pattern model retrained"
            );

            let key = format!("pattern_{}", metric_type.as_str());
            let state = serde_json::to_value(&model).unwrap_or_default();
            if let Err(e) = storage::with_timeout(
                config.storage.timeout(),
                self.engine.store().put_model_state(&key, state),
            )
            .await
            {
                tracing::error!(key = %key, error = %e, "Failed to persist retrained model");
            }
            self.engine.detection().models().replace(metric_type, model);
        }
    }

    /// Delete alerts past their retention window.
    pub async fn run_expiry(&self) {
        let cutoff = Utc::now() - self.engine.config().alerts.retention();
        match self.engine.alerts().expire_before(cutoff).await {
            Ok(removed) if removed > 0 => {
                tracing::info!(removed, cutoff = %cutoff, "Expired alerts removed");
            }
            Ok(_) => {}
            Err(e) => tracing::error!(error = %e, "Alert expiry failed, will retry next run"),
        }
    }

    /// Load the last checkpointed risk profiles and threshold/model
    /// snapshots. Missing or unreadable documents leave the cold-start
    /// defaults in place.
    pub async fn restore(&self) {
        let config = self.engine.config();

        match storage::with_timeout(config.storage.timeout(), self.engine.store().list_profiles())
            .await
        {
            Ok(profiles) => {
                let count = profiles.len();
                for profile in profiles {
                    self.engine.profiles().restore(profile);
                }
                if count > 0 {
                    tracing::info!(profiles = count, "Risk profiles restored from checkpoint");
                }
            }
            Err(e) => tracing::warn!(error = %e, "Profile restore failed, starting cold"),
        }

        for metric_type in MetricType::ALL {
            let key = format!("threshold_{}", metric_type.as_str());
            match storage::with_timeout(
                config.storage.timeout(),
                self.engine.store().get_model_state(&key),
            )
            .await
            {
                Ok(Some(state)) => match serde_json::from_value::<StatisticalThreshold>(state) {
                    Ok(threshold) => {
                        self.engine.detection().thresholds().replace(metric_type, threshold);
                        tracing::info!(key = %key, "Threshold restored from checkpoint");
                    }
                    Err(e) => tracing::warn!(key = %key, error = %e, "Unreadable threshold state"),
                },
                Ok(None) => {}
                Err(e) => tracing::warn!(key = %key, error = %e, "Threshold restore failed"),
            }

            let key = format!("pattern_{}", metric_type.as_str());
            match storage::with_timeout(
                config.storage.timeout(),
                self.engine.store().get_model_state(&key),
            )
            .await
            {
                Ok(Some(state)) => match serde_json::from_value::<PatternModel>(state) {
                    Ok(model) => {
                        self.engine.detection().models().replace(metric_type, model);
                        tracing::info!(key = %key, "Pattern model restored from checkpoint");
                    }
                    Err(e) => tracing::warn!(key = %key, error = %e, "Unreadable model state"),
                },
                Ok(None) => {}
                Err(e) => tracing::warn!(key = %key, error = %e, "Model restore failed"),
            }
        }
    }
}

/// A periodic timer whose first tick fires one full period from now, so a
/// freshly started process does not immediately run every job.
fn delayed_interval(secs: u64) -> tokio::time::Interval {
    let period = Duration::from_secs(secs.max(1));
    let mut interval = interval_at(Instant::now() + period, period);
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    interval
}
