use chrono::Utc;
use dashmap::DashMap;
use serde::Serialize;
use std::collections::HashSet;
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::alerts::types::AnomalyAlert;
use crate::metrics::{MetricType, TransactionMetric};

/// Channel key for all events of a metric type.
pub fn metric_channel(metric_type: MetricType) -> String {
    format!("metric_{}", metric_type.as_str())
}

/// Channel key for one entity's events of a metric type.
pub fn entity_channel(entity_id: &str, metric_type: MetricType) -> String {
    format!("user_{}_{}", entity_id, metric_type.as_str())
}

/// JSON-serializable message delivered to subscribers. `timestamp` is
/// epoch milliseconds.
#[derive(Debug, Clone, Serialize)]
pub struct RealtimeMessage {
    pub kind: &'static str,
    pub timestamp: i64,
    pub payload: serde_json::Value,
}

/// Compact per-event snapshot published alongside alerts. Carries derived
/// fields only, never the full upstream payload.
#[derive(Debug, Clone, Serialize)]
pub struct MetricSnapshot {
    pub entity_id: String,
    pub metric_type: MetricType,
    pub amount: f64,
    pub currency: String,
    pub category: String,
    pub timestamp: i64,
}

impl MetricSnapshot {
    pub fn from_metric(metric: &TransactionMetric) -> Self {
        Self {
            entity_id: metric.entity_id.clone(),
            metric_type: metric.metric_type,
            amount: metric.amount,
            currency: metric.currency.clone(),
            category: metric.category.clone(),
            timestamp: metric.timestamp.timestamp_millis(),
        }
    }
}

struct Subscription {
    channels: HashSet<String>,
    tx: mpsc::Sender<RealtimeMessage>,
}

/// Fans alerts and metric snapshots out to channel subscribers. Delivery
/// is best-effort and non-blocking: a slow or disconnected subscriber
/// never blocks alert generation or other subscribers.
pub struct Broadcaster {
    buffer: usize,
    subscriptions: DashMap<Uuid, Subscription>,
}

impl Broadcaster {
    pub fn new(buffer: usize) -> Self {
        Self {
            buffer,
            subscriptions: DashMap::new(),
        }
    }

    /// Register a subscriber for a set of channel keys.
    pub fn subscribe(
        &self,
        channels: impl IntoIterator<Item = String>,
    ) -> (Uuid, mpsc::Receiver<RealtimeMessage>) {
        let (tx, rx) = mpsc::channel(self.buffer);
        let id = Uuid::new_v4();
        self.subscriptions.insert(
            id,
            Subscription {
                channels: channels.into_iter().collect(),
                tx,
            },
        );
        tracing::debug!(subscription = %id, "Subscriber registered");
        (id, rx)
    }

    pub fn unsubscribe(&self, id: Uuid) -> bool {
        self.subscriptions.remove(&id).is_some()
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscriptions.len()
    }

    /// Publish an alert to its type channel and the owning entity channel.
    pub fn publish_alert(&self, alert: &AnomalyAlert, metric_type: MetricType) {
        let channels = [
            metric_channel(metric_type),
            entity_channel(&alert.entity_id, metric_type),
        ];
        let message = RealtimeMessage {
            kind: "alert",
            timestamp: alert.timestamp.timestamp_millis(),
            payload: serde_json::to_value(alert).unwrap_or_default(),
        };
        self.fan_out(&channels, message);
    }

    /// Publish a metric snapshot to its type channel and entity channel.
    pub fn publish_metric(&self, snapshot: &MetricSnapshot) {
        let channels = [
            metric_channel(snapshot.metric_type),
            entity_channel(&snapshot.entity_id, snapshot.metric_type),
        ];
        let message = RealtimeMessage {
            kind: "metric",
            timestamp: snapshot.timestamp,
            payload: serde_json::to_value(snapshot).unwrap_or_default(),
        };
        self.fan_out(&channels, message);
    }

    /// Publish an engine-level notice (e.g. shutdown) to every subscriber.
    pub fn publish_system(&self, payload: serde_json::Value) {
        let message = RealtimeMessage {
            kind: "system",
            timestamp: Utc::now().timestamp_millis(),
            payload,
        };
        let mut closed = Vec::new();
        for entry in self.subscriptions.iter() {
            if let Err(mpsc::error::TrySendError::Closed(_)) = entry.tx.try_send(message.clone()) {
                closed.push(*entry.key());
            }
        }
        self.prune(closed);
    }

    fn fan_out(&self, channels: &[String], message: RealtimeMessage) {
        let mut closed = Vec::new();
        for entry in self.subscriptions.iter() {
            if !channels.iter().any(|c| entry.channels.contains(c)) {
                continue;
            }
            match entry.tx.try_send(message.clone()) {
                Ok(()) => {}
                Err(mpsc::error::TrySendError::Full(_)) => {
                    tracing::debug!(
                        subscription = %entry.key(),
                        "Subscriber buffer full, dropping message"
                    );
                }
                Err(mpsc::error::TrySendError::Closed(_)) => {
                    closed.push(*entry.key());
                }
            }
        }
        self.prune(closed);
    }

    fn prune(&self, closed: Vec<Uuid>) {
        for id in closed {
            self.subscriptions.remove(&id);
            tracing::debug!(subscription = %id, "Pruned disconnected subscriber");
        }
    }
}
