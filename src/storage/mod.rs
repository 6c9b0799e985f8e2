pub mod memory;

pub use memory::MemoryStore;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::future::Future;
use std::time::Duration;
use uuid::Uuid;

use crate::alerts::types::AnomalyAlert;
use crate::errors::StoreError;
use crate::metrics::TransactionMetric;
use crate::profile::RiskProfile;

pub type StoreResult<T> = Result<T, StoreError>;

/// Durable-store boundary: three logical collections (alerts, risk
/// profiles, model states) with get/put/query-by-time-range semantics.
/// `put_model_state` must replace the document by key so model swaps stay
/// atomic. The engine never depends on a particular storage backend.
#[async_trait]
pub trait Store: Send + Sync {
    async fn put_alert(&self, alert: &AnomalyAlert) -> StoreResult<()>;
    async fn get_alert(&self, id: Uuid) -> StoreResult<Option<AnomalyAlert>>;
    async fn query_alerts(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        entity_id: Option<&str>,
    ) -> StoreResult<Vec<AnomalyAlert>>;
    /// Delete alerts older than the cutoff. Returns how many were removed.
    async fn delete_alerts_before(&self, cutoff: DateTime<Utc>) -> StoreResult<u64>;

    async fn put_profile(&self, profile: &RiskProfile) -> StoreResult<()>;
    async fn get_profile(&self, entity_id: &str) -> StoreResult<Option<RiskProfile>>;
    /// Every checkpointed profile, for the startup restore path.
    async fn list_profiles(&self) -> StoreResult<Vec<RiskProfile>>;

    /// Persist a derived feature record for later recalibration/retraining.
    async fn put_metric(&self, metric: &TransactionMetric) -> StoreResult<()>;
    async fn query_metrics(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        entity_id: Option<&str>,
        limit: usize,
    ) -> StoreResult<Vec<TransactionMetric>>;

    /// Replace-by-key model/threshold state document.
    async fn put_model_state(&self, key: &str, state: serde_json::Value) -> StoreResult<()>;
    async fn get_model_state(&self, key: &str) -> StoreResult<Option<serde_json::Value>>;
}

/// Bound a store call. A timeout is a retryable `StoreError::Timeout`;
/// in-memory state stays authoritative and the next scheduled run retries.
pub async fn with_timeout<T, F>(limit: Duration, fut: F) -> StoreResult<T>
where
    F: Future<Output = StoreResult<T>>,
{
    match tokio::time::timeout(limit, fut).await {
        Ok(result) => result,
        Err(_) => Err(StoreError::Timeout(limit)),
    }
}
