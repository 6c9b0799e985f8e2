use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::alerts::{AlertStatus, AnomalyAlert};
use crate::metrics::TransactionMetric;

// ============================================================
// Query params
// ============================================================

#[derive(Debug, Deserialize)]
pub struct EntityFilter {
    pub entity_id: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct HistoryParams {
    pub entity_id: Option<String>,
    pub start: Option<DateTime<Utc>>,
    pub end: Option<DateTime<Utc>>,
    pub limit: Option<usize>,
}

#[derive(Debug, Deserialize)]
pub struct StatusUpdateRequest {
    pub status: AlertStatus,
}

// ============================================================
// Response types
// ============================================================

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub entity_count: usize,
    pub active_alerts: usize,
    pub subscriber_count: usize,
}

#[derive(Debug, Serialize)]
pub struct HistoryResponse {
    pub metrics: Vec<TransactionMetric>,
    pub count: usize,
}

#[derive(Debug, Serialize)]
pub struct AlertsResponse {
    pub alerts: Vec<AnomalyAlert>,
    pub count: usize,
}
