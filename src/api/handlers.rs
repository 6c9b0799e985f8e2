use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::Json;
use chrono::Utc;
use std::sync::Arc;
use uuid::Uuid;

use crate::alerts::AnomalyAlert;
use crate::engine::RealtimeSnapshot;
use crate::errors::AlertError;
use crate::profile::RiskProfile;

use super::types::*;
use super::AppState;

type ApiResult<T> = Result<Json<T>, (StatusCode, Json<ErrorResponse>)>;

fn api_error(status: StatusCode, msg: impl Into<String>) -> (StatusCode, Json<ErrorResponse>) {
    (
        status,
        Json(ErrorResponse {
            error: msg.into(),
        }),
    )
}

// ============================================================
// Health
// ============================================================

pub async fn health(State(state): State<Arc<AppState>>) -> ApiResult<HealthResponse> {
    let snapshot = state.engine.realtime_snapshot(None);
    Ok(Json(HealthResponse {
        status: "ok".to_string(),
        entity_count: snapshot.entity_count,
        active_alerts: snapshot.active_alerts,
        subscriber_count: snapshot.subscriber_count,
    }))
}

// ============================================================
// Metrics
// ============================================================

pub async fn realtime_metrics(
    State(state): State<Arc<AppState>>,
    Query(params): Query<EntityFilter>,
) -> ApiResult<RealtimeSnapshot> {
    Ok(Json(state.engine.realtime_snapshot(params.entity_id.as_deref())))
}

pub async fn metric_history(
    State(state): State<Arc<AppState>>,
    Query(params): Query<HistoryParams>,
) -> ApiResult<HistoryResponse> {
    let end = params.end.unwrap_or_else(Utc::now);
    let start = params.start.unwrap_or(end - chrono::Duration::hours(24));
    if start > end {
        return Err(api_error(StatusCode::BAD_REQUEST, "start is after end"));
    }
    let limit = params.limit.unwrap_or(100).min(1000);
    let metrics = state
        .engine
        .historical_data(start, end, params.entity_id.as_deref(), limit)
        .await
        .map_err(|e| api_error(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))?;
    let count = metrics.len();
    Ok(Json(HistoryResponse { metrics, count }))
}

// ============================================================
// Alerts
// ============================================================

pub async fn list_alerts(
    State(state): State<Arc<AppState>>,
    Query(params): Query<EntityFilter>,
) -> ApiResult<AlertsResponse> {
    let alerts = state.engine.active_alerts(params.entity_id.as_deref());
    let count = alerts.len();
    Ok(Json(AlertsResponse { alerts, count }))
}

pub async fn update_alert_status(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Json(body): Json<StatusUpdateRequest>,
) -> ApiResult<AnomalyAlert> {
    state
        .engine
        .update_alert_status(id, body.status)
        .await
        .map(Json)
        .map_err(|e| match e {
            AlertError::NotFound(_) => api_error(StatusCode::NOT_FOUND, e.to_string()),
            AlertError::InvalidTransition { .. } => {
                api_error(StatusCode::CONFLICT, e.to_string())
            }
            AlertError::Store(_) => api_error(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()),
        })
}

// ============================================================
// Profiles
// ============================================================

pub async fn entity_profile(
    State(state): State<Arc<AppState>>,
    Path(entity_id): Path<String>,
) -> ApiResult<RiskProfile> {
    state
        .engine
        .risk_profile(&entity_id)
        .await
        .map(Json)
        .ok_or_else(|| api_error(StatusCode::NOT_FOUND, format!("unknown entity: {}", entity_id)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::engine::{Engine, IngestOutcome};
    use crate::metrics::{MetricType, TransactionMetric};
    use crate::storage::MemoryStore;

    fn state() -> Arc<AppState> {
        Arc::new(AppState {
            engine: Arc::new(Engine::new(Config::default(), Arc::new(MemoryStore::new()))),
        })
    }

    async fn ingest(state: &AppState, entity: &str, tx: &str, amount: f64) -> IngestOutcome {
        state
            .engine
            .ingest(TransactionMetric {
                entity_id: entity.to_string(),
                transaction_id: tx.to_string(),
                metric_type: MetricType::Transaction,
                amount,
                currency: "USD".to_string(),
                category: "misc".to_string(),
                merchant_id: None,
                location: None,
                timestamp: Utc::now(),
            })
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_health_reports_counts() {
        let state = state();
        ingest(&state, "U1", "tx-1", 10.0).await;
        let Json(body) = health(State(state)).await.unwrap();
        assert_eq!(body.status, "ok");
        assert_eq!(body.entity_count, 1);
    }

    #[tokio::test]
    async fn test_profile_lookup() {
        let state = state();
        ingest(&state, "U1", "tx-1", 10.0).await;

        let Json(profile) = entity_profile(State(state.clone()), Path("U1".to_string()))
            .await
            .unwrap();
        assert_eq!(profile.entity_id, "U1");

        let err = entity_profile(State(state), Path("ghost".to_string())).await;
        assert_eq!(err.unwrap_err().0, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_history_rejects_inverted_range() {
        let state = state();
        let now = Utc::now();
        let err = metric_history(
            State(state),
            Query(HistoryParams {
                entity_id: None,
                start: Some(now),
                end: Some(now - chrono::Duration::hours(1)),
                limit: None,
            }),
        )
        .await;
        assert_eq!(err.unwrap_err().0, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_history_returns_persisted_metrics() {
        let state = state();
        ingest(&state, "U1", "tx-1", 10.0).await;
        ingest(&state, "U2", "tx-2", 20.0).await;

        let Json(body) = metric_history(
            State(state.clone()),
            Query(HistoryParams {
                entity_id: Some("U1".to_string()),
                start: None,
                end: None,
                limit: None,
            }),
        )
        .await
        .unwrap();
        assert_eq!(body.count, 1);
        assert_eq!(body.metrics[0].entity_id, "U1");
    }

    #[tokio::test]
    async fn test_update_alert_status_not_found() {
        let state = state();
        let err = update_alert_status(
            State(state),
            Path(Uuid::new_v4()),
            Json(StatusUpdateRequest {
                status: crate::alerts::AlertStatus::Resolved,
            }),
        )
        .await;
        assert_eq!(err.unwrap_err().0, StatusCode::NOT_FOUND);
    }
}
