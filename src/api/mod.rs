pub mod handlers;
pub mod types;

use axum::{
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::engine::Engine;

#[derive(Clone)]
pub struct AppState {
    pub engine: Arc<Engine>,
}

pub fn router(engine: Arc<Engine>) -> Router {
    let state = Arc::new(AppState { engine });

    Router::new()
        .route("/api/v1/health", get(handlers::health))
        .route("/api/v1/metrics/realtime", get(handlers::realtime_metrics))
        .route("/api/v1/metrics/history", get(handlers::metric_history))
        .route("/api/v1/alerts", get(handlers::list_alerts))
        .route(
            "/api/v1/alerts/{id}/status",
            post(handlers::update_alert_status),
        )
        .route(
            "/api/v1/profiles/{entity_id}",
            get(handlers::entity_profile),
        )
        .with_state(state)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
}

pub async fn serve(engine: Arc<Engine>, host: &str, port: u16) -> eyre::Result<()> {
    let app = router(engine);
    let addr = format!("{}:{}", host, port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!(%addr, "API server listening");
    axum::serve(listener, app).await?;
    Ok(())
}
