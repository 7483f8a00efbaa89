// =============================================================================
// REST API Endpoints — Axum 0.7
// =============================================================================
//
// A single public endpoint, `GET /health`, returning the stage-freshness
// report described in SPEC_FULL §6. The dashboard WebSocket is mounted here
// too (`GET /ws`) since Axum routers combine both transports under one
// listener, matching the teacher's router-construction convention.

use std::sync::Arc;

use axum::{extract::State, response::IntoResponse, routing::get, Json, Router};
use tower_http::cors::{Any, CorsLayer};

use crate::api::ApiState;

/// Build the API router with permissive CORS (dashboard is a local dev tool,
/// same as the teacher's).
pub fn router(state: Arc<ApiState>) -> Router {
    let cors = CorsLayer::new().allow_origin(Any).allow_methods(Any).allow_headers(Any);

    Router::new()
        .route("/health", get(health))
        .route("/ws", get(crate::api::ws::ws_handler))
        .layer(cors)
        .with_state(state)
}

async fn health(State(state): State<Arc<ApiState>>) -> impl IntoResponse {
    let report = state.health_rx.borrow().clone();
    Json(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RuntimeConfig;
    use crate::context::Context;
    use crate::dashboard::DashboardSnapshot;
    use tokio::sync::watch;
    use tower::ServiceExt;

    #[tokio::test]
    async fn health_endpoint_returns_current_report() {
        let ctx = Context::new(RuntimeConfig::default(), 0);
        let report = ctx.health_report(0);
        let snapshot = DashboardSnapshot::build(&ctx, 0);
        let (_dtx, drx) = watch::channel(snapshot);
        let (_htx, hrx) = watch::channel(report.clone());
        let state = Arc::new(ApiState { dashboard_rx: drx, health_rx: hrx });

        let app = router(state);
        let response = app
            .oneshot(axum::http::Request::builder().uri("/health").body(axum::body::Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), axum::http::StatusCode::OK);
    }
}
