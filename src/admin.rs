//! Read-only admin HTTP surface.
//!
//! Exposes the router's health snapshot and the catalog enumeration for
//! dashboards and probes. This surface never mutates routing state; the
//! inference hot path lives in the services embedding this crate.

use axum::{
    extract::State,
    http::StatusCode,
    response::IntoResponse,
    routing::get,
    Json, Router,
};
use std::sync::Arc;
use tower_http::trace::TraceLayer;

use crate::config::Config;
use crate::router::ModelRouter;

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub router: Arc<ModelRouter>,
}

/// Create the axum router with all admin endpoints.
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/models", get(list_models))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
}

/// Handle GET /health.
///
/// 200 with `"status": "ok"` while every circuit is closed or probing;
/// 503 with `"status": "unhealthy"` as soon as any circuit is open.
async fn health(State(state): State<AppState>) -> impl IntoResponse {
    let status = state.router.health_status();
    let code = if status.healthy {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    (
        code,
        Json(serde_json::json!({
            "status": if status.healthy { "ok" } else { "unhealthy" },
            "total_models_tracked": status.total_models_tracked,
            "circuits_open": status.circuits_open,
            "circuits": status.circuits,
        })),
    )
}

/// Handle GET /models: every model reachable through the catalog, with each
/// task's fallback chain.
async fn list_models(State(state): State<AppState>) -> impl IntoResponse {
    let catalog = state.router.catalog();

    let tasks: serde_json::Map<String, serde_json::Value> = catalog
        .mappings()
        .map(|mapping| {
            (
                mapping.task.as_str().to_string(),
                serde_json::json!({
                    "primary": mapping.primary.model_id,
                    "fallbacks": mapping
                        .fallbacks
                        .iter()
                        .map(|m| m.model_id.as_str())
                        .collect::<Vec<_>>(),
                }),
            )
        })
        .collect();

    Json(serde_json::json!({
        "models": catalog.all_model_ids(),
        "tasks": tasks,
    }))
}

/// Run the admin HTTP server until shutdown.
pub async fn run_server(config: &Config, router: Arc<ModelRouter>) -> anyhow::Result<()> {
    let state = AppState { router };
    let app = create_router(state);

    let listener = tokio::net::TcpListener::bind(&config.server.listen).await?;
    tracing::info!(address = %config.server.listen, "starting modelmux admin server");

    axum::serve(listener, app).await?;

    Ok(())
}
