//! HTTP surface of the server
//!
//! Assembles the feature routers under `/api/v1`, the health endpoints and
//! the shared middleware stack.

pub mod response;

use crate::config::CorsConfig;
use crate::features::{self, FeatureState};
use crate::middleware;
use axum::{extract::State, http::StatusCode, response::IntoResponse, routing::get, Json, Router};
use serde_json::json;
use sqlx::PgPool;
use tower_http::compression::CompressionLayer;

/// State for the top-level routes
#[derive(Clone)]
pub struct AppState {
    /// `None` when the file index lives in memory
    pub db: Option<PgPool>,
}

/// Build the full application router with all routes and middleware
pub fn create_router(app: AppState, features: FeatureState, cors: &CorsConfig) -> Router {
    Router::new()
        .route("/", get(root))
        .route("/health", get(health_check))
        .with_state(app)
        .nest("/api/v1", features::router(features))
        // Layers apply from innermost to outermost
        .layer(CompressionLayer::new())
        .layer(middleware::tracing_layer())
        .layer(middleware::cors_layer(cors))
}

async fn root() -> impl IntoResponse {
    Json(json!({
        "name": "Revu Server",
        "version": env!("CARGO_PKG_VERSION"),
        "status": "running"
    }))
}

/// Reports whether the index store is reachable
async fn health_check(State(state): State<AppState>) -> impl IntoResponse {
    let Some(db) = &state.db else {
        return (StatusCode::OK, Json(json!({ "status": "healthy", "database": "in-memory" })));
    };

    match sqlx::query("SELECT 1").fetch_one(db).await {
        Ok(_) => (StatusCode::OK, Json(json!({ "status": "healthy", "database": "connected" }))),
        Err(e) => {
            tracing::error!("Database health check failed: {:?}", e);
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(json!({ "status": "unhealthy", "database": "unreachable" })),
            )
        },
    }
}
