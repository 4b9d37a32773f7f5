mod ingest;
mod query;
mod reports;

use axum::{Json, Router, extract::DefaultBodyLimit, extract::State, http::StatusCode, routing::get};
use tower::ServiceBuilder;
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use crate::state::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .nest("/ingest", ingest::router())
        .nest("/query", query::router())
        .nest("/report", reports::router())
        .route("/tables", get(list_tables))
}

/// Full application with middleware applied
pub fn app(state: AppState) -> Router {
    let body_limit = state.config.max_upload_bytes;

    Router::new()
        .nest("/api", router())
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(CorsLayer::permissive())
                .layer(DefaultBodyLimit::max(body_limit)),
        )
        .with_state(state)
}

async fn list_tables(
    State(state): State<AppState>,
) -> Result<Json<Vec<String>>, (StatusCode, String)> {
    state
        .executor
        .tables()
        .await
        .map(Json)
        .map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))
}
