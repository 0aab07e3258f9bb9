use crate::{db, models::AppState};
use axum::{extract::State, http::StatusCode, response::IntoResponse, routing::get, Router};
use problemdetails::Problem;
use std::sync::Arc;

pub fn routes(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/", get(root))
        .route("/live", get(live))
        .route("/ready", get(ready))
        .with_state(state)
}

async fn root() -> impl IntoResponse {
    (StatusCode::OK, "Use /enqueue to create delivery jobs.")
}

async fn live() -> impl IntoResponse {
    StatusCode::OK
}

async fn ready(State(state): State<Arc<AppState>>) -> Result<StatusCode, Problem> {
    db::select_one(&state.pool).await?;
    Ok(StatusCode::OK)
}
