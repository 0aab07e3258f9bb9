use crate::{
    db,
    models::{AppState, Error, JobCreate},
};
use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use hyper::Uri;
use problemdetails::Problem;
use serde::Serialize;
use std::sync::Arc;

const DEFAULT_MAX_ATTEMPTS: i32 = 5;

pub fn routes(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/enqueue", post(enqueue))
        .route("/jobs/:id", get(get_by_id))
        .with_state(state)
}

#[derive(Debug, Serialize)]
struct EnqueueResponse {
    success: bool,
    job_id: i64,
}

/// Validates and persists a delivery job. Invalid input is rejected with
/// 400 and never written.
async fn enqueue(
    State(state): State<Arc<AppState>>,
    Json(body): Json<JobCreate>,
) -> Result<Json<EnqueueResponse>, Problem> {
    let payload = body.payload.ok_or(Error::InvalidParams("payload"))?;
    let webhook_url = body
        .webhook_url
        .as_deref()
        .filter(|s| !s.is_empty())
        .ok_or(Error::InvalidParams("webhook_url"))?;
    let uri = Uri::try_from(webhook_url).map_err(|_| Error::InvalidUrl)?;
    match uri.scheme_str() {
        Some("http") | Some("https") => {}
        _ => return Err(Error::InvalidUrl.into()),
    }
    let max_attempts = body.max_retries.unwrap_or(DEFAULT_MAX_ATTEMPTS).max(1);

    let job_id = db::jobs::create(&state.pool, webhook_url, &payload, max_attempts).await?;
    Ok(Json(EnqueueResponse {
        success: true,
        job_id,
    }))
}

async fn get_by_id(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
) -> Result<Response, Problem> {
    let job = db::jobs::get_by_id(&state.pool, id).await?;
    match job {
        None => Ok(StatusCode::NO_CONTENT.into_response()),
        Some(o) => Ok(Json(o).into_response()),
    }
}
