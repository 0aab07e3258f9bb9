use crate::{
    models::{AppState, Error},
    services::deliveryworker,
};
use axum::{
    extract::State,
    http::{header, HeaderMap},
    routing::get,
    Json, Router,
};
use problemdetails::Problem;
use serde::Serialize;
use std::sync::Arc;
#[allow(unused_imports)]
use tracing::{debug, error, info, warn};

pub fn routes(state: Arc<AppState>) -> Router {
    Router::new().route("/process", get(process)).with_state(state)
}

#[derive(Debug, Serialize)]
struct ProcessResponse {
    success: bool,
    processed_jobs: u64,
    completed_jobs: u64,
    rescheduled_jobs: u64,
    failed_jobs: u64,
}

/// Scheduler-triggered delivery cycle. Requires the shared bearer token;
/// a request with no Authorization header is rejected, not trusted.
async fn process(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<Json<ProcessResponse>, Problem> {
    authorize(&headers, &state.process_token)?;
    let summary = deliveryworker::run_once(&state).await?;
    debug!(
        {
            instance_id = %state.instance_id,
            attempted = summary.attempted,
            completed = summary.completed,
            rescheduled = summary.rescheduled,
            failed = summary.failed
        },
        "cycle"
    );
    Ok(Json(ProcessResponse {
        success: true,
        processed_jobs: summary.attempted,
        completed_jobs: summary.completed,
        rescheduled_jobs: summary.rescheduled,
        failed_jobs: summary.failed,
    }))
}

fn authorize(headers: &HeaderMap, token: &str) -> Result<(), Error> {
    let bearer = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|s| s.strip_prefix("Bearer "));
    match bearer {
        Some(t) if t == token => Ok(()),
        _ => Err(Error::Unauthorized),
    }
}

#[tokio::test]
async fn authorize_accepts_matching_token() -> anyhow::Result<()> {
    // arrange
    let mut headers = HeaderMap::new();
    headers.insert(header::AUTHORIZATION, "Bearer sekret".parse()?);
    // act & assert
    assert!(authorize(&headers, "sekret").is_ok());
    Ok(())
}

#[tokio::test]
async fn authorize_rejects_missing_header() -> anyhow::Result<()> {
    // arrange
    let headers = HeaderMap::new();
    // act & assert
    assert!(authorize(&headers, "sekret").is_err());
    Ok(())
}

#[tokio::test]
async fn authorize_rejects_wrong_token() -> anyhow::Result<()> {
    // arrange
    let mut headers = HeaderMap::new();
    headers.insert(header::AUTHORIZATION, "Bearer nope".parse()?);
    // act & assert
    assert!(authorize(&headers, "sekret").is_err());
    Ok(())
}
