use bytes::Bytes;
use chrono::{DateTime, Utc};
use http_body_util::Full;
use serde::{Deserialize, Serialize};

use super::Error;

/// Header carrying the 1-based attempt number to the receiver.
pub const RETRY_ATTEMPT_HEADER: &str = "x-retry-attempt";

/// Delivery job lifecycle. `in_flight` marks a row claimed by a running
/// cycle; `completed` and `failed` are terminal and never left.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "retry_job_status", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Pending,
    InFlight,
    Completed,
    Failed,
}

#[derive(Debug, Clone, sqlx::FromRow, Serialize)]
pub struct JobRow {
    pub id: i64,
    pub url: String,
    #[sqlx(json)]
    pub payload: serde_json::Value,
    pub attempt_count: i32,
    pub max_attempts: i32,
    pub next_attempt_at: DateTime<Utc>,
    pub status: JobStatus,
    pub last_error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Body of `POST /enqueue`. Fields stay optional so missing input maps to
/// a 400 with a named parameter instead of a deserialize rejection.
#[derive(Debug, Clone, Deserialize)]
pub struct JobCreate {
    pub webhook_url: Option<String>,
    pub payload: Option<serde_json::Value>,
    pub max_retries: Option<i32>,
}

/// A claimed due job, everything one delivery attempt needs.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct DueJob {
    pub id: i64,
    pub url: String,
    #[sqlx(json)]
    pub payload: serde_json::Value,
    pub attempt_count: i32,
    pub max_attempts: i32,
}

impl TryFrom<&DueJob> for hyper::Request<Full<Bytes>> {
    type Error = Error;

    fn try_from(job: &DueJob) -> Result<Self, Self::Error> {
        let uri = hyper::Uri::try_from(job.url.as_str()).map_err(|_| Error::InvalidUrl)?;
        let body = serde_json::to_vec(&job.payload).map_err(|_| Error::InvalidParams("payload"))?;
        let req = hyper::Request::builder()
            .method(hyper::Method::POST)
            .uri(uri)
            .header(hyper::header::CONTENT_TYPE, "application/json")
            .header(RETRY_ATTEMPT_HEADER, job.attempt_count + 1)
            .body(Full::new(Bytes::from(body)))?;
        Ok(req)
    }
}

#[tokio::test]
async fn due_job_into_request() -> anyhow::Result<()> {
    // arrange
    let job = DueJob {
        id: 7,
        url: "https://example.com/hook".to_owned(),
        payload: serde_json::json!({ "event": "payment" }),
        attempt_count: 2,
        max_attempts: 5,
    };
    // act
    let req = hyper::Request::<Full<Bytes>>::try_from(&job)?;
    // assert
    assert_eq!(hyper::Method::POST, req.method());
    assert_eq!("https://example.com/hook", req.uri().to_string());
    assert_eq!("application/json", req.headers()[hyper::header::CONTENT_TYPE]);
    assert_eq!("3", req.headers()[RETRY_ATTEMPT_HEADER]);
    Ok(())
}

#[tokio::test]
async fn due_job_into_request_invalid_url() -> anyhow::Result<()> {
    // arrange
    let job = DueJob {
        id: 8,
        url: "".to_owned(),
        payload: serde_json::Value::Null,
        attempt_count: 0,
        max_attempts: 5,
    };
    // act
    let req = hyper::Request::<Full<Bytes>>::try_from(&job);
    // assert
    assert!(req.is_err());
    Ok(())
}
