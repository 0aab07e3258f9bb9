use bytes::Bytes;
use dotenv::dotenv;
use http_body_util::Full;
use hyper_tls::HttpsConnector;
use hyper_util::client::legacy::{connect::HttpConnector, Client};
use hyper_util::rt::TokioExecutor;
use sqlx::{
    postgres::{PgConnectOptions, PgPoolOptions},
    Pool, Postgres,
};
use std::{str::FromStr, sync::Arc, time::Duration};
use tokio_util::sync::CancellationToken;

use super::backoff::RetryPolicy;

pub type HttpClient = Client<HttpsConnector<HttpConnector>, Full<Bytes>>;

pub struct AppState {
    pub instance_id: String,
    pub pool: Pool<Postgres>,
    pub client: HttpClient,
    pub poller_options: Option<PollerOptions>,
    pub worker_options: WorkerOptions,
    pub retry_policy: RetryPolicy,
    pub process_token: String,
    pub shutdown_token: CancellationToken,
}

#[derive(Debug)]
pub struct PollerOptions {
    pub poll_interval: Duration,
}

#[derive(Debug)]
pub struct WorkerOptions {
    pub batch_limit: i32,
    pub request_timeout: Duration,
    pub claim_lease: Duration,
}

impl AppState {
    pub async fn new() -> Arc<AppState> {
        dotenv().ok();
        let hostname = whoami::fallible::hostname().expect("Unable to resolve hostname");
        let instance_id = format!("{}:1", hostname);
        let db_url = std::env::var("DATABASE_URL").expect("DATABASE_URL must be set");
        let process_token = std::env::var("PROCESS_TOKEN").expect("PROCESS_TOKEN must be set");
        let conn = PgConnectOptions::from_str(&db_url)
            .expect("Unable to parse DATABASE_URL")
            .application_name(&instance_id);

        let pool = PgPoolOptions::new()
            .max_connections(32)
            .connect_with(conn)
            .await
            .expect("Unable to connect to Postgres");

        let client = Client::builder(TokioExecutor::new()).build(HttpsConnector::new());

        // No POLL_INTERVAL_MS means the in-process poller is disabled and an
        // external scheduler drives GET /process instead.
        let poller_options = env_millis("POLL_INTERVAL_MS").map(|poll_interval| PollerOptions { poll_interval });

        let batch_limit = env_i32("BATCH_LIMIT").unwrap_or(50);
        let request_timeout = env_millis("REQUEST_TIMEOUT_MS").unwrap_or(Duration::from_secs(10));
        let state = AppState {
            instance_id,
            pool,
            client,
            poller_options,
            worker_options: WorkerOptions {
                batch_limit,
                request_timeout,
                claim_lease: claim_lease_for(batch_limit, request_timeout),
            },
            retry_policy: RetryPolicy::default(),
            process_token,
            shutdown_token: CancellationToken::new(),
        };
        Arc::new(state)
    }
}

fn env_millis(key: &str) -> Option<Duration> {
    std::env::var(key)
        .ok()
        .and_then(|s| s.parse::<u64>().ok())
        .map(Duration::from_millis)
}

fn env_i32(key: &str) -> Option<i32> {
    std::env::var(key).ok().and_then(|s| s.parse::<i32>().ok())
}

/// A claim must outlive the slowest possible cycle: a full batch timing out
/// sequentially, plus slack for write-backs. Anything shorter lets
/// release_stale requeue rows a live cycle still holds, which reopens the
/// double-delivery window claiming exists to close.
fn claim_lease_for(batch_limit: i32, request_timeout: Duration) -> Duration {
    request_timeout
        .saturating_mul(batch_limit.unsigned_abs())
        .saturating_add(Duration::from_secs(60))
}

#[tokio::test]
async fn claim_lease_outlives_worst_case_batch() -> anyhow::Result<()> {
    // arrange
    let batch_limit = 50;
    let request_timeout = Duration::from_secs(10);
    // act
    let lease = claim_lease_for(batch_limit, request_timeout);
    // assert
    assert!(lease > request_timeout * batch_limit.unsigned_abs());
    assert_eq!(Duration::from_secs(560), lease);
    Ok(())
}

#[tokio::test]
async fn claim_lease_scales_with_configuration() -> anyhow::Result<()> {
    // act & assert
    for (batch_limit, timeout_secs) in [(1, 1), (10, 30), (500, 10), (1000, 60)] {
        let request_timeout = Duration::from_secs(timeout_secs);
        let lease = claim_lease_for(batch_limit, request_timeout);
        assert!(lease > request_timeout * batch_limit.unsigned_abs());
    }
    Ok(())
}
