use crate::models::{DueJob, Error, JobRow};
use chrono::{DateTime, Utc};
use futures::stream::BoxStream;
use sqlx::{types::Json, Pool, Postgres};
use std::time::Duration;

pub async fn create(
    pool: &Pool<Postgres>,
    url: &str,
    payload: &serde_json::Value,
    max_attempts: i32,
) -> Result<i64, Error> {
    const SQL: &str = "INSERT INTO retry_jobs(url, payload, max_attempts)
    VALUES ($1, $2, $3) RETURNING id";
    let job_id = sqlx::query_scalar::<_, i64>(SQL)
        .bind(url)
        .bind(Json(payload))
        .bind(max_attempts)
        .fetch_one(pool)
        .await?;
    Ok(job_id)
}

/// Atomically claims up to `limit` due jobs, oldest first, flipping them
/// `pending -> in_flight` so concurrent cycles never pick the same row.
pub fn claim_due<'a>(
    pool: &'a Pool<Postgres>,
    instance_id: &'a str,
    limit: i32,
) -> BoxStream<'a, Result<DueJob, sqlx::Error>> {
    const SQL: &str = "WITH a AS (
        SELECT id FROM retry_jobs
        WHERE status = 'pending' AND next_attempt_at <= now()
        ORDER BY created_at, id LIMIT $1 FOR UPDATE SKIP LOCKED
    )
    UPDATE retry_jobs SET status = 'in_flight', claimed_by = $2, updated_at = now()
    WHERE id = ANY(SELECT id FROM a)
    RETURNING id, url, payload, attempt_count, max_attempts";
    let res = sqlx::query_as::<_, DueJob>(SQL)
        .bind(limit)
        .bind(instance_id)
        .fetch(pool);
    res
}

/// Idempotent: a second call on a completed job matches no row and returns 0.
pub async fn mark_completed(pool: &Pool<Postgres>, job_id: i64) -> Result<u64, Error> {
    const SQL: &str = "UPDATE retry_jobs
    SET status = 'completed', attempt_count = attempt_count + 1, claimed_by = null, updated_at = now()
    WHERE id = $1 AND status IN ('pending', 'in_flight')";
    let res = sqlx::query(SQL).bind(job_id).execute(pool).await?;
    Ok(res.rows_affected())
}

/// Records a failed attempt and hands the job back to the due scan.
/// GREATEST keeps next_attempt_at non-decreasing across attempts.
pub async fn mark_failed_attempt(
    pool: &Pool<Postgres>,
    job_id: i64,
    error: &str,
    next_attempt_at: DateTime<Utc>,
) -> Result<u64, Error> {
    const SQL: &str = "UPDATE retry_jobs
    SET status = 'pending', attempt_count = attempt_count + 1, last_error = $2,
        next_attempt_at = GREATEST(next_attempt_at, $3), claimed_by = null, updated_at = now()
    WHERE id = $1 AND status = 'in_flight'";
    let res = sqlx::query(SQL)
        .bind(job_id)
        .bind(error)
        .bind(next_attempt_at)
        .execute(pool)
        .await?;
    Ok(res.rows_affected())
}

pub async fn mark_terminal_failure(
    pool: &Pool<Postgres>,
    job_id: i64,
    error: &str,
) -> Result<u64, Error> {
    const SQL: &str = "UPDATE retry_jobs
    SET status = 'failed', attempt_count = attempt_count + 1, last_error = $2, claimed_by = null, updated_at = now()
    WHERE id = $1 AND status = 'in_flight'";
    let res = sqlx::query(SQL)
        .bind(job_id)
        .bind(error)
        .execute(pool)
        .await?;
    Ok(res.rows_affected())
}

/// Requeues in-flight claims older than `lease`. Covers a cycle that died
/// between claiming and write-back: the rows become due again untouched.
pub async fn release_stale(pool: &Pool<Postgres>, lease: Duration) -> Result<u64, Error> {
    const SQL: &str = "UPDATE retry_jobs
    SET status = 'pending', claimed_by = null, updated_at = now()
    WHERE status = 'in_flight' AND updated_at < now() - ($1::double precision * interval '1 second')";
    let res = sqlx::query(SQL).bind(lease.as_secs_f64()).execute(pool).await?;
    Ok(res.rows_affected())
}

pub async fn get_by_id(pool: &Pool<Postgres>, job_id: i64) -> Result<Option<JobRow>, Error> {
    const SQL: &str = "SELECT * FROM retry_jobs WHERE id = $1";
    let job = sqlx::query_as::<_, JobRow>(SQL)
        .bind(job_id)
        .fetch_optional(pool)
        .await?;
    Ok(job)
}

#[sqlx::test]
async fn mark_completed_is_idempotent(pool: sqlx::PgPool) -> anyhow::Result<()> {
    use crate::models::JobStatus;
    // arrange
    let id = create(
        &pool,
        "https://example.com/hook",
        &serde_json::json!({ "event": "payment" }),
        3,
    )
    .await?;
    // act
    let first = mark_completed(&pool, id).await?;
    let second = mark_completed(&pool, id).await?;
    // assert
    assert_eq!(1, first);
    assert_eq!(0, second);
    let row = get_by_id(&pool, id).await?.unwrap();
    assert_eq!(JobStatus::Completed, row.status);
    assert_eq!(1, row.attempt_count);
    Ok(())
}

#[sqlx::test]
async fn terminal_job_is_immutable(pool: sqlx::PgPool) -> anyhow::Result<()> {
    use crate::models::JobStatus;
    use futures::TryStreamExt;
    // arrange
    let id = create(&pool, "https://example.com/hook", &serde_json::json!({}), 3).await?;
    mark_completed(&pool, id).await?;
    // act & assert - no operation touches a terminal row
    assert_eq!(0, mark_completed(&pool, id).await?);
    assert_eq!(0, mark_failed_attempt(&pool, id, "boom", chrono::Utc::now()).await?);
    assert_eq!(0, mark_terminal_failure(&pool, id, "boom").await?);
    let claimed: Vec<DueJob> = claim_due(&pool, "test:1", 10).try_collect().await?;
    assert!(claimed.iter().all(|j| j.id != id));
    let row = get_by_id(&pool, id).await?.unwrap();
    assert_eq!(JobStatus::Completed, row.status);
    assert_eq!(1, row.attempt_count);
    assert_eq!(None, row.last_error);
    Ok(())
}

#[sqlx::test]
async fn claim_due_oldest_first_within_limit(pool: sqlx::PgPool) -> anyhow::Result<()> {
    use futures::TryStreamExt;
    // arrange
    let first = create(&pool, "https://example.com/a", &serde_json::json!({}), 3).await?;
    let second = create(&pool, "https://example.com/b", &serde_json::json!({}), 3).await?;
    // act
    let claimed: Vec<DueJob> = claim_due(&pool, "test:1", 1).try_collect().await?;
    // assert
    assert_eq!(1, claimed.len());
    assert_eq!(first, claimed[0].id);
    let rest: Vec<DueJob> = claim_due(&pool, "test:1", 10).try_collect().await?;
    assert_eq!(vec![second], rest.iter().map(|j| j.id).collect::<Vec<_>>());
    Ok(())
}

#[sqlx::test]
async fn claim_due_skips_jobs_not_yet_due(pool: sqlx::PgPool) -> anyhow::Result<()> {
    use futures::TryStreamExt;
    // arrange
    let due = create(&pool, "https://example.com/a", &serde_json::json!({}), 3).await?;
    let later = create(&pool, "https://example.com/b", &serde_json::json!({}), 3).await?;
    sqlx::query("UPDATE retry_jobs SET next_attempt_at = now() + interval '1 hour' WHERE id = $1")
        .bind(later)
        .execute(&pool)
        .await?;
    // act
    let claimed: Vec<DueJob> = claim_due(&pool, "test:1", 10).try_collect().await?;
    // assert
    assert_eq!(vec![due], claimed.iter().map(|j| j.id).collect::<Vec<_>>());
    Ok(())
}

#[sqlx::test]
async fn failed_attempt_requeues_without_rewinding_schedule(
    pool: sqlx::PgPool,
) -> anyhow::Result<()> {
    use crate::models::JobStatus;
    use futures::TryStreamExt;
    // arrange
    let id = create(&pool, "https://example.com/hook", &serde_json::json!({}), 3).await?;
    let claimed: Vec<DueJob> = claim_due(&pool, "test:1", 1).try_collect().await?;
    assert_eq!(id, claimed[0].id);
    let before = get_by_id(&pool, id).await?.unwrap().next_attempt_at;
    // act - an earlier timestamp must not rewind the schedule
    let rows = mark_failed_attempt(&pool, id, "503", before - chrono::Duration::hours(1)).await?;
    // assert
    assert_eq!(1, rows);
    let row = get_by_id(&pool, id).await?.unwrap();
    assert_eq!(JobStatus::Pending, row.status);
    assert_eq!(1, row.attempt_count);
    assert_eq!(Some("503".to_owned()), row.last_error);
    assert!(row.next_attempt_at >= before);
    Ok(())
}
