use crate::{
    db,
    models::{is_retryable, AppState, DueJob, Error},
};
use bytes::Bytes;
use chrono::Utc;
use futures::TryStreamExt;
use http_body_util::Full;
use serde::Serialize;
use tokio::time;
#[allow(unused_imports)]
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct CycleSummary {
    pub attempted: u64,
    pub completed: u64,
    pub rescheduled: u64,
    pub failed: u64,
}

/// One polling cycle: requeue stale claims, claim a batch of due jobs,
/// deliver each and write the outcome back. A job failing never stops the
/// rest of the batch; only a claim-scan failure aborts the cycle.
pub async fn run_once(app_state: &AppState) -> Result<CycleSummary, Error> {
    let instance_id = &app_state.instance_id;
    let released =
        db::jobs::release_stale(&app_state.pool, app_state.worker_options.claim_lease).await?;
    if released > 0 {
        warn!({ instance_id = %instance_id, released }, "requeued stale in-flight jobs");
    }

    let mut summary = CycleSummary::default();
    let mut rows = db::jobs::claim_due(
        &app_state.pool,
        instance_id,
        app_state.worker_options.batch_limit,
    );
    while let Some(job) = rows.try_next().await? {
        let job_id = job.id;
        summary.attempted += 1;
        match process_job(app_state, job).await {
            Ok(Outcome::Completed) => summary.completed += 1,
            Ok(Outcome::Rescheduled) => summary.rescheduled += 1,
            Ok(Outcome::Failed) => summary.failed += 1,
            Err(err) => {
                // Write-back failed; the job stays claimed and the stale
                // lease returns it to pending for a later cycle.
                error!({ instance_id = %instance_id, job_id }, "job error {:?}", err);
            }
        }
    }
    Ok(summary)
}

enum Outcome {
    Completed,
    Rescheduled,
    Failed,
}

async fn process_job(app_state: &AppState, job: DueJob) -> Result<Outcome, Error> {
    let instance_id = &app_state.instance_id;
    let job_id = job.id;
    match deliver(app_state, &job).await {
        Ok(status_code) => {
            debug!({ instance_id = %instance_id, job_id, status = status_code.as_u16() }, "==> delivered");
            db::jobs::mark_completed(&app_state.pool, job_id).await?;
            Ok(Outcome::Completed)
        }
        Err(err) => {
            match next_transition(err.is_retryable(), job.attempt_count, job.max_attempts) {
                Transition::Fail => {
                    info!({ instance_id = %instance_id, job_id }, "==> failed {}", err);
                    db::jobs::mark_terminal_failure(&app_state.pool, job_id, &err.to_string())
                        .await?;
                    Ok(Outcome::Failed)
                }
                Transition::Reschedule { attempt } => {
                    let delay = app_state.retry_policy.next_attempt_in(attempt);
                    let millis = i64::try_from(delay.as_millis()).unwrap_or(i64::MAX);
                    let at = Utc::now() + chrono::Duration::milliseconds(millis);
                    debug!({ instance_id = %instance_id, job_id, attempt }, "==> retry at {}", at);
                    db::jobs::mark_failed_attempt(&app_state.pool, job_id, &err.to_string(), at)
                        .await?;
                    Ok(Outcome::Rescheduled)
                }
            }
        }
    }
}

/// Single delivery attempt: POST the payload, bounded by the request
/// timeout, and map the response status onto the retry classification.
async fn deliver(app_state: &AppState, job: &DueJob) -> Result<hyper::StatusCode, Error> {
    let req = hyper::Request::<Full<Bytes>>::try_from(job)?;
    let future = app_state.client.request(req);
    // first '?' - timeout
    // second '?' - HyperClientError
    let response = time::timeout(app_state.worker_options.request_timeout, future).await??;
    let status_code = response.status();
    if status_code.is_success() {
        return Ok(status_code);
    }
    if is_retryable(status_code.as_u16()) {
        return Err(Error::RetryableStatus(status_code.as_u16()));
    }
    Err(Error::RejectedStatus(status_code.as_u16()))
}

/// State transition for a failed attempt. The attempt being recorded is
/// `attempt_count + 1`; a retryable failure keeps the job pending only
/// while that stays below `max_attempts`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Transition {
    Reschedule { attempt: u32 },
    Fail,
}

pub(crate) fn next_transition(retryable: bool, attempt_count: i32, max_attempts: i32) -> Transition {
    let next_attempt = attempt_count.saturating_add(1);
    if retryable && next_attempt < max_attempts {
        Transition::Reschedule {
            attempt: next_attempt.unsigned_abs(),
        }
    } else {
        Transition::Fail
    }
}

#[tokio::test]
async fn transition_retryable_with_budget_reschedules() -> anyhow::Result<()> {
    // act & assert
    assert_eq!(
        Transition::Reschedule { attempt: 1 },
        next_transition(true, 0, 3)
    );
    assert_eq!(
        Transition::Reschedule { attempt: 2 },
        next_transition(true, 1, 3)
    );
    Ok(())
}

#[tokio::test]
async fn transition_retryable_exhausted_fails() -> anyhow::Result<()> {
    // a job with max_attempts=3 fails terminally on its third attempt
    assert_eq!(Transition::Fail, next_transition(true, 2, 3));
    assert_eq!(Transition::Fail, next_transition(true, 5, 3));
    Ok(())
}

#[tokio::test]
async fn transition_rejected_fails_regardless_of_budget() -> anyhow::Result<()> {
    // a 404 on the first attempt is terminal even with attempts remaining
    assert_eq!(Transition::Fail, next_transition(false, 0, 5));
    assert_eq!(Transition::Fail, next_transition(false, 3, 100));
    Ok(())
}

#[tokio::test]
async fn transition_single_attempt_budget() -> anyhow::Result<()> {
    // max_attempts=1 never reschedules
    assert_eq!(Transition::Fail, next_transition(true, 0, 1));
    Ok(())
}

#[tokio::test]
async fn error_classification() -> anyhow::Result<()> {
    // act & assert
    assert!(Error::RetryableStatus(503).is_retryable());
    assert!(!Error::RejectedStatus(404).is_retryable());
    assert!(!Error::InvalidUrl.is_retryable());
    Ok(())
}
