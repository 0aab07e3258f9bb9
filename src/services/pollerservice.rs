use tokio::{select, time};
#[allow(unused_imports)]
use tracing::{debug, error, info, trace, warn};

use crate::{
    models::{AppState, Error},
    services::deliveryworker,
};
use std::sync::Arc;

/// Optional in-process poller. When enabled it drives delivery cycles on an
/// interval; when disabled an external scheduler is expected to call
/// `GET /process` instead.
pub struct PollerService {
    app_state: Arc<AppState>,
}

impl PollerService {
    pub fn new(app_state: Arc<AppState>) -> Self {
        Self { app_state }
    }

    pub async fn run(&self) -> Result<(), Error> {
        let instance_id = &self.app_state.instance_id;
        let Some(options) = self.app_state.poller_options.as_ref() else {
            warn!({ instance_id = %instance_id }, "disabled");
            return Ok(());
        };
        info!({ instance_id = %instance_id }, "start");
        let mut interval = time::interval(options.poll_interval);
        interval.set_missed_tick_behavior(time::MissedTickBehavior::Skip);
        while !self.app_state.shutdown_token.is_cancelled() {
            if let Err(err) = self.tick().await {
                error!({ instance_id = %instance_id }, "error {}", err);
            }
            select!(
                biased;
                _ = self.app_state.shutdown_token.cancelled() => {}
                _ = interval.tick() => {},
            );
        }
        info!({ instance_id = %instance_id }, "stop");
        Ok(())
    }

    async fn tick(&self) -> Result<(), Error> {
        let instance_id = &self.app_state.instance_id;
        trace!({ instance_id = %instance_id }, "tick");
        let summary = deliveryworker::run_once(&self.app_state).await?;
        if summary.attempted > 0 {
            debug!(
                {
                    instance_id = %instance_id,
                    attempted = summary.attempted,
                    completed = summary.completed,
                    rescheduled = summary.rescheduled,
                    failed = summary.failed
                },
                "deliveryworker::run_once"
            );
        }
        Ok(())
    }
}
