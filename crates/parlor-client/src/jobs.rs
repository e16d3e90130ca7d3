//! Fixed-interval polling of video processing jobs.

use std::sync::Arc;
use std::time::Duration;

use parlor_net::JobStatusApi;
use parlor_shared::protocol::JobStatus;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, PartialEq)]
pub struct JobUpdate {
    pub job_id: String,
    pub status: JobStatus,
}

/// Polls one job until it completes, fails, or is cancelled.
pub struct JobPoller {
    job_id: String,
    task: JoinHandle<()>,
}

impl JobPoller {
    pub fn spawn(
        api: Arc<dyn JobStatusApi>,
        job_id: impl Into<String>,
        interval: Duration,
        updates: mpsc::UnboundedSender<JobUpdate>,
    ) -> Self {
        let job_id = job_id.into();
        let task = tokio::spawn(poll_job(api, job_id.clone(), interval, updates));
        Self { job_id, task }
    }

    pub fn job_id(&self) -> &str {
        &self.job_id
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    pub fn cancel(&self) {
        if !self.task.is_finished() {
            debug!(job = %self.job_id, "Cancelling job poller");
        }
        self.task.abort();
    }
}

impl Drop for JobPoller {
    fn drop(&mut self) {
        self.task.abort();
    }
}

async fn poll_job(
    api: Arc<dyn JobStatusApi>,
    job_id: String,
    interval: Duration,
    updates: mpsc::UnboundedSender<JobUpdate>,
) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    info!(job = %job_id, every_ms = interval.as_millis() as u64, "Watching job");

    loop {
        ticker.tick().await;
        match api.job_status(&job_id).await {
            Ok(status) => {
                let terminal = status.status.is_terminal();
                let update = JobUpdate {
                    job_id: job_id.clone(),
                    status,
                };
                if updates.send(update).is_err() {
                    return;
                }
                if terminal {
                    info!(job = %job_id, "Job reached a final state");
                    return;
                }
            }
            // keep polling; the next tick retries
            Err(e) => warn!(job = %job_id, error = %e, "Failed to fetch job status"),
        }
    }
}
