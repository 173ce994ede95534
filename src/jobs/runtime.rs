//! Worker loops that drain the job queue. Concurrency is a fixed number of
//! worker tasks; each polls priorities high to low, executes through the
//! shared handler, and acks or nacks. A housekeeping task promotes scheduled
//! jobs and reaps stale in-flight entries.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use super::error::{JobError, JobResult};
use super::queue::{Job, JobQueue};

#[async_trait]
pub trait JobHandler: Send + Sync {
    async fn handle(&self, job: &Job) -> JobResult<()>;
}

#[derive(Debug, Clone)]
pub struct JobRuntimeConfig {
    pub concurrency: usize,
    pub poll_interval: Duration,
    pub housekeeping_interval: Duration,
}

impl Default for JobRuntimeConfig {
    fn default() -> Self {
        Self {
            concurrency: 4,
            poll_interval: Duration::from_millis(500),
            housekeeping_interval: Duration::from_secs(30),
        }
    }
}

impl JobRuntimeConfig {
    pub fn from_env() -> Self {
        let mut cfg = Self::default();
        cfg.concurrency = std::env::var("JOB_WORKER_CONCURRENCY")
            .ok()
            .and_then(|v| v.parse::<usize>().ok())
            .filter(|v| *v > 0)
            .unwrap_or(cfg.concurrency);
        cfg
    }
}

pub struct JobRuntime {
    queue: JobQueue,
    handler: Arc<dyn JobHandler>,
    config: JobRuntimeConfig,
}

impl JobRuntime {
    pub fn new(queue: JobQueue, handler: Arc<dyn JobHandler>, config: JobRuntimeConfig) -> Self {
        Self {
            queue,
            handler,
            config,
        }
    }

    /// Spawns the worker and housekeeping tasks. Returned handles complete
    /// after a shutdown signal.
    pub fn spawn(self, shutdown_rx: watch::Receiver<bool>) -> Vec<JoinHandle<()>> {
        let mut handles = Vec::with_capacity(self.config.concurrency + 1);

        for worker_id in 0..self.config.concurrency {
            let queue = self.queue.clone();
            let handler = self.handler.clone();
            let poll_interval = self.config.poll_interval;
            let mut rx = shutdown_rx.clone();
            handles.push(tokio::spawn(async move {
                info!(worker_id, "job worker started");
                loop {
                    tokio::select! {
                        _ = rx.changed() => {
                            if *rx.borrow() {
                                break;
                            }
                        }
                        _ = run_one(&queue, handler.as_ref(), poll_interval) => {}
                    }
                }
                info!(worker_id, "job worker stopped");
            }));
        }

        let queue = self.queue.clone();
        let interval = self.config.housekeeping_interval;
        let mut rx = shutdown_rx;
        handles.push(tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = rx.changed() => {
                        if *rx.borrow() {
                            break;
                        }
                    }
                    _ = tokio::time::sleep(interval) => {
                        if let Err(e) = queue.promote_due().await {
                            warn!(error = %e, "scheduled job promotion failed");
                        }
                        if let Err(e) = queue.reap_stale().await {
                            warn!(error = %e, "stale job reaping failed");
                        }
                    }
                }
            }
        }));

        handles
    }
}

async fn run_one(queue: &JobQueue, handler: &dyn JobHandler, poll_interval: Duration) {
    let job = match queue.pop().await {
        Ok(Some(job)) => job,
        Ok(None) => {
            tokio::time::sleep(poll_interval).await;
            return;
        }
        Err(e) => {
            warn!(error = %e, "job pop failed");
            tokio::time::sleep(poll_interval).await;
            return;
        }
    };

    match handler.handle(&job).await {
        Ok(()) => {
            if let Err(e) = queue.ack(&job).await {
                warn!(job_id = %job.id, error = %e, "job ack failed");
            }
        }
        Err(JobError::Execution {
            message,
            retryable: false,
        }) => {
            // Permanent failure: ack so it never runs again.
            error!(job_id = %job.id, kind = job.kind.name(), %message, "job failed permanently");
            if let Err(e) = queue.ack(&job).await {
                warn!(job_id = %job.id, error = %e, "job ack failed");
            }
        }
        Err(e) => {
            warn!(
                job_id = %job.id,
                kind = job.kind.name(),
                attempts = job.attempts,
                error = %e,
                "job failed, scheduling retry"
            );
            if let Err(e) = queue.nack(&job).await {
                warn!(job_id = %job.id, error = %e, "job nack failed");
            }
        }
    }
}
