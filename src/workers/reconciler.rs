//! Pending-payment reconciler. Webhooks get lost; this loop polls gateways
//! for payments still pending inside the 48h window and routes any answer
//! through the same transitions a webhook would take. Pendings older than
//! the window are expired without a Meta event.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::database::PaymentRepository;
use crate::jobs::{JobQueue, Priority};
use crate::services::orchestrator::{PaymentOrchestrator, VerifyOutcome};

#[derive(Debug, Clone)]
pub struct ReconcilerConfig {
    pub poll_interval: Duration,
    /// Pendings older than this are expired instead of polled.
    pub window_hours: i64,
    pub batch_limit: i64,
}

impl Default for ReconcilerConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(300),
            window_hours: 48,
            batch_limit: 500,
        }
    }
}

impl ReconcilerConfig {
    pub fn from_env() -> Self {
        let mut cfg = Self::default();
        if let Some(secs) = read_env_u64("RECONCILER_POLL_INTERVAL_SECS") {
            cfg.poll_interval = Duration::from_secs(secs.max(10));
        }
        if let Some(hours) = read_env_u64("RECONCILER_WINDOW_HOURS") {
            cfg.window_hours = (hours as i64).max(1);
        }
        if let Some(limit) = read_env_u64("RECONCILER_BATCH_LIMIT") {
            cfg.batch_limit = (limit as i64).max(1);
        }
        cfg
    }
}

fn read_env_u64(name: &str) -> Option<u64> {
    std::env::var(name).ok().and_then(|v| v.parse().ok())
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct CycleStats {
    pub checked: u64,
    pub promoted: u64,
    pub failed: u64,
    pub expired: u64,
}

pub struct Reconciler {
    payments: PaymentRepository,
    orchestrator: PaymentOrchestrator,
    queue: JobQueue,
    config: ReconcilerConfig,
}

impl Reconciler {
    pub fn new(
        payments: PaymentRepository,
        orchestrator: PaymentOrchestrator,
        queue: JobQueue,
        config: ReconcilerConfig,
    ) -> Self {
        Self {
            payments,
            orchestrator,
            queue,
            config,
        }
    }

    pub fn spawn(self: Arc<Self>, mut shutdown_rx: watch::Receiver<bool>) -> JoinHandle<()> {
        tokio::spawn(async move {
            info!(
                interval_secs = self.config.poll_interval.as_secs(),
                window_hours = self.config.window_hours,
                "reconciler started"
            );
            loop {
                tokio::select! {
                    _ = shutdown_rx.changed() => {
                        if *shutdown_rx.borrow() {
                            info!("reconciler stopping");
                            break;
                        }
                    }
                    _ = tokio::time::sleep(self.config.poll_interval) => {
                        match self.run_cycle().await {
                            Ok(stats) if stats.checked > 0 || stats.expired > 0 => {
                                info!(
                                    checked = stats.checked,
                                    promoted = stats.promoted,
                                    failed = stats.failed,
                                    expired = stats.expired,
                                    "reconciler cycle complete"
                                );
                            }
                            Ok(_) => {}
                            Err(err) => warn!(error = %err, "reconciler cycle failed"),
                        }
                    }
                }
            }
        })
    }

    /// One sweep: expire out-of-window pendings, then poll the rest. The
    /// batch shrinks when the job queue is backed up so reconciliation never
    /// starves webhook-driven work.
    pub async fn run_cycle(&self) -> anyhow::Result<CycleStats> {
        let mut stats = CycleStats::default();

        stats.expired = self
            .payments
            .expire_older_than(self.config.window_hours)
            .await?;

        let backlog = self.queue.queue_depth(Priority::High).await.unwrap_or(0);
        let batch = effective_batch(self.config.batch_limit, backlog);

        let pending = self
            .payments
            .find_pending_within(self.config.window_hours, batch)
            .await?;

        for payment in pending {
            stats.checked += 1;
            match self.orchestrator.verify_payment(&payment.payment_id).await {
                Ok(VerifyOutcome::Paid) => stats.promoted += 1,
                Ok(VerifyOutcome::Failed) => stats.failed += 1,
                Ok(VerifyOutcome::Pending) => {}
                Err(err) => {
                    warn!(
                        payment_id = %payment.payment_id,
                        gateway = %payment.gateway_type,
                        error = %err,
                        "reconcile check failed"
                    );
                }
            }
        }
        Ok(stats)
    }
}

/// Shrinks the sweep batch as the high-priority backlog grows.
fn effective_batch(limit: i64, backlog: u64) -> i64 {
    if backlog >= 1000 {
        (limit / 4).max(25)
    } else if backlog >= 250 {
        (limit / 2).max(25)
    } else {
        limit
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn batch_shrinks_under_backpressure() {
        assert_eq!(effective_batch(500, 0), 500);
        assert_eq!(effective_batch(500, 249), 500);
        assert_eq!(effective_batch(500, 250), 250);
        assert_eq!(effective_batch(500, 1000), 125);
        // Small configured limits never shrink below the floor.
        assert_eq!(effective_batch(40, 5000), 25);
    }

    #[test]
    fn config_defaults_are_five_minutes_and_two_days() {
        let cfg = ReconcilerConfig::default();
        assert_eq!(cfg.poll_interval, Duration::from_secs(300));
        assert_eq!(cfg.window_hours, 48);
        assert_eq!(cfg.batch_limit, 500);
    }
}
