//! Maps queued jobs onto the services that execute them, translating service
//! errors into the queue's retryable/permanent distinction.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::info;

use crate::error::AppError;
use crate::jobs::{Job, JobError, JobHandler, JobKind, JobResult};
use crate::services::delivery::DeliveryService;
use crate::services::meta_dispatcher::{MetaDispatcher, PurchaseDisposition};
use crate::workers::Reconciler;

pub struct PlatformJobHandler {
    meta: MetaDispatcher,
    delivery: DeliveryService,
    reconciler: Arc<Reconciler>,
}

impl PlatformJobHandler {
    pub fn new(
        meta: MetaDispatcher,
        delivery: DeliveryService,
        reconciler: Arc<Reconciler>,
    ) -> Self {
        Self {
            meta,
            delivery,
            reconciler,
        }
    }
}

#[async_trait]
impl JobHandler for PlatformJobHandler {
    async fn handle(&self, job: &Job) -> JobResult<()> {
        match &job.kind {
            JobKind::MetaPurchase { payment_id } => {
                let disposition = self
                    .meta
                    .send_purchase(payment_id)
                    .await
                    .map_err(to_job_error)?;
                if disposition == PurchaseDisposition::Skipped {
                    info!(payment_id = %payment_id, "meta purchase skipped by pool config");
                }
                Ok(())
            }
            JobKind::Delivery { payment_id } => {
                self.delivery.deliver(payment_id).await.map_err(to_job_error)
            }
            JobKind::ReconcileSweep => {
                self.reconciler
                    .run_cycle()
                    .await
                    .map_err(|e| JobError::execution(e.to_string(), true))?;
                Ok(())
            }
        }
    }
}

fn to_job_error(err: AppError) -> JobError {
    JobError::execution(err.to_string(), is_retryable(&err))
}

fn is_retryable(err: &AppError) -> bool {
    match err {
        AppError::Gateway(e) => e.is_retryable(),
        AppError::Database(e) => e.is_retryable(),
        AppError::Cache(_) | AppError::Job(_) | AppError::Internal(_) => true,
        AppError::Config(_)
        | AppError::Crypto(_)
        | AppError::NotFound(_)
        | AppError::BadRequest(_) => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::DatabaseError;
    use crate::gateways::GatewayError;

    #[test]
    fn transient_failures_retry_and_rejections_do_not() {
        assert!(is_retryable(&AppError::Gateway(GatewayError::Transient {
            gateway: "bolt".to_string(),
            message: "503".to_string(),
            raw_body: None,
        })));
        assert!(is_retryable(&AppError::Database(DatabaseError::Connection {
            message: "pool timeout".to_string(),
        })));
        assert!(!is_retryable(&AppError::NotFound("payment".to_string())));
        assert!(!is_retryable(&AppError::BadRequest("not paid".to_string())));
    }
}
