//! Scheduled escrow timeout sweep.

use std::sync::Arc;

use tokio_cron_scheduler::{Job, JobScheduler, JobSchedulerError};
use tracing::{error, info};

use crate::services::EscrowService;

/// Start the cron job that cancels escrow contracts left past their timeout
/// deadline. Each sweep is idempotent; contracts settled between reads are
/// skipped.
pub async fn start(
    escrows: Arc<EscrowService>,
    schedule: &str,
) -> Result<JobScheduler, JobSchedulerError> {
    let scheduler = JobScheduler::new().await?;
    let job = Job::new_async(schedule, move |_id, _lock| {
        let escrows = escrows.clone();
        Box::pin(async move {
            match escrows.expire_due().await {
                Ok(expired) if expired.is_empty() => {}
                Ok(expired) => {
                    info!(count = expired.len(), "escrow sweep cancelled expired contracts");
                }
                Err(e) => {
                    error!(error = %e, "escrow sweep failed");
                }
            }
        })
    })?;
    scheduler.add(job).await?;
    scheduler.start().await?;
    Ok(scheduler)
}
