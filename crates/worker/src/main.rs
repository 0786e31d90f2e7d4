//! Huurly Background Worker
//!
//! Scheduled jobs:
//! - Subscription maintenance: expiry reminders + overdue expiration (daily at 03:00 UTC)
//! - Stuck-pending checkout reconciliation (hourly)
//! - Health check heartbeat (every 5 minutes)

use std::sync::Arc;
use std::time::Duration;

use huurly_billing::BillingService;
use huurly_shared::create_pool;
use tokio_cron_scheduler::{Job, JobScheduler};
use tracing::info;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    dotenvy::dotenv().ok();

    info!("Starting Huurly worker");

    let database_url = std::env::var("DATABASE_URL")
        .map_err(|_| anyhow::anyhow!("DATABASE_URL must be set"))?;
    let pool = create_pool(&database_url).await?;

    let billing = Arc::new(BillingService::from_env(pool)?);

    let scheduler = JobScheduler::new().await?;

    // Job 1: Subscription maintenance, daily at 03:00 UTC.
    // Reminder pass and expiration pass report independently; a failure in
    // one is captured in the summary without suppressing the other.
    let maintenance_billing = billing.clone();
    scheduler
        .add(Job::new_async("0 0 3 * * *", move |_uuid, _l| {
            let billing = maintenance_billing.clone();
            Box::pin(async move {
                info!("Running scheduled subscription maintenance");
                let summary = billing.sweeper.run_maintenance().await;
                if !summary.is_clean() {
                    tracing::error!(
                        errors = ?summary.errors,
                        "Subscription maintenance finished with errors"
                    );
                }
            })
        })?)
        .await?;
    info!("Scheduled: subscription maintenance (daily at 03:00 UTC)");

    // Job 2: Stuck-pending reconciliation, hourly at minute 30. Picks up
    // checkouts whose completion webhook was lost.
    let sync_billing = billing.clone();
    scheduler
        .add(Job::new_async("0 30 * * * *", move |_uuid, _l| {
            let billing = sync_billing.clone();
            Box::pin(async move {
                info!("Running stuck pending checkout reconciliation");
                match billing.sync.sync_stuck_pending().await {
                    Ok(report) => {
                        if report.scanned > 0 {
                            info!(
                                scanned = report.scanned,
                                activated = report.activated,
                                cancelled = report.cancelled,
                                still_pending = report.still_pending,
                                "Stuck pending reconciliation report"
                            );
                        }
                    }
                    Err(e) => {
                        tracing::error!(error = %e, "Stuck pending reconciliation failed");
                    }
                }
            })
        })?)
        .await?;
    info!("Scheduled: stuck pending reconciliation (hourly)");

    // Job 3: Health check heartbeat (every 5 minutes)
    scheduler
        .add(Job::new_async("0 */5 * * * *", |_uuid, _l| {
            Box::pin(async move {
                info!("Worker heartbeat - all systems operational");
            })
        })?)
        .await?;
    info!("Scheduled: health check heartbeat (every 5 minutes)");

    info!("Starting job scheduler");
    scheduler.start().await?;

    info!("Huurly worker started successfully with 3 scheduled jobs");

    // Keep the main task running; the scheduler runs jobs in background
    // tasks.
    loop {
        tokio::time::sleep(Duration::from_secs(3600)).await;
    }
}
