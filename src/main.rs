use std::sync::Arc;

use anyhow::{anyhow, bail, Context};
use sqlx::postgres::PgPoolOptions;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use finsync_backend::app::{create_scheduler, reconcile_history};
use finsync_backend::config::AppConfig;
use finsync_backend::external::pluggy::PluggyClient;
use finsync_backend::logging::{init_logging, LoggingConfig};
use finsync_backend::observability::TracingTelemetry;
use finsync_backend::services::notification_service::{
    EmailNotificationSink, LogNotificationSink, NotificationSink,
};
use finsync_backend::services::rate_limiter::RateLimiter;
use finsync_backend::state::AppState;
use finsync_backend::store::postgres::PgStore;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    // Initialize logging FIRST
    init_logging(LoggingConfig::from_env()).map_err(|e| anyhow!("failed to initialize logging: {e}"))?;

    let config = AppConfig::from_env().context("invalid configuration")?;

    let pool = PgPoolOptions::new()
        .max_connections(config.database_max_connections)
        .connect(&config.database_url)
        .await
        .context("failed to connect to the database")?;
    sqlx::migrate!().run(&pool).await.context("failed to run migrations")?;

    let limiter = Arc::new(RateLimiter::new(
        config.provider_max_concurrent,
        config.provider_requests_per_minute,
    ));
    let provider = Arc::new(
        PluggyClient::new(
            config.provider_base_url.clone(),
            config.provider_client_id.clone(),
            config.provider_client_secret.clone(),
        )
        .with_rate_limiter(limiter),
    );

    let notifications: Arc<dyn NotificationSink> = match &config.smtp {
        Some(smtp) => Arc::new(EmailNotificationSink::new(smtp)?),
        None => {
            info!("📧 SMTP not configured, credential notices go to the log");
            Arc::new(LogNotificationSink)
        }
    };

    let state = AppState::new(
        Arc::new(PgStore::new(pool)),
        provider,
        Some(notifications),
        Arc::new(TracingTelemetry),
        config.reconciliation_workers,
        config.sync_window.clone(),
    );

    let mode = std::env::args().nth(1).unwrap_or_else(|| "serve".to_string());
    let cancel = CancellationToken::new();

    match mode.as_str() {
        "serve" => {
            let scheduler = create_scheduler(&state, config.scheduler.clone(), config.pool.clone(), &cancel);
            scheduler.start()?;
            if let Some(next) = scheduler.next_scheduled_time() {
                info!("🚀 Sync scheduler running, next run at {}", next);
            }

            tokio::signal::ctrl_c().await.context("failed to listen for ctrl-c")?;
            info!("🛑 Shutdown signal received");
            if let Err(e) = scheduler.shutdown(config.shutdown_timeout).await {
                warn!("Scheduler did not stop cleanly: {}", e);
            }
        }
        "sync-now" => {
            let mut scheduler_config = config.scheduler.clone();
            scheduler_config.run_on_startup = false;
            let scheduler = create_scheduler(&state, scheduler_config, config.pool.clone(), &cancel);
            scheduler.start()?;

            let queued = scheduler.trigger_now().await.context("sync run panicked")??;
            info!("🔄 Queued {} user sync jobs", queued);
            scheduler.shutdown(config.shutdown_timeout).await?;
            info!("✅ Manual sync finished: {:?}", scheduler.pool_stats());
        }
        "reconcile-history" => {
            let report = reconcile_history(&state, &cancel).await?;
            info!(
                "✅ History reconciled for {} users: duplicates found={} marked={}, bill payments found={} marked={}",
                report.users,
                report.duplicates.found,
                report.duplicates.marked,
                report.bill_payments.found,
                report.bill_payments.marked
            );
        }
        other => bail!("unknown mode '{other}', expected serve, sync-now or reconcile-history"),
    }

    Ok(())
}
