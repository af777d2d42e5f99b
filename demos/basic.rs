//! Minimal runnable demo against a local etcd (`127.0.0.1:2379`):
//!
//!   cargo run --example basic

use etcd_cron::{Cron, CronOptions, Job};
use tokio_util::sync::CancellationToken;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cron = Cron::new(CronOptions::default()).await?;

    cron.add_job(Job::new("flaky-report", "*/4 * * * * *", |_ctx| async {
        // Exercises the default error handler.
        Err(anyhow::anyhow!("horrible error"))
    }))
    .await?;
    cron.add_job(Job::new("heartbeat", "*/10 * * * * *", |_ctx| async {
        tracing::info!(pid = std::process::id(), "every 10 seconds");
        Ok(())
    }))
    .await?;

    let ctx = CancellationToken::new();
    cron.start(ctx.clone());
    tracing::info!("scheduler running, press Ctrl-C to stop");

    tokio::signal::ctrl_c().await?;
    ctx.cancel();
    cron.stop();
    Ok(())
}
