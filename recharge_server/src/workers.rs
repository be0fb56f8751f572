use std::sync::Arc;

use chrono::{NaiveDate, Utc};
use log::*;
use recharge_engine::{
    db_types::ExecutionStatus, CronRunSummary, GatewayDatabase, GatewayProvider, MetricsApi, RetryOrchestrator,
};
use tokio::task::JoinHandle;

/// Starts the retry sweep worker. Do not await the returned JoinHandle, as it will run indefinitely.
///
/// In-process timers cover retries scheduled during this run; the sweep catches retries whose
/// timers were lost to a restart and re-arms them.
pub fn start_retry_sweep_worker<B, P>(retry: Arc<RetryOrchestrator<B, P>>, interval: std::time::Duration) -> JoinHandle<()>
where
    B: GatewayDatabase + 'static,
    P: GatewayProvider + 'static,
{
    tokio::spawn(async move {
        let mut timer = tokio::time::interval(interval);
        info!("🕰️ Retry sweep worker started ({}s interval)", interval.as_secs());
        loop {
            timer.tick().await;
            debug!("🕰️ Running retry sweep");
            match retry.reconcile().await {
                Ok(0) => debug!("🕰️ Retry sweep found nothing to re-arm"),
                Ok(n) => info!("🕰️ Retry sweep re-armed {n} overdue retries"),
                Err(e) => error!("🕰️ Error running retry sweep: {e}"),
            }
        }
    })
}

/// Starts the daily metrics cron worker. Do not await the returned JoinHandle, as it will run
/// indefinitely.
pub fn start_metrics_cron_worker<B>(db: B, interval: std::time::Duration) -> JoinHandle<()>
where
    B: GatewayDatabase + 'static,
{
    tokio::spawn(async move {
        let mut timer = tokio::time::interval(interval);
        let api = MetricsApi::new(db);
        info!("🕰️ Metrics cron worker started ({}s interval)", interval.as_secs());
        loop {
            timer.tick().await;
            let today = Utc::now().date_naive();
            info!("🕰️ Running daily metrics job for {today}");
            match api.run_daily_cron(today).await {
                Ok(summary) => {
                    info!("🕰️ Daily metrics job done. {}", summarize(&summary));
                    if !summary.abandoned.is_empty() {
                        warn!("🕰️ {} date(s) abandoned after repeated failures: {}", summary.abandoned.len(), date_list(&summary.abandoned));
                    }
                    for (date, error) in &summary.errors {
                        warn!("🕰️ Metrics run for {date} hit an infrastructure error and will be retried: {error}");
                    }
                },
                Err(e) => error!("🕰️ Error running daily metrics job: {e}"),
            }
        }
    })
}

fn summarize(summary: &CronRunSummary) -> String {
    if summary.processed.is_empty() {
        return "No dates processed".to_string();
    }
    summary
        .processed
        .iter()
        .map(|(date, status)| {
            let marker = match status {
                ExecutionStatus::Success => "ok",
                ExecutionStatus::Partial => "partial",
                _ => "failed",
            };
            format!("{date}: {marker}")
        })
        .collect::<Vec<String>>()
        .join(", ")
}

fn date_list(dates: &[NaiveDate]) -> String {
    dates.iter().map(NaiveDate::to_string).collect::<Vec<String>>().join(", ")
}
