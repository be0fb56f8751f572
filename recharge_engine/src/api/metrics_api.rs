//! The metrics consistency engine.
//!
//! Two mechanisms keep the sales aggregates honest. Immediate deltas are applied by the order
//! flow as orders reach terminal states, giving near-real-time numbers. The nightly recompute
//! then rebuilds each touched scope from the order ledger with replace-style upserts, so any
//! delta that was lost or double-applied heals on the next run. The cron also looks back over
//! the last few days for dates whose runs never succeeded and reprocesses those first,
//! oldest-first.

use chrono::NaiveDate;
use log::*;
use serde::Serialize;

use crate::{
    db_types::{ExecutionStatus, MetricsExecution},
    helpers::{month_of, previous_days},
    traits::{MetricsDatabase, MetricsError},
};

/// A date that has failed more than this many runs is abandoned as FailedPermanent.
pub const MAX_DATE_RETRIES: i64 = 3;

/// How far back the nightly cron looks for unresolved dates.
pub const GAP_LOOKBACK_DAYS: u64 = 5;

/// Health of the metrics cron over a month, for operator dashboards.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum CronHealth {
    /// Every execution in the month succeeded.
    Ok,
    /// At least one execution is unresolved but still eligible for retry.
    Warning,
    /// At least one date was abandoned as FailedPermanent.
    Error,
}

/// What a single nightly cron run did.
#[derive(Debug, Clone, Default, Serialize)]
pub struct CronRunSummary {
    /// Dates processed this run, in processing order, with the status each run finished with.
    pub processed: Vec<(NaiveDate, ExecutionStatus)>,
    /// Dates skipped because they have exhausted their retries.
    pub abandoned: Vec<NaiveDate>,
    /// Dates whose run could not even be bookkept (infrastructure errors). They stay unresolved
    /// and the next cron picks them up again.
    pub errors: Vec<(NaiveDate, String)>,
}

//--------------------------------------     MetricsApi             -----------------------------------------------

#[derive(Clone)]
pub struct MetricsApi<B> {
    db: B,
}

impl<B> MetricsApi<B>
where B: MetricsDatabase
{
    pub fn new(db: B) -> Self {
        Self { db }
    }

    /// Rebuilds the daily, monthly and per-product aggregates for one store and date from the
    /// order ledger. Safe to run any number of times.
    pub async fn recompute_store_date(&self, store_id: i64, date: NaiveDate) -> Result<(), MetricsError> {
        let daily = self.db.ledger_totals_for_day(store_id, date).await?;
        self.db.upsert_daily_summary(store_id, date, &daily).await?;
        let (month, year) = month_of(date);
        let monthly = self.db.ledger_totals_for_month(store_id, month, year).await?;
        self.db.upsert_monthly_summary(store_id, month, year, &monthly).await?;
        for product in self.db.product_totals_for_month(store_id, month, year).await? {
            self.db.upsert_product_summary(store_id, month, year, &product).await?;
        }
        debug!("💰️ Recomputed aggregates for store {store_id} on {date}");
        Ok(())
    }

    /// Recomputes every store that traded on `date`, tracking the run in the execution ledger.
    ///
    /// Stores are processed sequentially; one store failing does not stop the others. The run
    /// finishes as Success, Partial or Failed depending on how many stores went through.
    pub async fn process_date(&self, date: NaiveDate) -> Result<MetricsExecution, MetricsError> {
        let stores = self.db.store_ids_with_orders_on(date).await?;
        let total = stores.len() as i64;
        self.db.begin_execution(date, total).await?;
        info!("💰️ Metrics run for {date} started. {total} store(s) to process.");
        let mut processed = 0;
        let mut last_error = None;
        for store_id in stores {
            match self.recompute_store_date(store_id, date).await {
                Ok(()) => processed += 1,
                Err(e) => {
                    error!("💰️ Store {store_id} failed during the {date} metrics run. {e}");
                    last_error = Some(format!("store {store_id}: {e}"));
                },
            }
        }
        let status = if processed == total {
            ExecutionStatus::Success
        } else if processed > 0 {
            ExecutionStatus::Partial
        } else {
            ExecutionStatus::Failed
        };
        let execution = self.db.finish_execution(date, status, processed, total, last_error.as_deref()).await?;
        info!("💰️ Metrics run for {date} finished as {status} ({processed}/{total} stores)");
        Ok(execution)
    }

    /// The nightly entry point: heals recent gaps oldest-first, then processes yesterday.
    ///
    /// A gap is a day in the lookback window with no Success execution. A date that has already
    /// failed more than [`MAX_DATE_RETRIES`] runs is marked FailedPermanent and skipped, so one
    /// poisoned day cannot consume the cron forever.
    pub async fn run_daily_cron(&self, today: NaiveDate) -> Result<CronRunSummary, MetricsError> {
        let mut summary = CronRunSummary::default();
        let window = previous_days(today, GAP_LOOKBACK_DAYS);
        let Some((&yesterday, gap_candidates)) = window.split_last() else {
            return Ok(summary);
        };
        // One date's failure, even in the execution bookkeeping, never takes the rest of the run
        // down with it. The date stays unresolved and the next cron tries again.
        for &date in gap_candidates {
            if let Err(e) = self.heal_gap(date, &mut summary).await {
                error!("💰️ Could not settle the metrics gap on {date}. Moving on. {e}");
                summary.errors.push((date, e.to_string()));
            }
        }
        match self.process_date(yesterday).await {
            Ok(execution) => summary.processed.push((yesterday, execution.status)),
            Err(e) => {
                error!("💰️ Metrics run for {yesterday} could not be recorded. {e}");
                summary.errors.push((yesterday, e.to_string()));
            },
        }
        Ok(summary)
    }

    /// Settles one gap candidate: skip, abandon, or reprocess.
    async fn heal_gap(&self, date: NaiveDate, summary: &mut CronRunSummary) -> Result<(), MetricsError> {
        match self.db.fetch_execution(date).await? {
            Some(exec) if exec.status == ExecutionStatus::Success => {},
            Some(exec) if exec.status == ExecutionStatus::FailedPermanent => {
                summary.abandoned.push(date);
            },
            Some(exec) if exec.retry_count > MAX_DATE_RETRIES => {
                warn!("💰️ {date} has failed {} metrics runs. Abandoning it.", exec.retry_count);
                self.db.mark_execution_permanent(date).await?;
                summary.abandoned.push(date);
            },
            _ => {
                info!("💰️ Found metrics gap on {date}. Reprocessing before today's run.");
                let execution = self.process_date(date).await?;
                summary.processed.push((date, execution.status));
            },
        }
        Ok(())
    }

    /// Cron health over a calendar month.
    pub async fn cron_health(&self, month: u32, year: i32) -> Result<CronHealth, MetricsError> {
        let executions = self.db.executions_for_month(month, year).await?;
        if executions.iter().any(|e| e.status == ExecutionStatus::FailedPermanent) {
            return Ok(CronHealth::Error);
        }
        let unresolved = executions
            .iter()
            .any(|e| matches!(e.status, ExecutionStatus::Failed | ExecutionStatus::Partial | ExecutionStatus::Processing));
        if unresolved {
            Ok(CronHealth::Warning)
        } else {
            Ok(CronHealth::Ok)
        }
    }

    /// Manual recovery: reprocesses every unresolved date in the month, including dates that were
    /// abandoned as FailedPermanent. Returns the dates touched and how each run finished.
    pub async fn recover_month(&self, month: u32, year: i32) -> Result<Vec<(NaiveDate, ExecutionStatus)>, MetricsError> {
        let executions = self.db.executions_for_month(month, year).await?;
        let mut results = Vec::new();
        for execution in executions {
            if execution.status == ExecutionStatus::Success {
                continue;
            }
            info!("💰️ Manual recovery reprocessing {} (was {})", execution.date, execution.status);
            let outcome = self.process_date(execution.date).await?;
            results.push((execution.date, outcome.status));
        }
        info!("💰️ Manual recovery for {year}-{month:02} reprocessed {} date(s)", results.len());
        Ok(results)
    }
}
