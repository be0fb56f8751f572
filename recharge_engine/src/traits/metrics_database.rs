use chrono::NaiveDate;
use thiserror::Error;

use crate::db_types::{
    DailySalesSummary,
    ExecutionStatus,
    LedgerTotals,
    MetricsExecution,
    MonthlySalesSummary,
    ProductMonthlySales,
    ProductTotals,
    SalesDelta,
};

/// Persistence seam for the metrics consistency engine.
///
/// The `upsert_*` methods fully replace the aggregate row with freshly computed totals; the `apply_*_delta` methods
/// increment in place. Replacement always wins: a recompute after any number of deltas yields the ledger truth.
#[allow(async_fn_in_trait)]
pub trait MetricsDatabase: Clone {
    /// Totals for all orders of a store created on the given calendar day.
    fn ledger_totals_for_day(&self, store_id: i64, date: NaiveDate) -> impl std::future::Future<Output = Result<LedgerTotals, MetricsError>> + Send;

    /// Totals for all orders of a store created in the given month.
    fn ledger_totals_for_month(&self, store_id: i64, month: u32, year: i32) -> impl std::future::Future<Output = Result<LedgerTotals, MetricsError>> + Send;

    /// Per-product completed totals for a store and month.
    fn product_totals_for_month(
        &self,
        store_id: i64,
        month: u32,
        year: i32,
    ) -> impl std::future::Future<Output = Result<Vec<ProductTotals>, MetricsError>> + Send;

    fn upsert_daily_summary(
        &self,
        store_id: i64,
        date: NaiveDate,
        totals: &LedgerTotals,
    ) -> impl std::future::Future<Output = Result<(), MetricsError>> + Send;

    fn upsert_monthly_summary(
        &self,
        store_id: i64,
        month: u32,
        year: i32,
        totals: &LedgerTotals,
    ) -> impl std::future::Future<Output = Result<(), MetricsError>> + Send;

    fn upsert_product_summary(
        &self,
        store_id: i64,
        month: u32,
        year: i32,
        totals: &ProductTotals,
    ) -> impl std::future::Future<Output = Result<(), MetricsError>> + Send;

    /// Applies an immediate delta to the daily, monthly and per-product rows for the scope, creating rows as needed,
    /// in one transaction.
    fn apply_sales_delta(
        &self,
        store_id: i64,
        product_id: i64,
        date: NaiveDate,
        delta: &SalesDelta,
    ) -> impl std::future::Future<Output = Result<(), MetricsError>> + Send;

    fn fetch_daily_summary(
        &self,
        store_id: i64,
        date: NaiveDate,
    ) -> impl std::future::Future<Output = Result<Option<DailySalesSummary>, MetricsError>> + Send;

    fn fetch_monthly_summary(
        &self,
        store_id: i64,
        month: u32,
        year: i32,
    ) -> impl std::future::Future<Output = Result<Option<MonthlySalesSummary>, MetricsError>> + Send;

    fn fetch_product_summary(
        &self,
        store_id: i64,
        product_id: i64,
        month: u32,
        year: i32,
    ) -> impl std::future::Future<Output = Result<Option<ProductMonthlySales>, MetricsError>> + Send;

    /// The stores that have at least one order on the given day.
    fn store_ids_with_orders_on(&self, date: NaiveDate) -> impl std::future::Future<Output = Result<Vec<i64>, MetricsError>> + Send;

    fn fetch_execution(&self, date: NaiveDate) -> impl std::future::Future<Output = Result<Option<MetricsExecution>, MetricsError>> + Send;

    /// Creates or resets the execution record for a date to Processing, preserving the accumulated retry count.
    fn begin_execution(&self, date: NaiveDate, stores_total: i64) -> impl std::future::Future<Output = Result<MetricsExecution, MetricsError>> + Send;

    /// Records the outcome of a run. Failed and Partial outcomes increment the retry count.
    fn finish_execution(
        &self,
        date: NaiveDate,
        status: ExecutionStatus,
        stores_processed: i64,
        stores_total: i64,
        last_error: Option<&str>,
    ) -> impl std::future::Future<Output = Result<MetricsExecution, MetricsError>> + Send;

    /// Marks the date as FailedPermanent so that the cron stops retrying it.
    fn mark_execution_permanent(&self, date: NaiveDate) -> impl std::future::Future<Output = Result<MetricsExecution, MetricsError>> + Send;

    fn executions_between(&self, from: NaiveDate, until: NaiveDate) -> impl std::future::Future<Output = Result<Vec<MetricsExecution>, MetricsError>> + Send;

    fn executions_for_month(&self, month: u32, year: i32) -> impl std::future::Future<Output = Result<Vec<MetricsExecution>, MetricsError>> + Send;
}

#[derive(Debug, Clone, Error)]
pub enum MetricsError {
    #[error("Internal database error: {0}")]
    DatabaseError(String),
    #[error("No execution record exists for {0}")]
    ExecutionNotFound(NaiveDate),
    #[error("Invalid calendar scope: {0}")]
    InvalidScope(String),
}

impl From<sqlx::Error> for MetricsError {
    fn from(e: sqlx::Error) -> Self {
        MetricsError::DatabaseError(e.to_string())
    }
}
