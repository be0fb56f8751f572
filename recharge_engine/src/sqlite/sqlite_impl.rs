//! `SqliteDatabase` is the concrete backend of the recharge gateway.
//!
//! It implements the [`FulfillmentDatabase`] and [`MetricsDatabase`] traits on top of a SQLite connection pool. The
//! multi-row transition groups all run inside a single transaction, and every group re-reads the current status
//! before mutating, so duplicate webhook delivery and racing retries degrade to no-ops.
use std::fmt::Debug;

use chrono::{DateTime, NaiveDate, Utc};
use log::*;
use rg_common::Money;
use sqlx::SqlitePool;

use super::db::{coupons, metrics, new_pool, orders, payments, recharges};
use crate::{
    db_types::{
        Coupon,
        CouponUsage,
        DailySalesSummary,
        ExecutionStatus,
        LedgerTotals,
        MetricsExecution,
        MonthlySalesSummary,
        NewOrder,
        Order,
        OrderStatus,
        Payment,
        PaymentStatus,
        ProductMonthlySales,
        ProductTotals,
        Recharge,
        RechargeStatus,
        SalesDelta,
    },
    helpers::{day_bounds, month_bounds, month_of},
    traits::{FulfillmentDatabase, FulfillmentError, MetricsDatabase, MetricsError},
};

#[derive(Clone)]
pub struct SqliteDatabase {
    url: String,
    pool: SqlitePool,
}

impl Debug for SqliteDatabase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "SqliteDatabase ({:?})", self.pool)
    }
}

impl SqliteDatabase {
    /// Creates a new connection pool to the database at `url`, creating the file if necessary.
    pub async fn new_with_url(url: &str, max_connections: u32) -> Result<Self, FulfillmentError> {
        let pool = new_pool(url, max_connections).await?;
        Ok(Self { url: url.to_string(), pool })
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

impl FulfillmentDatabase for SqliteDatabase {
    fn url(&self) -> &str {
        self.url.as_str()
    }

    async fn insert_order(&self, order: NewOrder) -> Result<(Order, bool), FulfillmentError> {
        let mut tx = self.pool.begin().await?;
        let external_id = order.external_payment_id.clone();
        let target_account = order.target_account.clone();
        let credit_amount = order.credit_amount;
        let amount = order.total_price;
        let coupon_code = order.coupon_code.clone();
        let (order, inserted) = orders::idempotent_insert(order, &mut tx).await?;
        if inserted {
            payments::insert_payment(order.id, &external_id, amount, &mut tx).await?;
            recharges::insert_recharge(order.id, &target_account, credit_amount, &mut tx).await?;
            if let Some(code) = coupon_code {
                coupons::insert_usage(order.id, &code, &mut tx).await?;
            }
            debug!("🗃️ Order [{}] saved with Pending payment and recharge", order.order_number);
        }
        tx.commit().await?;
        Ok((order, inserted))
    }

    async fn fetch_order_by_number(&self, order_number: &str) -> Result<Option<Order>, FulfillmentError> {
        let mut conn = self.pool.acquire().await?;
        Ok(orders::fetch_order_by_number(order_number, &mut conn).await?)
    }

    async fn fetch_order_by_id(&self, order_id: i64) -> Result<Option<Order>, FulfillmentError> {
        let mut conn = self.pool.acquire().await?;
        Ok(orders::fetch_order_by_id(order_id, &mut conn).await?)
    }

    async fn fetch_payment_by_external_id(&self, external_id: &str) -> Result<Option<Payment>, FulfillmentError> {
        let mut conn = self.pool.acquire().await?;
        Ok(payments::fetch_payment_by_external_id(external_id, &mut conn).await?)
    }

    async fn fetch_payment_for_order(&self, order_id: i64) -> Result<Option<Payment>, FulfillmentError> {
        let mut conn = self.pool.acquire().await?;
        Ok(payments::fetch_payment_for_order(order_id, &mut conn).await?)
    }

    async fn fetch_recharge_for_order(&self, order_id: i64) -> Result<Option<Recharge>, FulfillmentError> {
        let mut conn = self.pool.acquire().await?;
        Ok(recharges::fetch_recharge_for_order(order_id, &mut conn).await?)
    }

    async fn fetch_recharge(&self, recharge_id: i64) -> Result<Option<Recharge>, FulfillmentError> {
        let mut conn = self.pool.acquire().await?;
        Ok(recharges::fetch_recharge(recharge_id, &mut conn).await?)
    }

    async fn approve_payment(&self, payment_id: i64) -> Result<Order, FulfillmentError> {
        let mut tx = self.pool.begin().await?;
        let payment = payments::fetch_payment(payment_id, &mut tx)
            .await?
            .ok_or(FulfillmentError::PaymentIdNotFound(payment_id))?;
        let order = orders::fetch_order_by_id(payment.order_id, &mut tx)
            .await?
            .ok_or(FulfillmentError::OrderIdNotFound(payment.order_id))?;
        // Re-delivered webhook for a payment that is already settled: leave everything untouched.
        if payment.status == PaymentStatus::Approved {
            tx.commit().await?;
            return Ok(order);
        }
        if payment.status == PaymentStatus::Rejected {
            return Err(FulfillmentError::IllegalTransition(format!(
                "payment #{payment_id} is already Rejected and cannot be approved"
            )));
        }
        payments::update_payment_status(payment_id, PaymentStatus::Approved, &mut tx).await?;
        let order = orders::update_order_status(payment.order_id, OrderStatus::Processing, &mut tx).await?;
        tx.commit().await?;
        debug!("🗃️ Payment #{payment_id} approved. Order [{}] is Processing", order.order_number);
        Ok(order)
    }

    async fn complete_order(&self, order_id: i64) -> Result<Order, FulfillmentError> {
        let mut tx = self.pool.begin().await?;
        let order =
            orders::fetch_order_by_id(order_id, &mut tx).await?.ok_or(FulfillmentError::OrderIdNotFound(order_id))?;
        if order.status == OrderStatus::Completed {
            tx.commit().await?;
            return Ok(order);
        }
        if order.status != OrderStatus::Processing {
            return Err(FulfillmentError::IllegalTransition(format!(
                "order [{}] is {} and cannot be completed",
                order.order_number, order.status
            )));
        }
        let recharge = recharges::fetch_recharge_for_order(order_id, &mut tx)
            .await?
            .ok_or(FulfillmentError::RechargeIdNotFound(order_id))?;
        recharges::approve_recharge(recharge.id, &mut tx).await?;
        let order = orders::update_order_status(order_id, OrderStatus::Completed, &mut tx).await?;
        tx.commit().await?;
        debug!("🗃️ Order [{}] completed: recharge #{} approved", order.order_number, recharge.id);
        Ok(order)
    }

    async fn annul_order(&self, order_id: i64) -> Result<Order, FulfillmentError> {
        let mut tx = self.pool.begin().await?;
        let order =
            orders::fetch_order_by_id(order_id, &mut tx).await?.ok_or(FulfillmentError::OrderIdNotFound(order_id))?;
        if order.status == OrderStatus::Expired {
            tx.commit().await?;
            return Ok(order);
        }
        if !matches!(order.status, OrderStatus::Created | OrderStatus::Processing) {
            return Err(FulfillmentError::IllegalTransition(format!(
                "order [{}] is {} and cannot be expired",
                order.order_number, order.status
            )));
        }
        if let Some(payment) = payments::fetch_payment_for_order(order_id, &mut tx).await? {
            payments::update_payment_status(payment.id, PaymentStatus::Rejected, &mut tx).await?;
        }
        if let Some(recharge) = recharges::fetch_recharge_for_order(order_id, &mut tx).await? {
            recharges::update_recharge_status(recharge.id, RechargeStatus::Rejected, &mut tx).await?;
        }
        let order = orders::update_order_status(order_id, OrderStatus::Expired, &mut tx).await?;
        tx.commit().await?;
        debug!("🗃️ Order [{}] expired", order.order_number);
        Ok(order)
    }

    async fn refund_order(&self, order_id: i64, chargeback: bool) -> Result<Order, FulfillmentError> {
        let mut tx = self.pool.begin().await?;
        let order =
            orders::fetch_order_by_id(order_id, &mut tx).await?.ok_or(FulfillmentError::OrderIdNotFound(order_id))?;
        if order.status == OrderStatus::Refunded {
            tx.commit().await?;
            return Ok(order);
        }
        if chargeback {
            if let Some(payment) = payments::fetch_payment_for_order(order_id, &mut tx).await? {
                payments::update_payment_status(payment.id, PaymentStatus::Rejected, &mut tx).await?;
            }
        }
        if let Some(recharge) = recharges::fetch_recharge_for_order(order_id, &mut tx).await? {
            recharges::update_recharge_status(recharge.id, RechargeStatus::Rejected, &mut tx).await?;
        }
        let order = orders::update_order_status(order_id, OrderStatus::Refunded, &mut tx).await?;
        tx.commit().await?;
        debug!("🗃️ Order [{}] refunded (chargeback: {chargeback})", order.order_number);
        Ok(order)
    }

    async fn record_dispute(&self, payment_id: i64) -> Result<(), FulfillmentError> {
        let mut conn = self.pool.acquire().await?;
        payments::record_dispute(payment_id, &mut conn).await
    }

    async fn record_recharge_dispatch(&self, recharge_id: i64, request_payload: &str) -> Result<(), FulfillmentError> {
        let mut conn = self.pool.acquire().await?;
        recharges::record_dispatch(recharge_id, request_payload, &mut conn).await
    }

    async fn schedule_recharge_retry(
        &self,
        recharge_id: i64,
        attempts: i64,
        next_retry_at: DateTime<Utc>,
        error_code: i64,
        error_message: &str,
    ) -> Result<Recharge, FulfillmentError> {
        let mut conn = self.pool.acquire().await?;
        recharges::schedule_retry(recharge_id, attempts, next_retry_at, error_code, error_message, &mut conn).await
    }

    async fn claim_recharge_for_retry(&self, recharge_id: i64) -> Result<Option<Recharge>, FulfillmentError> {
        let mut conn = self.pool.acquire().await?;
        Ok(recharges::claim_for_retry(recharge_id, &mut conn).await?)
    }

    async fn fail_recharge(
        &self,
        recharge_id: i64,
        error_code: i64,
        error_message: &str,
    ) -> Result<Recharge, FulfillmentError> {
        let mut conn = self.pool.acquire().await?;
        recharges::fail_recharge(recharge_id, error_code, error_message, &mut conn).await
    }

    async fn fetch_overdue_retries(&self, cutoff: DateTime<Utc>) -> Result<Vec<Recharge>, FulfillmentError> {
        let mut conn = self.pool.acquire().await?;
        Ok(recharges::fetch_overdue(cutoff, &mut conn).await?)
    }

    async fn confirm_coupon_usage(
        &self,
        order_id: i64,
        amount: Money,
    ) -> Result<Option<CouponUsage>, FulfillmentError> {
        let mut tx = self.pool.begin().await?;
        let usage = coupons::confirm_usage(order_id, amount, &mut tx).await?;
        tx.commit().await?;
        Ok(usage)
    }

    async fn revert_coupon_usage(&self, order_id: i64, amount: Money) -> Result<Option<CouponUsage>, FulfillmentError> {
        let mut tx = self.pool.begin().await?;
        let usage = coupons::revert_usage(order_id, amount, &mut tx).await?;
        tx.commit().await?;
        Ok(usage)
    }

    async fn fetch_coupon(&self, code: &str) -> Result<Option<Coupon>, FulfillmentError> {
        let mut conn = self.pool.acquire().await?;
        Ok(coupons::fetch_coupon(code, &mut conn).await?)
    }

    async fn count_pending_retries(&self) -> Result<i64, FulfillmentError> {
        let mut conn = self.pool.acquire().await?;
        Ok(recharges::count_pending_retries(&mut conn).await?)
    }

    async fn pending_retries_by_code(&self) -> Result<Vec<(i64, i64)>, FulfillmentError> {
        let mut conn = self.pool.acquire().await?;
        Ok(recharges::pending_retries_by_code(&mut conn).await?)
    }

    async fn close(&mut self) -> Result<(), FulfillmentError> {
        self.pool.close().await;
        Ok(())
    }
}

impl MetricsDatabase for SqliteDatabase {
    async fn ledger_totals_for_day(&self, store_id: i64, date: NaiveDate) -> Result<LedgerTotals, MetricsError> {
        let (start, end) = day_bounds(date);
        let mut conn = self.pool.acquire().await?;
        metrics::ledger_totals(store_id, start, end, &mut conn).await
    }

    async fn ledger_totals_for_month(
        &self,
        store_id: i64,
        month: u32,
        year: i32,
    ) -> Result<LedgerTotals, MetricsError> {
        let (start, end) = month_bounds(month, year);
        let mut conn = self.pool.acquire().await?;
        metrics::ledger_totals(store_id, start, end, &mut conn).await
    }

    async fn product_totals_for_month(
        &self,
        store_id: i64,
        month: u32,
        year: i32,
    ) -> Result<Vec<ProductTotals>, MetricsError> {
        let (start, end) = month_bounds(month, year);
        let mut conn = self.pool.acquire().await?;
        metrics::product_totals(store_id, start, end, &mut conn).await
    }

    async fn upsert_daily_summary(
        &self,
        store_id: i64,
        date: NaiveDate,
        totals: &LedgerTotals,
    ) -> Result<(), MetricsError> {
        let mut conn = self.pool.acquire().await?;
        metrics::upsert_daily_summary(store_id, date, totals, &mut conn).await
    }

    async fn upsert_monthly_summary(
        &self,
        store_id: i64,
        month: u32,
        year: i32,
        totals: &LedgerTotals,
    ) -> Result<(), MetricsError> {
        let mut conn = self.pool.acquire().await?;
        metrics::upsert_monthly_summary(store_id, month, year, totals, &mut conn).await
    }

    async fn upsert_product_summary(
        &self,
        store_id: i64,
        month: u32,
        year: i32,
        totals: &ProductTotals,
    ) -> Result<(), MetricsError> {
        let mut conn = self.pool.acquire().await?;
        metrics::upsert_product_summary(store_id, month, year, totals, &mut conn).await
    }

    async fn apply_sales_delta(
        &self,
        store_id: i64,
        product_id: i64,
        date: NaiveDate,
        delta: &SalesDelta,
    ) -> Result<(), MetricsError> {
        let (month, year) = month_of(date);
        let mut tx = self.pool.begin().await?;
        metrics::apply_daily_delta(store_id, date, delta, &mut tx).await?;
        metrics::apply_monthly_delta(store_id, month, year, delta, &mut tx).await?;
        metrics::apply_product_delta(store_id, product_id, month, year, delta, &mut tx).await?;
        tx.commit().await?;
        trace!("📊️ Applied sales delta for store {store_id} / product {product_id} on {date}: {delta:?}");
        Ok(())
    }

    async fn fetch_daily_summary(
        &self,
        store_id: i64,
        date: NaiveDate,
    ) -> Result<Option<DailySalesSummary>, MetricsError> {
        let mut conn = self.pool.acquire().await?;
        Ok(metrics::fetch_daily_summary(store_id, date, &mut conn).await?)
    }

    async fn fetch_monthly_summary(
        &self,
        store_id: i64,
        month: u32,
        year: i32,
    ) -> Result<Option<MonthlySalesSummary>, MetricsError> {
        let mut conn = self.pool.acquire().await?;
        Ok(metrics::fetch_monthly_summary(store_id, month, year, &mut conn).await?)
    }

    async fn fetch_product_summary(
        &self,
        store_id: i64,
        product_id: i64,
        month: u32,
        year: i32,
    ) -> Result<Option<ProductMonthlySales>, MetricsError> {
        let mut conn = self.pool.acquire().await?;
        Ok(metrics::fetch_product_summary(store_id, product_id, month, year, &mut conn).await?)
    }

    async fn store_ids_with_orders_on(&self, date: NaiveDate) -> Result<Vec<i64>, MetricsError> {
        let (start, end) = day_bounds(date);
        let mut conn = self.pool.acquire().await?;
        metrics::store_ids_with_orders(start, end, &mut conn).await
    }

    async fn fetch_execution(&self, date: NaiveDate) -> Result<Option<MetricsExecution>, MetricsError> {
        let mut conn = self.pool.acquire().await?;
        Ok(metrics::fetch_execution(date, &mut conn).await?)
    }

    async fn begin_execution(&self, date: NaiveDate, stores_total: i64) -> Result<MetricsExecution, MetricsError> {
        let mut conn = self.pool.acquire().await?;
        metrics::begin_execution(date, stores_total, &mut conn).await
    }

    async fn finish_execution(
        &self,
        date: NaiveDate,
        status: ExecutionStatus,
        stores_processed: i64,
        stores_total: i64,
        last_error: Option<&str>,
    ) -> Result<MetricsExecution, MetricsError> {
        let mut conn = self.pool.acquire().await?;
        metrics::finish_execution(date, status, stores_processed, stores_total, last_error, &mut conn).await
    }

    async fn mark_execution_permanent(&self, date: NaiveDate) -> Result<MetricsExecution, MetricsError> {
        let mut conn = self.pool.acquire().await?;
        metrics::mark_execution_permanent(date, &mut conn).await
    }

    async fn executions_between(
        &self,
        from: NaiveDate,
        until: NaiveDate,
    ) -> Result<Vec<MetricsExecution>, MetricsError> {
        let mut conn = self.pool.acquire().await?;
        Ok(metrics::executions_between(from, until, &mut conn).await?)
    }

    async fn executions_for_month(&self, month: u32, year: i32) -> Result<Vec<MetricsExecution>, MetricsError> {
        let from = NaiveDate::from_ymd_opt(year, month, 1)
            .ok_or_else(|| MetricsError::InvalidScope(format!("{year}-{month} is not a calendar month")))?;
        let until = from
            .checked_add_months(chrono::Months::new(1))
            .and_then(|d| d.pred_opt())
            .ok_or_else(|| MetricsError::InvalidScope(format!("{year}-{month} has no last day")))?;
        let mut conn = self.pool.acquire().await?;
        Ok(metrics::executions_between(from, until, &mut conn).await?)
    }
}
