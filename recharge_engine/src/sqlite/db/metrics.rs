use chrono::{DateTime, NaiveDate, Utc};
use log::*;
use sqlx::SqliteConnection;

use crate::{
    db_types::{
        DailySalesSummary,
        ExecutionStatus,
        LedgerTotals,
        MetricsExecution,
        MonthlySalesSummary,
        ProductMonthlySales,
        ProductTotals,
        SalesDelta,
    },
    traits::MetricsError,
};

/// Computes fresh totals for all orders of a store created in `[start, end)`. The `datetime()` wrapping normalises
/// the stored timestamp format before comparison.
pub(crate) async fn ledger_totals(
    store_id: i64,
    start: DateTime<Utc>,
    end: DateTime<Utc>,
    conn: &mut SqliteConnection,
) -> Result<LedgerTotals, MetricsError> {
    let totals = sqlx::query_as(
        r#"
            SELECT
                COALESCE(SUM(CASE WHEN status = 'Completed' THEN total_price ELSE 0 END), 0) AS total_sales,
                COUNT(*) AS total_orders,
                COALESCE(SUM(status = 'Completed'), 0) AS total_completed_orders,
                COALESCE(SUM(status = 'Expired'), 0) AS total_expired_orders,
                COALESCE(SUM(status = 'Refunded'), 0) AS total_refunded_orders
            FROM orders
            WHERE store_id = $1 AND datetime(created_at) >= datetime($2) AND datetime(created_at) < datetime($3);
        "#,
    )
    .bind(store_id)
    .bind(start)
    .bind(end)
    .fetch_one(conn)
    .await?;
    Ok(totals)
}

pub(crate) async fn product_totals(
    store_id: i64,
    start: DateTime<Utc>,
    end: DateTime<Utc>,
    conn: &mut SqliteConnection,
) -> Result<Vec<ProductTotals>, MetricsError> {
    let totals = sqlx::query_as(
        r#"
            SELECT
                product_id,
                COALESCE(SUM(CASE WHEN status = 'Completed' THEN total_price ELSE 0 END), 0) AS total_sales,
                COALESCE(SUM(status = 'Completed'), 0) AS total_completed_orders
            FROM orders
            WHERE store_id = $1 AND datetime(created_at) >= datetime($2) AND datetime(created_at) < datetime($3)
            GROUP BY product_id
            ORDER BY product_id;
        "#,
    )
    .bind(store_id)
    .bind(start)
    .bind(end)
    .fetch_all(conn)
    .await?;
    Ok(totals)
}

pub(crate) async fn store_ids_with_orders(
    start: DateTime<Utc>,
    end: DateTime<Utc>,
    conn: &mut SqliteConnection,
) -> Result<Vec<i64>, MetricsError> {
    let rows: Vec<(i64,)> = sqlx::query_as(
        r#"
            SELECT DISTINCT store_id FROM orders
            WHERE datetime(created_at) >= datetime($1) AND datetime(created_at) < datetime($2)
            ORDER BY store_id;
        "#,
    )
    .bind(start)
    .bind(end)
    .fetch_all(conn)
    .await?;
    Ok(rows.into_iter().map(|(id,)| id).collect())
}

/// Replaces the daily aggregate row with freshly computed totals. Values are never incremented here, which is what
/// makes recomputation idempotent.
pub(crate) async fn upsert_daily_summary(
    store_id: i64,
    date: NaiveDate,
    totals: &LedgerTotals,
    conn: &mut SqliteConnection,
) -> Result<(), MetricsError> {
    sqlx::query(
        r#"
            INSERT INTO daily_sales_summaries (
                store_id, date, total_sales, total_orders,
                total_completed_orders, total_expired_orders, total_refunded_orders
            ) VALUES ($1, $2, $3, $4, $5, $6, $7)
            ON CONFLICT (store_id, date) DO UPDATE SET
                total_sales = excluded.total_sales,
                total_orders = excluded.total_orders,
                total_completed_orders = excluded.total_completed_orders,
                total_expired_orders = excluded.total_expired_orders,
                total_refunded_orders = excluded.total_refunded_orders,
                updated_at = CURRENT_TIMESTAMP;
        "#,
    )
    .bind(store_id)
    .bind(date)
    .bind(totals.total_sales.value())
    .bind(totals.total_orders)
    .bind(totals.total_completed_orders)
    .bind(totals.total_expired_orders)
    .bind(totals.total_refunded_orders)
    .execute(conn)
    .await?;
    trace!("📊️ Daily summary replaced for store {store_id} on {date}");
    Ok(())
}

pub(crate) async fn upsert_monthly_summary(
    store_id: i64,
    month: u32,
    year: i32,
    totals: &LedgerTotals,
    conn: &mut SqliteConnection,
) -> Result<(), MetricsError> {
    sqlx::query(
        r#"
            INSERT INTO monthly_sales_summaries (
                store_id, month, year, total_sales, total_orders,
                total_completed_orders, total_expired_orders, total_refunded_orders
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            ON CONFLICT (store_id, month, year) DO UPDATE SET
                total_sales = excluded.total_sales,
                total_orders = excluded.total_orders,
                total_completed_orders = excluded.total_completed_orders,
                total_expired_orders = excluded.total_expired_orders,
                total_refunded_orders = excluded.total_refunded_orders,
                updated_at = CURRENT_TIMESTAMP;
        "#,
    )
    .bind(store_id)
    .bind(i64::from(month))
    .bind(i64::from(year))
    .bind(totals.total_sales.value())
    .bind(totals.total_orders)
    .bind(totals.total_completed_orders)
    .bind(totals.total_expired_orders)
    .bind(totals.total_refunded_orders)
    .execute(conn)
    .await?;
    Ok(())
}

pub(crate) async fn upsert_product_summary(
    store_id: i64,
    month: u32,
    year: i32,
    totals: &ProductTotals,
    conn: &mut SqliteConnection,
) -> Result<(), MetricsError> {
    sqlx::query(
        r#"
            INSERT INTO product_monthly_sales (
                store_id, product_id, month, year, total_sales, total_completed_orders
            ) VALUES ($1, $2, $3, $4, $5, $6)
            ON CONFLICT (store_id, product_id, month, year) DO UPDATE SET
                total_sales = excluded.total_sales,
                total_completed_orders = excluded.total_completed_orders,
                updated_at = CURRENT_TIMESTAMP;
        "#,
    )
    .bind(store_id)
    .bind(totals.product_id)
    .bind(i64::from(month))
    .bind(i64::from(year))
    .bind(totals.total_sales.value())
    .bind(totals.total_completed_orders)
    .execute(conn)
    .await?;
    Ok(())
}

/// Increments the daily row in place. Only the webhook path uses this; the nightly recompute replaces whatever this
/// accumulates.
pub(crate) async fn apply_daily_delta(
    store_id: i64,
    date: NaiveDate,
    delta: &SalesDelta,
    conn: &mut SqliteConnection,
) -> Result<(), MetricsError> {
    sqlx::query(
        r#"
            INSERT INTO daily_sales_summaries (
                store_id, date, total_sales, total_orders,
                total_completed_orders, total_expired_orders, total_refunded_orders
            ) VALUES ($1, $2, $3, $4, $5, $6, $7)
            ON CONFLICT (store_id, date) DO UPDATE SET
                total_sales = total_sales + excluded.total_sales,
                total_orders = total_orders + excluded.total_orders,
                total_completed_orders = total_completed_orders + excluded.total_completed_orders,
                total_expired_orders = total_expired_orders + excluded.total_expired_orders,
                total_refunded_orders = total_refunded_orders + excluded.total_refunded_orders,
                updated_at = CURRENT_TIMESTAMP;
        "#,
    )
    .bind(store_id)
    .bind(date)
    .bind(delta.sales.value())
    .bind(delta.orders)
    .bind(delta.completed)
    .bind(delta.expired)
    .bind(delta.refunded)
    .execute(conn)
    .await?;
    Ok(())
}

pub(crate) async fn apply_monthly_delta(
    store_id: i64,
    month: u32,
    year: i32,
    delta: &SalesDelta,
    conn: &mut SqliteConnection,
) -> Result<(), MetricsError> {
    sqlx::query(
        r#"
            INSERT INTO monthly_sales_summaries (
                store_id, month, year, total_sales, total_orders,
                total_completed_orders, total_expired_orders, total_refunded_orders
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            ON CONFLICT (store_id, month, year) DO UPDATE SET
                total_sales = total_sales + excluded.total_sales,
                total_orders = total_orders + excluded.total_orders,
                total_completed_orders = total_completed_orders + excluded.total_completed_orders,
                total_expired_orders = total_expired_orders + excluded.total_expired_orders,
                total_refunded_orders = total_refunded_orders + excluded.total_refunded_orders,
                updated_at = CURRENT_TIMESTAMP;
        "#,
    )
    .bind(store_id)
    .bind(i64::from(month))
    .bind(i64::from(year))
    .bind(delta.sales.value())
    .bind(delta.orders)
    .bind(delta.completed)
    .bind(delta.expired)
    .bind(delta.refunded)
    .execute(conn)
    .await?;
    Ok(())
}

pub(crate) async fn apply_product_delta(
    store_id: i64,
    product_id: i64,
    month: u32,
    year: i32,
    delta: &SalesDelta,
    conn: &mut SqliteConnection,
) -> Result<(), MetricsError> {
    sqlx::query(
        r#"
            INSERT INTO product_monthly_sales (
                store_id, product_id, month, year, total_sales, total_completed_orders
            ) VALUES ($1, $2, $3, $4, $5, $6)
            ON CONFLICT (store_id, product_id, month, year) DO UPDATE SET
                total_sales = total_sales + excluded.total_sales,
                total_completed_orders = total_completed_orders + excluded.total_completed_orders,
                updated_at = CURRENT_TIMESTAMP;
        "#,
    )
    .bind(store_id)
    .bind(product_id)
    .bind(i64::from(month))
    .bind(i64::from(year))
    .bind(delta.sales.value())
    .bind(delta.completed)
    .execute(conn)
    .await?;
    Ok(())
}

pub(crate) async fn fetch_daily_summary(
    store_id: i64,
    date: NaiveDate,
    conn: &mut SqliteConnection,
) -> Result<Option<DailySalesSummary>, sqlx::Error> {
    sqlx::query_as("SELECT * FROM daily_sales_summaries WHERE store_id = $1 AND date = $2")
        .bind(store_id)
        .bind(date)
        .fetch_optional(conn)
        .await
}

pub(crate) async fn fetch_monthly_summary(
    store_id: i64,
    month: u32,
    year: i32,
    conn: &mut SqliteConnection,
) -> Result<Option<MonthlySalesSummary>, sqlx::Error> {
    sqlx::query_as("SELECT * FROM monthly_sales_summaries WHERE store_id = $1 AND month = $2 AND year = $3")
        .bind(store_id)
        .bind(i64::from(month))
        .bind(i64::from(year))
        .fetch_optional(conn)
        .await
}

pub(crate) async fn fetch_product_summary(
    store_id: i64,
    product_id: i64,
    month: u32,
    year: i32,
    conn: &mut SqliteConnection,
) -> Result<Option<ProductMonthlySales>, sqlx::Error> {
    sqlx::query_as(
        "SELECT * FROM product_monthly_sales WHERE store_id = $1 AND product_id = $2 AND month = $3 AND year = $4",
    )
    .bind(store_id)
    .bind(product_id)
    .bind(i64::from(month))
    .bind(i64::from(year))
    .fetch_optional(conn)
    .await
}

pub(crate) async fn fetch_execution(
    date: NaiveDate,
    conn: &mut SqliteConnection,
) -> Result<Option<MetricsExecution>, sqlx::Error> {
    sqlx::query_as("SELECT * FROM metrics_executions WHERE date = $1").bind(date).fetch_optional(conn).await
}

/// Creates or resets the execution record for a date to Processing. The accumulated retry count survives the reset so
/// that the permanent-failure bound can be enforced across runs.
pub(crate) async fn begin_execution(
    date: NaiveDate,
    stores_total: i64,
    conn: &mut SqliteConnection,
) -> Result<MetricsExecution, MetricsError> {
    let execution = sqlx::query_as(
        r#"
            INSERT INTO metrics_executions (date, status, stores_total)
            VALUES ($1, 'Processing', $2)
            ON CONFLICT (date) DO UPDATE SET
                status = 'Processing',
                stores_total = excluded.stores_total,
                stores_processed = 0,
                last_error = NULL,
                updated_at = CURRENT_TIMESTAMP
            RETURNING *;
        "#,
    )
    .bind(date)
    .bind(stores_total)
    .fetch_one(conn)
    .await?;
    Ok(execution)
}

pub(crate) async fn finish_execution(
    date: NaiveDate,
    status: ExecutionStatus,
    stores_processed: i64,
    stores_total: i64,
    last_error: Option<&str>,
    conn: &mut SqliteConnection,
) -> Result<MetricsExecution, MetricsError> {
    let bump = i64::from(matches!(status, ExecutionStatus::Failed | ExecutionStatus::Partial));
    let execution: Option<MetricsExecution> = sqlx::query_as(
        r#"
            UPDATE metrics_executions
            SET status = $1,
                stores_processed = $2,
                stores_total = $3,
                last_error = $4,
                retry_count = retry_count + $5,
                updated_at = CURRENT_TIMESTAMP
            WHERE date = $6
            RETURNING *;
        "#,
    )
    .bind(status)
    .bind(stores_processed)
    .bind(stores_total)
    .bind(last_error)
    .bind(bump)
    .bind(date)
    .fetch_optional(conn)
    .await?;
    execution.ok_or(MetricsError::ExecutionNotFound(date))
}

pub(crate) async fn mark_execution_permanent(
    date: NaiveDate,
    conn: &mut SqliteConnection,
) -> Result<MetricsExecution, MetricsError> {
    let execution: Option<MetricsExecution> = sqlx::query_as(
        "UPDATE metrics_executions SET status = 'FailedPermanent', updated_at = CURRENT_TIMESTAMP WHERE date = $1 \
         RETURNING *",
    )
    .bind(date)
    .fetch_optional(conn)
    .await?;
    execution.ok_or(MetricsError::ExecutionNotFound(date))
}

pub(crate) async fn executions_between(
    from: NaiveDate,
    until: NaiveDate,
    conn: &mut SqliteConnection,
) -> Result<Vec<MetricsExecution>, sqlx::Error> {
    sqlx::query_as("SELECT * FROM metrics_executions WHERE date >= $1 AND date <= $2 ORDER BY date ASC")
        .bind(from)
        .bind(until)
        .fetch_all(conn)
        .await
}
