use chrono::{DateTime, Utc};
use log::*;
use sqlx::SqliteConnection;

use crate::{
    db_types::{Recharge, RechargeStatus},
    traits::FulfillmentError,
};

pub(crate) async fn insert_recharge(
    order_id: i64,
    target_account: &str,
    credit_amount: i64,
    conn: &mut SqliteConnection,
) -> Result<Recharge, FulfillmentError> {
    let recharge = sqlx::query_as(
        r#"
            INSERT INTO recharges (order_id, target_account, credit_amount)
            VALUES ($1, $2, $3)
            RETURNING *;
        "#,
    )
    .bind(order_id)
    .bind(target_account)
    .bind(credit_amount)
    .fetch_one(conn)
    .await?;
    Ok(recharge)
}

pub async fn fetch_recharge(id: i64, conn: &mut SqliteConnection) -> Result<Option<Recharge>, sqlx::Error> {
    let recharge = sqlx::query_as("SELECT * FROM recharges WHERE id = $1").bind(id).fetch_optional(conn).await?;
    Ok(recharge)
}

pub async fn fetch_recharge_for_order(
    order_id: i64,
    conn: &mut SqliteConnection,
) -> Result<Option<Recharge>, sqlx::Error> {
    let recharge =
        sqlx::query_as("SELECT * FROM recharges WHERE order_id = $1").bind(order_id).fetch_optional(conn).await?;
    Ok(recharge)
}

pub(crate) async fn update_recharge_status(
    id: i64,
    status: RechargeStatus,
    conn: &mut SqliteConnection,
) -> Result<Recharge, FulfillmentError> {
    let result: Option<Recharge> =
        sqlx::query_as("UPDATE recharges SET status = $1, updated_at = CURRENT_TIMESTAMP WHERE id = $2 RETURNING *")
            .bind(status)
            .bind(id)
            .fetch_optional(conn)
            .await?;
    result.ok_or(FulfillmentError::RechargeIdNotFound(id))
}

/// Marks the recharge as delivered and clears the retry schedule.
pub(crate) async fn approve_recharge(id: i64, conn: &mut SqliteConnection) -> Result<Recharge, FulfillmentError> {
    let result: Option<Recharge> = sqlx::query_as(
        r#"
            UPDATE recharges
            SET status = 'Approved',
                next_retry_at = NULL,
                last_error_code = NULL,
                last_error_message = NULL,
                updated_at = CURRENT_TIMESTAMP
            WHERE id = $1
            RETURNING *;
        "#,
    )
    .bind(id)
    .fetch_optional(conn)
    .await?;
    result.ok_or(FulfillmentError::RechargeIdNotFound(id))
}

pub(crate) async fn record_dispatch(
    id: i64,
    request_payload: &str,
    conn: &mut SqliteConnection,
) -> Result<(), FulfillmentError> {
    let rows = sqlx::query(
        "UPDATE recharges SET request_payload = $1, attempts = attempts + 1, updated_at = CURRENT_TIMESTAMP WHERE id \
         = $2",
    )
    .bind(request_payload)
    .bind(id)
    .execute(conn)
    .await?
    .rows_affected();
    if rows == 0 {
        return Err(FulfillmentError::RechargeIdNotFound(id));
    }
    Ok(())
}

pub(crate) async fn schedule_retry(
    id: i64,
    attempts: i64,
    next_retry_at: DateTime<Utc>,
    error_code: i64,
    error_message: &str,
    conn: &mut SqliteConnection,
) -> Result<Recharge, FulfillmentError> {
    let result: Option<Recharge> = sqlx::query_as(
        r#"
            UPDATE recharges
            SET status = 'RetryPending',
                attempts = $1,
                next_retry_at = $2,
                last_error_code = $3,
                last_error_message = $4,
                updated_at = CURRENT_TIMESTAMP
            WHERE id = $5
            RETURNING *;
        "#,
    )
    .bind(attempts)
    .bind(next_retry_at)
    .bind(error_code)
    .bind(error_message)
    .bind(id)
    .fetch_optional(conn)
    .await?;
    result.ok_or(FulfillmentError::RechargeIdNotFound(id))
}

/// Conditionally flips a RetryPending recharge back to Pending for re-issue. The `WHERE status = 'RetryPending'`
/// guard makes this the status-read-before-mutate step: a record that was resolved or cancelled in the meantime
/// yields `None` and the retry must be skipped.
pub(crate) async fn claim_for_retry(id: i64, conn: &mut SqliteConnection) -> Result<Option<Recharge>, sqlx::Error> {
    let result: Option<Recharge> = sqlx::query_as(
        r#"
            UPDATE recharges
            SET status = 'Pending', updated_at = CURRENT_TIMESTAMP
            WHERE id = $1 AND status = 'RetryPending'
            RETURNING *;
        "#,
    )
    .bind(id)
    .fetch_optional(conn)
    .await?;
    if result.is_none() {
        debug!("📶️ Recharge #{id} is no longer RetryPending. Skipping the armed retry.");
    }
    Ok(result)
}

pub(crate) async fn fail_recharge(
    id: i64,
    error_code: i64,
    error_message: &str,
    conn: &mut SqliteConnection,
) -> Result<Recharge, FulfillmentError> {
    let result: Option<Recharge> = sqlx::query_as(
        r#"
            UPDATE recharges
            SET status = 'Failed',
                next_retry_at = NULL,
                last_error_code = $1,
                last_error_message = $2,
                updated_at = CURRENT_TIMESTAMP
            WHERE id = $3
            RETURNING *;
        "#,
    )
    .bind(error_code)
    .bind(error_message)
    .bind(id)
    .fetch_optional(conn)
    .await?;
    result.ok_or(FulfillmentError::RechargeIdNotFound(id))
}

/// RetryPending rows whose due time is older than `cutoff`. These have lost their in-process timer (typically to a
/// restart) and need re-arming.
pub(crate) async fn fetch_overdue(
    cutoff: DateTime<Utc>,
    conn: &mut SqliteConnection,
) -> Result<Vec<Recharge>, sqlx::Error> {
    let rows = sqlx::query_as(
        "SELECT * FROM recharges WHERE status = 'RetryPending' AND next_retry_at < $1 ORDER BY next_retry_at ASC",
    )
    .bind(cutoff)
    .fetch_all(conn)
    .await?;
    Ok(rows)
}

pub(crate) async fn count_pending_retries(conn: &mut SqliteConnection) -> Result<i64, sqlx::Error> {
    let (count,): (i64,) =
        sqlx::query_as("SELECT COUNT(*) FROM recharges WHERE status = 'RetryPending'").fetch_one(conn).await?;
    Ok(count)
}

pub(crate) async fn pending_retries_by_code(conn: &mut SqliteConnection) -> Result<Vec<(i64, i64)>, sqlx::Error> {
    let rows: Vec<(i64, i64)> = sqlx::query_as(
        r#"
            SELECT COALESCE(last_error_code, 0) AS code, COUNT(*) AS n
            FROM recharges
            WHERE status = 'RetryPending'
            GROUP BY last_error_code
            ORDER BY code;
        "#,
    )
    .fetch_all(conn)
    .await?;
    Ok(rows)
}
