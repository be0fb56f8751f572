use log::*;
use sqlx::SqliteConnection;

use rg_common::Money;

use crate::{
    db_types::{Payment, PaymentStatus},
    traits::FulfillmentError,
};

pub(crate) async fn insert_payment(
    order_id: i64,
    external_id: &str,
    amount: Money,
    conn: &mut SqliteConnection,
) -> Result<Payment, FulfillmentError> {
    let payment = sqlx::query_as(
        r#"
            INSERT INTO payments (order_id, external_id, amount)
            VALUES ($1, $2, $3)
            RETURNING *;
        "#,
    )
    .bind(order_id)
    .bind(external_id)
    .bind(amount.value())
    .fetch_one(conn)
    .await?;
    Ok(payment)
}

pub async fn fetch_payment(id: i64, conn: &mut SqliteConnection) -> Result<Option<Payment>, sqlx::Error> {
    let payment = sqlx::query_as("SELECT * FROM payments WHERE id = $1").bind(id).fetch_optional(conn).await?;
    Ok(payment)
}

pub async fn fetch_payment_by_external_id(
    external_id: &str,
    conn: &mut SqliteConnection,
) -> Result<Option<Payment>, sqlx::Error> {
    let payment = sqlx::query_as("SELECT * FROM payments WHERE external_id = $1")
        .bind(external_id)
        .fetch_optional(conn)
        .await?;
    Ok(payment)
}

pub async fn fetch_payment_for_order(
    order_id: i64,
    conn: &mut SqliteConnection,
) -> Result<Option<Payment>, sqlx::Error> {
    let payment =
        sqlx::query_as("SELECT * FROM payments WHERE order_id = $1").bind(order_id).fetch_optional(conn).await?;
    Ok(payment)
}

pub(crate) async fn update_payment_status(
    id: i64,
    status: PaymentStatus,
    conn: &mut SqliteConnection,
) -> Result<Payment, FulfillmentError> {
    let result: Option<Payment> =
        sqlx::query_as("UPDATE payments SET status = $1, updated_at = CURRENT_TIMESTAMP WHERE id = $2 RETURNING *")
            .bind(status)
            .bind(id)
            .fetch_optional(conn)
            .await?;
    result.ok_or(FulfillmentError::PaymentIdNotFound(id))
}

/// Records the dispute timestamp only. IN_DISPUTE carries no state transition.
pub(crate) async fn record_dispute(id: i64, conn: &mut SqliteConnection) -> Result<(), FulfillmentError> {
    let rows = sqlx::query(
        "UPDATE payments SET disputed_at = CURRENT_TIMESTAMP, updated_at = CURRENT_TIMESTAMP WHERE id = $1",
    )
    .bind(id)
    .execute(conn)
    .await?
    .rows_affected();
    if rows == 0 {
        return Err(FulfillmentError::PaymentIdNotFound(id));
    }
    trace!("💳️ Payment #{id} marked as disputed");
    Ok(())
}
