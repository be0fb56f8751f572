use log::*;
use sqlx::SqliteConnection;

use rg_common::Money;

use crate::{
    db_types::{Coupon, CouponUsage},
    traits::FulfillmentError,
};

pub(crate) async fn fetch_coupon(code: &str, conn: &mut SqliteConnection) -> Result<Option<Coupon>, FulfillmentError> {
    let coupon = sqlx::query_as(r#"SELECT * FROM coupons WHERE code = $1"#).bind(code).fetch_optional(conn).await?;
    Ok(coupon)
}

/// Records a speculative coupon usage at order creation. The coupon row is created on demand so that the counter
/// updates later never miss.
pub(crate) async fn insert_usage(
    order_id: i64,
    coupon_code: &str,
    conn: &mut SqliteConnection,
) -> Result<CouponUsage, FulfillmentError> {
    sqlx::query("INSERT INTO coupons (code) VALUES ($1) ON CONFLICT (code) DO NOTHING")
        .bind(coupon_code)
        .execute(&mut *conn)
        .await?;
    let usage = sqlx::query_as(
        r#"
            INSERT INTO coupon_usages (order_id, coupon_code)
            VALUES ($1, $2)
            RETURNING *;
        "#,
    )
    .bind(order_id)
    .bind(coupon_code)
    .fetch_one(conn)
    .await?;
    Ok(usage)
}

/// Confirms the usage for an order, exactly once, and counts it toward the coupon totals. The
/// `WHERE confirmed = 0` guard makes double confirmation (e.g. a re-delivered webhook) a no-op.
pub(crate) async fn confirm_usage(
    order_id: i64,
    amount: Money,
    conn: &mut SqliteConnection,
) -> Result<Option<CouponUsage>, FulfillmentError> {
    let usage: Option<CouponUsage> = sqlx::query_as(
        r#"
            UPDATE coupon_usages
            SET confirmed = 1, confirmed_at = CURRENT_TIMESTAMP
            WHERE order_id = $1 AND confirmed = 0
            RETURNING *;
        "#,
    )
    .bind(order_id)
    .fetch_optional(&mut *conn)
    .await?;
    if let Some(usage) = &usage {
        sqlx::query(
            "UPDATE coupons SET times_used = times_used + 1, total_sales_amount = total_sales_amount + $1 WHERE code \
             = $2",
        )
        .bind(amount.value())
        .bind(&usage.coupon_code)
        .execute(conn)
        .await?;
        debug!("🎟️ Coupon [{}] usage confirmed for order #{order_id} ({amount})", usage.coupon_code);
    }
    Ok(usage)
}

/// Reverts a confirmed usage when the order is refunded, decrementing the coupon totals.
pub(crate) async fn revert_usage(
    order_id: i64,
    amount: Money,
    conn: &mut SqliteConnection,
) -> Result<Option<CouponUsage>, FulfillmentError> {
    let usage: Option<CouponUsage> = sqlx::query_as(
        r#"
            UPDATE coupon_usages
            SET confirmed = 0, confirmed_at = NULL
            WHERE order_id = $1 AND confirmed = 1
            RETURNING *;
        "#,
    )
    .bind(order_id)
    .fetch_optional(&mut *conn)
    .await?;
    if let Some(usage) = &usage {
        sqlx::query(
            "UPDATE coupons SET times_used = times_used - 1, total_sales_amount = total_sales_amount - $1 WHERE code \
             = $2",
        )
        .bind(amount.value())
        .bind(&usage.coupon_code)
        .execute(conn)
        .await?;
        debug!("🎟️ Coupon [{}] usage reverted for order #{order_id} ({amount})", usage.coupon_code);
    }
    Ok(usage)
}
