use log::*;
use sqlx::SqliteConnection;

use crate::{
    db_types::{NewOrder, Order, OrderStatus},
    traits::FulfillmentError,
};

/// Inserts the order into the database, returning `false` in the second element if the order already exists.
pub async fn idempotent_insert(
    order: NewOrder,
    conn: &mut SqliteConnection,
) -> Result<(Order, bool), FulfillmentError> {
    let inserted = match fetch_order_by_number(&order.order_number, conn).await? {
        Some(order) => (order, false),
        None => {
            let order = insert_order(order, conn).await?;
            debug!("📝️ Order [{}] inserted with id {}", order.order_number, order.id);
            (order, true)
        },
    };
    Ok(inserted)
}

/// Inserts a new order using the given connection. This is not atomic on its own. Embed the call in a transaction
/// and pass `&mut *tx` as the connection argument to get atomicity with the payment, recharge and coupon rows.
async fn insert_order(order: NewOrder, conn: &mut SqliteConnection) -> Result<Order, FulfillmentError> {
    let order = sqlx::query_as(
        r#"
            INSERT INTO orders (
                order_number,
                store_id,
                customer_id,
                product_id,
                package_name,
                credit_amount,
                total_price,
                original_price,
                created_at
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            RETURNING *;
        "#,
    )
    .bind(order.order_number)
    .bind(order.store_id)
    .bind(order.customer_id)
    .bind(order.product_id)
    .bind(order.package_name)
    .bind(order.credit_amount)
    .bind(order.total_price.value())
    .bind(order.original_price.value())
    .bind(order.created_at)
    .fetch_one(conn)
    .await?;
    Ok(order)
}

pub async fn fetch_order_by_number(
    order_number: &str,
    conn: &mut SqliteConnection,
) -> Result<Option<Order>, sqlx::Error> {
    let order = sqlx::query_as("SELECT * FROM orders WHERE order_number = $1")
        .bind(order_number)
        .fetch_optional(conn)
        .await?;
    Ok(order)
}

pub async fn fetch_order_by_id(id: i64, conn: &mut SqliteConnection) -> Result<Option<Order>, sqlx::Error> {
    let order = sqlx::query_as("SELECT * FROM orders WHERE id = $1").bind(id).fetch_optional(conn).await?;
    Ok(order)
}

pub(crate) async fn update_order_status(
    id: i64,
    status: OrderStatus,
    conn: &mut SqliteConnection,
) -> Result<Order, FulfillmentError> {
    let result: Option<Order> =
        sqlx::query_as("UPDATE orders SET status = $1, updated_at = CURRENT_TIMESTAMP WHERE id = $2 RETURNING *")
            .bind(status)
            .bind(id)
            .fetch_optional(conn)
            .await?;
    result.ok_or(FulfillmentError::OrderIdNotFound(id))
}
