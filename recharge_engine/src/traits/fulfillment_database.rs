use chrono::{DateTime, Utc};
use rg_common::Money;
use thiserror::Error;

use crate::db_types::{Coupon, CouponUsage, NewOrder, Order, Payment, Recharge};

/// Persistence seam for the order fulfillment state machine and the retry orchestrator.
///
/// Every method that moves more than one row executes as a single atomic transaction: a failure leaves prior state
/// unchanged. Status transitions re-read the current status inside the transaction, which is what makes duplicate
/// webhook delivery a no-op.
#[allow(async_fn_in_trait)]
pub trait FulfillmentDatabase: Clone {
    /// The URL of the database.
    fn url(&self) -> &str;

    /// Stores a new order together with its Pending payment, Pending recharge and (if a coupon was applied) a
    /// speculative coupon usage, all in one transaction. Idempotent on `order_number`: returns `false` in the second
    /// element if the order already existed.
    fn insert_order(&self, order: NewOrder) -> impl std::future::Future<Output = Result<(Order, bool), FulfillmentError>> + Send;

    fn fetch_order_by_number(&self, order_number: &str) -> impl std::future::Future<Output = Result<Option<Order>, FulfillmentError>> + Send;

    fn fetch_order_by_id(&self, order_id: i64) -> impl std::future::Future<Output = Result<Option<Order>, FulfillmentError>> + Send;

    /// Finds the payment the provider's correlation id refers to. `None` is not an error: webhooks for unknown
    /// payments are logged and acknowledged.
    fn fetch_payment_by_external_id(&self, external_id: &str) -> impl std::future::Future<Output = Result<Option<Payment>, FulfillmentError>> + Send;

    fn fetch_payment_for_order(&self, order_id: i64) -> impl std::future::Future<Output = Result<Option<Payment>, FulfillmentError>> + Send;

    fn fetch_recharge_for_order(&self, order_id: i64) -> impl std::future::Future<Output = Result<Option<Recharge>, FulfillmentError>> + Send;

    fn fetch_recharge(&self, recharge_id: i64) -> impl std::future::Future<Output = Result<Option<Recharge>, FulfillmentError>> + Send;

    /// Transition group for an APPROVED event: payment becomes Approved and the order moves to Processing, in one
    /// transaction. Returns the updated order.
    fn approve_payment(&self, payment_id: i64) -> impl std::future::Future<Output = Result<Order, FulfillmentError>> + Send;

    /// Transition group for a successful recharge: order becomes Completed and the recharge Approved (clearing any
    /// scheduled retry), in one transaction.
    fn complete_order(&self, order_id: i64) -> impl std::future::Future<Output = Result<Order, FulfillmentError>> + Send;

    /// Transition group for a REJECTED/CANCELED event: payment Rejected, order Expired, recharge Rejected, in one
    /// transaction.
    fn annul_order(&self, order_id: i64) -> impl std::future::Future<Output = Result<Order, FulfillmentError>> + Send;

    /// Transition group for a REFUNDED/CHARGEBACK event: order Refunded, recharge Rejected if one exists, and the
    /// payment Rejected when `chargeback` is true, in one transaction.
    fn refund_order(&self, order_id: i64, chargeback: bool) -> impl std::future::Future<Output = Result<Order, FulfillmentError>> + Send;

    /// Records the dispute timestamp on the payment. No status transition.
    fn record_dispute(&self, payment_id: i64) -> impl std::future::Future<Output = Result<(), FulfillmentError>> + Send;

    /// Persists the serialized provider request on the recharge row before the first dispatch, so retries can rebuild
    /// the exact same call (including the idempotent request id).
    fn record_recharge_dispatch(&self, recharge_id: i64, request_payload: &str) -> impl std::future::Future<Output = Result<(), FulfillmentError>> + Send;

    /// Persists a scheduled retry: status RetryPending, the new attempt count, the due time and the error that caused
    /// it.
    fn schedule_recharge_retry(
        &self,
        recharge_id: i64,
        attempts: i64,
        next_retry_at: DateTime<Utc>,
        error_code: i64,
        error_message: &str,
    ) -> impl std::future::Future<Output = Result<Recharge, FulfillmentError>> + Send;

    /// Marks a RetryPending recharge as in-flight (status Pending) and returns it. Returns `None` if the record is no
    /// longer RetryPending, in which case the caller must skip the retry. This conditional update is the
    /// status-read-before-mutate guard that serialises retries for a record.
    fn claim_recharge_for_retry(&self, recharge_id: i64) -> impl std::future::Future<Output = Result<Option<Recharge>, FulfillmentError>> + Send;

    /// Terminal failure: status Failed, retry schedule cleared, the fatal error recorded for operator visibility.
    fn fail_recharge(
        &self,
        recharge_id: i64,
        error_code: i64,
        error_message: &str,
    ) -> impl std::future::Future<Output = Result<Recharge, FulfillmentError>> + Send;

    /// RetryPending rows whose `next_retry_at` lies before `cutoff` — evidence that an in-process timer was lost to a
    /// restart.
    fn fetch_overdue_retries(&self, cutoff: DateTime<Utc>) -> impl std::future::Future<Output = Result<Vec<Recharge>, FulfillmentError>> + Send;

    /// Confirms the speculative coupon usage for an order and counts it toward the coupon totals, once. Returns
    /// `None` when the order has no usage or it is already confirmed.
    fn confirm_coupon_usage(&self, order_id: i64, amount: Money) -> impl std::future::Future<Output = Result<Option<CouponUsage>, FulfillmentError>> + Send;

    /// Reverts a previously confirmed coupon usage, decrementing the coupon totals. Returns `None` when there is
    /// nothing to revert.
    fn revert_coupon_usage(&self, order_id: i64, amount: Money) -> impl std::future::Future<Output = Result<Option<CouponUsage>, FulfillmentError>> + Send;

    /// The coupon's current usage counters.
    fn fetch_coupon(&self, code: &str) -> impl std::future::Future<Output = Result<Option<Coupon>, FulfillmentError>> + Send;

    /// Current number of RetryPending recharges.
    fn count_pending_retries(&self) -> impl std::future::Future<Output = Result<i64, FulfillmentError>> + Send;

    /// RetryPending counts grouped by last error code.
    fn pending_retries_by_code(&self) -> impl std::future::Future<Output = Result<Vec<(i64, i64)>, FulfillmentError>> + Send;

    /// Closes the database connection.
    fn close(&mut self) -> impl std::future::Future<Output = Result<(), FulfillmentError>> + Send {
        async { Ok(()) }
    }
}

#[derive(Debug, Clone, Error)]
pub enum FulfillmentError {
    #[error("Internal database error: {0}")]
    DatabaseError(String),
    #[error("Cannot insert order, since it already exists with number {0}")]
    OrderAlreadyExists(String),
    #[error("The requested order (internal id {0}) does not exist")]
    OrderIdNotFound(i64),
    #[error("The requested order {0} does not exist")]
    OrderNotFound(String),
    #[error("The requested payment (internal id {0}) does not exist")]
    PaymentIdNotFound(i64),
    #[error("The requested recharge (internal id {0}) does not exist")]
    RechargeIdNotFound(i64),
    #[error("Illegal status transition: {0}")]
    IllegalTransition(String),
    #[error("Could not (de)serialize {0}")]
    Serialization(String),
}

impl From<sqlx::Error> for FulfillmentError {
    fn from(e: sqlx::Error) -> Self {
        FulfillmentError::DatabaseError(e.to_string())
    }
}
