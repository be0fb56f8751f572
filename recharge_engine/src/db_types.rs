use std::{fmt::Display, str::FromStr};

use chrono::{DateTime, NaiveDate, Utc};
use rg_common::Money;
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, Type};
use thiserror::Error;

#[derive(Debug, Clone, Error)]
#[error("Invalid status value: {0}")]
pub struct StatusConversionError(String);

//--------------------------------------     OrderStatus     ---------------------------------------------------------
#[derive(Debug, Clone, Copy, PartialEq, Eq, Type, Serialize, Deserialize)]
pub enum OrderStatus {
    /// The order exists but no payment provider event has been processed for it yet.
    Created,
    /// The payment was approved and credit delivery is underway (or retrying).
    Processing,
    /// Payment approved and credits delivered. Terminal, except for a later refund or chargeback.
    Completed,
    /// The payment was rejected or cancelled and the order will never be fulfilled.
    Expired,
    /// The order was refunded or charged back after the fact.
    Refunded,
}

impl OrderStatus {
    /// True for statuses that no ordinary provider event may move the order out of. Refunds are the one sanctioned
    /// exit from `Completed`.
    pub fn is_terminal(&self) -> bool {
        matches!(self, OrderStatus::Expired | OrderStatus::Refunded)
    }
}

impl Display for OrderStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OrderStatus::Created => write!(f, "Created"),
            OrderStatus::Processing => write!(f, "Processing"),
            OrderStatus::Completed => write!(f, "Completed"),
            OrderStatus::Expired => write!(f, "Expired"),
            OrderStatus::Refunded => write!(f, "Refunded"),
        }
    }
}

impl FromStr for OrderStatus {
    type Err = StatusConversionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Created" => Ok(Self::Created),
            "Processing" => Ok(Self::Processing),
            "Completed" => Ok(Self::Completed),
            "Expired" => Ok(Self::Expired),
            "Refunded" => Ok(Self::Refunded),
            s => Err(StatusConversionError(format!("Invalid order status: {s}"))),
        }
    }
}

//--------------------------------------    PaymentStatus    ---------------------------------------------------------
#[derive(Debug, Clone, Copy, PartialEq, Eq, Type, Serialize, Deserialize)]
pub enum PaymentStatus {
    Pending,
    Approved,
    Rejected,
}

impl PaymentStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, PaymentStatus::Pending)
    }
}

impl Display for PaymentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PaymentStatus::Pending => write!(f, "Pending"),
            PaymentStatus::Approved => write!(f, "Approved"),
            PaymentStatus::Rejected => write!(f, "Rejected"),
        }
    }
}

impl FromStr for PaymentStatus {
    type Err = StatusConversionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Pending" => Ok(Self::Pending),
            "Approved" => Ok(Self::Approved),
            "Rejected" => Ok(Self::Rejected),
            s => Err(StatusConversionError(format!("Invalid payment status: {s}"))),
        }
    }
}

//--------------------------------------    RechargeStatus   ---------------------------------------------------------
#[derive(Debug, Clone, Copy, PartialEq, Eq, Type, Serialize, Deserialize)]
pub enum RechargeStatus {
    /// No delivery attempt has concluded yet. Also the transient "in-flight" state while a retry is being re-issued.
    Pending,
    /// Credits were delivered.
    Approved,
    /// The order was annulled or refunded before (or after) delivery; no further attempts are made.
    Rejected,
    /// A retryable failure occurred and a retry timer is (or should be) armed.
    RetryPending,
    /// The retry bound was exhausted or a fatal provider error occurred. Terminal.
    Failed,
}

impl Display for RechargeStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RechargeStatus::Pending => write!(f, "Pending"),
            RechargeStatus::Approved => write!(f, "Approved"),
            RechargeStatus::Rejected => write!(f, "Rejected"),
            RechargeStatus::RetryPending => write!(f, "RetryPending"),
            RechargeStatus::Failed => write!(f, "Failed"),
        }
    }
}

impl FromStr for RechargeStatus {
    type Err = StatusConversionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Pending" => Ok(Self::Pending),
            "Approved" => Ok(Self::Approved),
            "Rejected" => Ok(Self::Rejected),
            "RetryPending" => Ok(Self::RetryPending),
            "Failed" => Ok(Self::Failed),
            s => Err(StatusConversionError(format!("Invalid recharge status: {s}"))),
        }
    }
}

//--------------------------------------        Order        ---------------------------------------------------------
/// A purchase order for virtual credits. Each order has exactly one item, so the package snapshot (product, package
/// name, credit amount) is carried on the order row itself. The associated [`Payment`] and [`Recharge`] rows live in
/// their own tables.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct Order {
    pub id: i64,
    /// The human-readable order number assigned by the storefront.
    pub order_number: String,
    pub store_id: i64,
    pub customer_id: String,
    pub product_id: i64,
    pub package_name: String,
    /// The number of virtual credits this order delivers.
    pub credit_amount: i64,
    /// The final price, after any coupon discount.
    pub total_price: Money,
    /// The price before discounts.
    pub original_price: Money,
    pub status: OrderStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

//--------------------------------------       NewOrder      ---------------------------------------------------------
#[derive(Debug, Clone)]
pub struct NewOrder {
    pub order_number: String,
    pub store_id: i64,
    pub customer_id: String,
    pub product_id: i64,
    pub package_name: String,
    pub credit_amount: i64,
    pub total_price: Money,
    pub original_price: Money,
    /// The correlation id the payment provider will reference in webhook events.
    pub external_payment_id: String,
    /// The account on the third-party platform that receives the credits.
    pub target_account: String,
    /// Set when a coupon was applied at checkout. The usage is recorded speculatively and only counted once the
    /// order completes.
    pub coupon_code: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl NewOrder {
    pub fn new<S1, S2, S3>(order_number: S1, store_id: i64, customer_id: S2, target_account: S3) -> Self
    where
        S1: Into<String>,
        S2: Into<String>,
        S3: Into<String>,
    {
        Self {
            order_number: order_number.into(),
            store_id,
            customer_id: customer_id.into(),
            product_id: 0,
            package_name: String::new(),
            credit_amount: 0,
            total_price: Money::default(),
            original_price: Money::default(),
            external_payment_id: String::new(),
            target_account: target_account.into(),
            coupon_code: None,
            created_at: Utc::now(),
        }
    }

    pub fn with_package(mut self, product_id: i64, package_name: &str, credit_amount: i64) -> Self {
        self.product_id = product_id;
        self.package_name = package_name.to_string();
        self.credit_amount = credit_amount;
        self
    }

    pub fn with_price(mut self, total: Money, original: Money) -> Self {
        self.total_price = total;
        self.original_price = original;
        self
    }

    pub fn with_external_payment_id<S: Into<String>>(mut self, id: S) -> Self {
        self.external_payment_id = id.into();
        self
    }

    pub fn with_coupon<S: Into<String>>(mut self, code: S) -> Self {
        self.coupon_code = Some(code.into());
        self
    }
}

//--------------------------------------       Payment       ---------------------------------------------------------
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct Payment {
    pub id: i64,
    pub order_id: i64,
    /// The payment provider's correlation id, used to match incoming webhook events.
    pub external_id: String,
    pub amount: Money,
    pub status: PaymentStatus,
    /// Audit timestamp, set when an IN_DISPUTE event arrives. Carries no state-machine meaning.
    pub disputed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

//--------------------------------------       Recharge      ---------------------------------------------------------
/// Tracks delivery of the purchased credits through the external recharge API.
///
/// Owned by the order fulfillment state machine; the retry orchestrator only mutates rows while their status is
/// `RetryPending`.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct Recharge {
    pub id: i64,
    pub order_id: i64,
    pub target_account: String,
    pub credit_amount: i64,
    pub status: RechargeStatus,
    /// Number of delivery attempts made so far.
    pub attempts: i64,
    pub next_retry_at: Option<DateTime<Utc>>,
    pub last_error_code: Option<i64>,
    pub last_error_message: Option<String>,
    /// JSON of the original provider request, persisted on first dispatch. Retries rebuild the call from this
    /// payload so that the idempotent request id stays stable across attempts.
    pub request_payload: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

//--------------------------------------        Coupon       ---------------------------------------------------------
/// Counter sink for coupon statistics. Coupon CRUD and discount arithmetic live outside the gateway; the engine only
/// confirms and reverts usages.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct Coupon {
    pub code: String,
    pub times_used: i64,
    pub total_sales_amount: Money,
}

//--------------------------------------     CouponUsage     ---------------------------------------------------------
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct CouponUsage {
    pub id: i64,
    pub order_id: i64,
    pub coupon_code: String,
    /// False while speculative. Set exactly once, when the order completes.
    pub confirmed: bool,
    pub created_at: DateTime<Utc>,
    pub confirmed_at: Option<DateTime<Utc>>,
}

//--------------------------------------   Sales aggregates  ---------------------------------------------------------
/// Daily sales aggregate for one store. Derived data: every column can be recomputed from the order ledger, and the
/// nightly recompute fully replaces the row.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct DailySalesSummary {
    pub id: i64,
    pub store_id: i64,
    pub date: NaiveDate,
    pub total_sales: Money,
    pub total_orders: i64,
    pub total_completed_orders: i64,
    pub total_expired_orders: i64,
    pub total_refunded_orders: i64,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct MonthlySalesSummary {
    pub id: i64,
    pub store_id: i64,
    pub month: i64,
    pub year: i64,
    pub total_sales: Money,
    pub total_orders: i64,
    pub total_completed_orders: i64,
    pub total_expired_orders: i64,
    pub total_refunded_orders: i64,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct ProductMonthlySales {
    pub id: i64,
    pub store_id: i64,
    pub product_id: i64,
    pub month: i64,
    pub year: i64,
    pub total_sales: Money,
    pub total_completed_orders: i64,
    pub updated_at: DateTime<Utc>,
}

/// Freshly computed totals for one (store, period) scope, read straight off the order ledger.
#[derive(Debug, Clone, Default, PartialEq, Eq, FromRow)]
pub struct LedgerTotals {
    pub total_sales: Money,
    pub total_orders: i64,
    pub total_completed_orders: i64,
    pub total_expired_orders: i64,
    pub total_refunded_orders: i64,
}

#[derive(Debug, Clone, FromRow)]
pub struct ProductTotals {
    pub product_id: i64,
    pub total_sales: Money,
    pub total_completed_orders: i64,
}

/// An immediate increment/decrement applied to the aggregate rows when a single order changes status. The nightly
/// recompute is authoritative and corrects any drift this path accumulates.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SalesDelta {
    pub sales: Money,
    pub orders: i64,
    pub completed: i64,
    pub expired: i64,
    pub refunded: i64,
}

impl SalesDelta {
    /// Contribution of an order that just completed.
    pub fn completed(price: Money) -> Self {
        Self { sales: price, orders: 1, completed: 1, ..Default::default() }
    }

    /// Contribution of an order whose payment was rejected or cancelled: it counts as an order, but adds no sales.
    pub fn expired() -> Self {
        Self { orders: 1, expired: 1, ..Default::default() }
    }

    /// Removal of a previously completed order's contribution when it is refunded or charged back.
    pub fn refunded(prior_price: Money, was_completed: bool) -> Self {
        if was_completed {
            Self { sales: -prior_price, completed: -1, refunded: 1, ..Default::default() }
        } else {
            Self { refunded: 1, ..Default::default() }
        }
    }
}

//--------------------------------------   ExecutionStatus   ---------------------------------------------------------
#[derive(Debug, Clone, Copy, PartialEq, Eq, Type, Serialize, Deserialize)]
pub enum ExecutionStatus {
    Processing,
    Success,
    Partial,
    Failed,
    /// The date failed more times than the retry bound allows. Excluded from automatic reprocessing; only the manual
    /// recovery operation can resolve it.
    FailedPermanent,
}

impl ExecutionStatus {
    pub fn is_unresolved(&self) -> bool {
        matches!(self, ExecutionStatus::Partial | ExecutionStatus::Failed | ExecutionStatus::FailedPermanent)
    }
}

impl Display for ExecutionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ExecutionStatus::Processing => write!(f, "Processing"),
            ExecutionStatus::Success => write!(f, "Success"),
            ExecutionStatus::Partial => write!(f, "Partial"),
            ExecutionStatus::Failed => write!(f, "Failed"),
            ExecutionStatus::FailedPermanent => write!(f, "FailedPermanent"),
        }
    }
}

impl FromStr for ExecutionStatus {
    type Err = StatusConversionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Processing" => Ok(Self::Processing),
            "Success" => Ok(Self::Success),
            "Partial" => Ok(Self::Partial),
            "Failed" => Ok(Self::Failed),
            "FailedPermanent" => Ok(Self::FailedPermanent),
            s => Err(StatusConversionError(format!("Invalid execution status: {s}"))),
        }
    }
}

//--------------------------------------  MetricsExecution   ---------------------------------------------------------
/// Audit row for one scheduled metrics recomputation date.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct MetricsExecution {
    pub id: i64,
    pub date: NaiveDate,
    pub status: ExecutionStatus,
    pub stores_processed: i64,
    pub stores_total: i64,
    /// Number of failed or partial runs recorded for this date so far.
    pub retry_count: i64,
    pub last_error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

//--------------------------------------    PaymentEvent     ---------------------------------------------------------
/// The event types a payment provider webhook can carry. Anything unrecognised lands in `Unknown` and is logged and
/// ignored rather than treated as an error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PaymentEventType {
    Approved,
    Rejected,
    Canceled,
    Refunded,
    Chargeback,
    InDispute,
    Unknown(String),
}

impl From<&str> for PaymentEventType {
    fn from(s: &str) -> Self {
        match s.to_ascii_uppercase().as_str() {
            "APPROVED" => Self::Approved,
            "REJECTED" => Self::Rejected,
            "CANCELED" | "CANCELLED" => Self::Canceled,
            "REFUNDED" => Self::Refunded,
            "CHARGEBACK" => Self::Chargeback,
            "IN_DISPUTE" => Self::InDispute,
            _ => Self::Unknown(s.to_string()),
        }
    }
}

impl Display for PaymentEventType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PaymentEventType::Approved => write!(f, "APPROVED"),
            PaymentEventType::Rejected => write!(f, "REJECTED"),
            PaymentEventType::Canceled => write!(f, "CANCELED"),
            PaymentEventType::Refunded => write!(f, "REFUNDED"),
            PaymentEventType::Chargeback => write!(f, "CHARGEBACK"),
            PaymentEventType::InDispute => write!(f, "IN_DISPUTE"),
            PaymentEventType::Unknown(s) => write!(f, "UNKNOWN({s})"),
        }
    }
}

/// A payment provider webhook event, already decoded from the wire format.
#[derive(Debug, Clone)]
pub struct PaymentEvent {
    /// The provider's correlation id for the payment.
    pub external_id: String,
    pub event: PaymentEventType,
    pub amount: Money,
    pub payer_name: Option<String>,
    pub payer_email: Option<String>,
}

impl PaymentEvent {
    pub fn new<S: Into<String>>(external_id: S, event: PaymentEventType, amount: Money) -> Self {
        Self { external_id: external_id.into(), event, amount, payer_name: None, payer_email: None }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn status_round_trips() {
        for s in ["Created", "Processing", "Completed", "Expired", "Refunded"] {
            assert_eq!(s.parse::<OrderStatus>().unwrap().to_string(), s);
        }
        for s in ["Pending", "Approved", "Rejected", "RetryPending", "Failed"] {
            assert_eq!(s.parse::<RechargeStatus>().unwrap().to_string(), s);
        }
        for s in ["Processing", "Success", "Partial", "Failed", "FailedPermanent"] {
            assert_eq!(s.parse::<ExecutionStatus>().unwrap().to_string(), s);
        }
        assert!("Wat".parse::<OrderStatus>().is_err());
    }

    #[test]
    fn event_types_from_provider_strings() {
        assert_eq!(PaymentEventType::from("APPROVED"), PaymentEventType::Approved);
        assert_eq!(PaymentEventType::from("cancelled"), PaymentEventType::Canceled);
        assert_eq!(PaymentEventType::from("IN_DISPUTE"), PaymentEventType::InDispute);
        assert_eq!(PaymentEventType::from("GARBAGE"), PaymentEventType::Unknown("GARBAGE".to_string()));
    }

    #[test]
    fn refund_delta_reverses_completion_delta() {
        let price = Money::from_cents(4_000);
        let done = SalesDelta::completed(price);
        let undone = SalesDelta::refunded(price, true);
        assert_eq!(done.sales + undone.sales, Money::default());
        assert_eq!(done.completed + undone.completed, 0);
        assert_eq!(undone.refunded, 1);
    }
}
