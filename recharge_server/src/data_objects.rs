use std::fmt::Display;

use chrono::{DateTime, NaiveDate, Utc};
use recharge_engine::{
    db_types::{ExecutionStatus, Order, OrderStatus, PaymentEvent, PaymentEventType},
    CronHealth,
    RetryStats,
};
use rg_common::Money;
use serde::{Deserialize, Serialize};

use crate::errors::EventConversionError;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonResponse {
    pub success: bool,
    pub message: String,
}

impl JsonResponse {
    pub fn success<S: Display>(message: S) -> Self {
        Self { success: true, message: message.to_string() }
    }

    pub fn failure<S: Display>(message: S) -> Self {
        Self { success: false, message: message.to_string() }
    }
}

//----------------------------------------   Webhook wire format  ----------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PayerInfo {
    pub name: Option<String>,
    pub email: Option<String>,
    pub document: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaymentMethodInfo {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub details: serde_json::Value,
}

/// The payment event exactly as the provider posts it. `id` is the provider's correlation id for
/// the payment; `status` carries the event verb (APPROVED, REFUNDED, ...). Amounts arrive as
/// decimal strings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderPaymentEvent {
    pub id: String,
    #[serde(rename = "type")]
    pub event_type: String,
    pub status: String,
    pub amount: String,
    pub currency: String,
    pub created_at: Option<DateTime<Utc>>,
    pub updated_at: Option<DateTime<Utc>>,
    pub payer: Option<PayerInfo>,
    pub payment_method: Option<PaymentMethodInfo>,
}

impl TryFrom<ProviderPaymentEvent> for PaymentEvent {
    type Error = EventConversionError;

    fn try_from(event: ProviderPaymentEvent) -> Result<Self, Self::Error> {
        let amount = event
            .amount
            .parse::<Money>()
            .map_err(|e| EventConversionError(format!("Invalid amount '{}'. {e}", event.amount)))?;
        let kind = PaymentEventType::from(event.status.as_str());
        let mut result = PaymentEvent::new(event.id, kind, amount);
        if let Some(payer) = event.payer {
            result.payer_name = payer.name;
            result.payer_email = payer.email;
        }
        Ok(result)
    }
}

//----------------------------------------   API responses  ----------------------------------------------------

/// Customer-facing view of an order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderStatusResponse {
    pub order_number: String,
    pub status: OrderStatus,
    pub package_name: String,
    pub credit_amount: i64,
    pub total_price: Money,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<Order> for OrderStatusResponse {
    fn from(order: Order) -> Self {
        Self {
            order_number: order.order_number,
            status: order.status,
            package_name: order.package_name,
            credit_amount: order.credit_amount,
            total_price: order.total_price,
            created_at: order.created_at,
            updated_at: order.updated_at,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct RetryStatsResponse {
    pub year: i32,
    pub month: u32,
    pub retries: RetryStats,
    pub cron_health: CronHealth,
}

#[derive(Debug, Clone, Serialize)]
pub struct RecoveryResponse {
    pub year: i32,
    pub month: u32,
    pub reprocessed: Vec<RecoveredDate>,
}

#[derive(Debug, Clone, Serialize)]
pub struct RecoveredDate {
    pub date: NaiveDate,
    pub status: ExecutionStatus,
}
