//! The payment-event state machine.
//!
//! [`OrderFlowApi`] is the single entry point for provider payment webhooks. It resolves the
//! payment the event refers to, applies the status transition the event demands, and hands the
//! downstream work (recharge dispatch, retry scheduling, sales deltas) to the right collaborator.
//! Webhooks are acknowledged regardless of outcome, so every path out of here is a success at the
//! transport level and the [`EventOutcome`] tells the server what actually happened.

use std::sync::Arc;

use log::*;
use rand::distributions::{Alphanumeric, DistString};
use rg_common::DEFAULT_CURRENCY_CODE;

use crate::{
    api::retry_orchestrator::RetryOrchestrator,
    db_types::{NewOrder, Order, OrderStatus, Payment, PaymentEvent, PaymentEventType, PaymentStatus, SalesDelta},
    traits::{FulfillmentDatabase, FulfillmentError, MetricsDatabase, RechargeProvider, RechargeRequest},
};

/// Length of the alphanumeric request id sent to the provider. The id is persisted with the
/// request payload, so retries carry the same id and the provider can deduplicate.
const REQUEST_ID_LEN: usize = 24;

/// What a payment event ended up doing.
#[derive(Debug, Clone)]
pub enum EventOutcome {
    /// Payment approved, recharge delivered, order Completed.
    Fulfilled(Order),
    /// Payment approved, but the recharge failed retryably and is waiting on a timer.
    RechargePending(Order),
    /// Payment approved, recharge failed terminally. The order stays Processing for manual
    /// follow-up.
    RechargeFailed(Order),
    /// Payment rejected or canceled; the order is Expired.
    Annulled(Order),
    /// Refund or chargeback processed; the order is Refunded.
    Refunded(Order),
    /// Dispute timestamp recorded. No status change.
    DisputeRecorded,
    /// The event re-stated something already applied. Nothing changed.
    Duplicate,
    /// The event referenced a payment this system has never seen.
    UnknownPayment,
    /// The event type is not one we act on.
    Ignored,
}

//--------------------------------------     OrderFlowApi           -----------------------------------------------

pub struct OrderFlowApi<B, P> {
    db: B,
    retry: Arc<RetryOrchestrator<B, P>>,
}

impl<B, P> OrderFlowApi<B, P>
where
    B: FulfillmentDatabase + MetricsDatabase + Clone + Send + Sync + 'static,
    P: RechargeProvider + Send + Sync + 'static,
{
    pub fn new(db: B, retry: Arc<RetryOrchestrator<B, P>>) -> Self {
        Self { db, retry }
    }

    /// Registers a new purchase order, creating its Pending payment and recharge in the same
    /// transaction. Idempotent on order number.
    pub async fn process_new_order(&self, new_order: NewOrder) -> Result<Order, FulfillmentError> {
        let (order, created) = self.db.insert_order(new_order).await?;
        if created {
            info!("🔄️ Order {} registered for store {} ({})", order.order_number, order.store_id, order.total_price);
        } else {
            info!("🔄️ Order {} was already registered. Returning the existing record.", order.order_number);
        }
        Ok(order)
    }

    /// Applies a provider payment event to the order it belongs to.
    pub async fn handle_payment_event(&self, event: PaymentEvent) -> Result<EventOutcome, FulfillmentError> {
        let Some(payment) = self.db.fetch_payment_by_external_id(&event.external_id).await? else {
            info!("🔄️ Event {} references unknown payment [{}]. Acknowledged and dropped.", event.event, event.external_id);
            return Ok(EventOutcome::UnknownPayment);
        };
        debug!("🔄️ Event {} for payment #{} (order #{})", event.event, payment.id, payment.order_id);
        match event.event {
            PaymentEventType::Approved => self.handle_approved(payment).await,
            PaymentEventType::Rejected | PaymentEventType::Canceled => self.handle_annulment(payment).await,
            PaymentEventType::Refunded => self.handle_refund(payment, false).await,
            PaymentEventType::Chargeback => self.handle_refund(payment, true).await,
            PaymentEventType::InDispute => {
                self.db.record_dispute(payment.id).await?;
                info!("🔄️ Dispute recorded against payment #{}", payment.id);
                Ok(EventOutcome::DisputeRecorded)
            },
            PaymentEventType::Unknown(kind) => {
                warn!("🔄️ Unrecognised payment event type '{kind}' for payment #{}. Ignoring.", payment.id);
                Ok(EventOutcome::Ignored)
            },
        }
    }

    /// APPROVED: captures the payment, moves the order to Processing and dispatches the recharge.
    ///
    /// Once the payment is captured, recharge failures no longer bubble up as errors. They are
    /// settled by the retry orchestrator and reported through the outcome instead, because the
    /// money has been taken and giving up is not an option the webhook gets to pick.
    async fn handle_approved(&self, payment: Payment) -> Result<EventOutcome, FulfillmentError> {
        let order = self
            .db
            .fetch_order_by_id(payment.order_id)
            .await?
            .ok_or(FulfillmentError::OrderIdNotFound(payment.order_id))?;
        if payment.status != PaymentStatus::Pending || order.status != OrderStatus::Created {
            info!(
                "🔄️ APPROVED for payment #{} is a duplicate (payment {}, order {}). Nothing to do.",
                payment.id, payment.status, order.status
            );
            return Ok(EventOutcome::Duplicate);
        }
        let order = self.db.approve_payment(payment.id).await?;
        info!("🔄️ Payment #{} approved. Order {} is now Processing.", payment.id, order.order_number);
        let Some(recharge) = self.db.fetch_recharge_for_order(order.id).await? else {
            error!("🔄️ Order {} has no recharge record. This should never happen.", order.order_number);
            return Err(FulfillmentError::RechargeIdNotFound(order.id));
        };
        let request = RechargeRequest {
            target_account_id: recharge.target_account.clone(),
            request_id: Alphanumeric.sample_string(&mut rand::thread_rng(), REQUEST_ID_LEN),
            credit_amount: recharge.credit_amount,
            total_cost: order.total_price,
            currency: DEFAULT_CURRENCY_CODE.to_string(),
        };
        let status = self.retry.dispatch(&order, &recharge, &request).await?;
        let order = self.db.fetch_order_by_id(order.id).await?.ok_or(FulfillmentError::OrderIdNotFound(order.id))?;
        use crate::db_types::RechargeStatus::*;
        match status {
            Approved => Ok(EventOutcome::Fulfilled(order)),
            RetryPending => Ok(EventOutcome::RechargePending(order)),
            _ => Ok(EventOutcome::RechargeFailed(order)),
        }
    }

    /// REJECTED / CANCELED: the payment never cleared, so the order expires.
    async fn handle_annulment(&self, payment: Payment) -> Result<EventOutcome, FulfillmentError> {
        let order = self
            .db
            .fetch_order_by_id(payment.order_id)
            .await?
            .ok_or(FulfillmentError::OrderIdNotFound(payment.order_id))?;
        if !matches!(order.status, OrderStatus::Created | OrderStatus::Processing) {
            info!("🔄️ Rejection for payment #{} arrived with order already {}. Nothing to do.", payment.id, order.status);
            return Ok(EventOutcome::Duplicate);
        }
        let order = self.db.annul_order(order.id).await?;
        info!("🔄️ Order {} expired after its payment was rejected", order.order_number);
        let delta = SalesDelta::expired();
        if let Err(e) = self.db.apply_sales_delta(order.store_id, order.product_id, order.created_at.date_naive(), &delta).await
        {
            error!("🔄️ Could not apply the expiry delta for order {}. The nightly recompute will correct it. {e}", order.order_number);
        }
        Ok(EventOutcome::Annulled(order))
    }

    /// REFUNDED / CHARGEBACK: the order moves to Refunded from any prior state.
    ///
    /// A refund for an order that was never completed still lands, since the provider is the
    /// authority on the money. Sales totals are only walked back when the order had actually
    /// counted toward them.
    async fn handle_refund(&self, payment: Payment, chargeback: bool) -> Result<EventOutcome, FulfillmentError> {
        let order = self
            .db
            .fetch_order_by_id(payment.order_id)
            .await?
            .ok_or(FulfillmentError::OrderIdNotFound(payment.order_id))?;
        if order.status == OrderStatus::Refunded {
            info!("🔄️ Refund for payment #{} is a duplicate. Nothing to do.", payment.id);
            return Ok(EventOutcome::Duplicate);
        }
        let was_completed = order.status == OrderStatus::Completed;
        let order = self.db.refund_order(order.id, chargeback).await?;
        info!(
            "🔄️ Order {} refunded ({})",
            order.order_number,
            if chargeback { "chargeback" } else { "provider refund" }
        );
        if was_completed {
            if let Err(e) = self.db.revert_coupon_usage(order.id, order.total_price).await {
                error!("🔄️ Could not revert the coupon usage for order {}. {e}", order.order_number);
            }
        }
        let delta = SalesDelta::refunded(order.total_price, was_completed);
        if let Err(e) = self.db.apply_sales_delta(order.store_id, order.product_id, order.created_at.date_naive(), &delta).await
        {
            error!("🔄️ Could not apply the refund delta for order {}. The nightly recompute will correct it. {e}", order.order_number);
        }
        Ok(EventOutcome::Refunded(order))
    }
}

//--------------------------------------     Shared finalization    -----------------------------------------------

/// Completes an order whose recharge just succeeded: order Completed, recharge Approved, coupon
/// usage confirmed, and the sales delta applied to the aggregates.
///
/// The status transition is the one step that must succeed. The coupon confirmation and the delta
/// are applied best-effort: the nightly recompute rebuilds the aggregates from the order ledger,
/// so a delta lost here heals within a day.
pub(crate) async fn finalize_successful_recharge<B>(db: &B, order_id: i64) -> Result<Order, FulfillmentError>
where B: FulfillmentDatabase + MetricsDatabase {
    let order = db.complete_order(order_id).await?;
    if let Err(e) = db.confirm_coupon_usage(order.id, order.total_price).await {
        error!("💰️ Could not confirm the coupon usage for order {}. {e}", order.order_number);
    }
    let delta = SalesDelta::completed(order.total_price);
    if let Err(e) = db.apply_sales_delta(order.store_id, order.product_id, order.created_at.date_naive(), &delta).await {
        error!("💰️ Could not apply the sales delta for order {}. The nightly recompute will correct it. {e}", order.order_number);
    }
    info!("🔄️ Order {} completed", order.order_number);
    Ok(order)
}
