//! End-to-end order fulfillment scenarios driven through the payment event state machine.
mod support;

use chrono::Datelike;
use log::*;
use recharge_engine::{
    db_types::{OrderStatus, PaymentEvent, PaymentEventType, PaymentStatus, RechargeStatus},
    EventOutcome,
    FulfillmentDatabase,
    MetricsDatabase,
};
use rg_common::Money;
use support::{harness, sample_order, ScriptedProvider};

fn approved(external_id: &str) -> PaymentEvent {
    PaymentEvent::new(external_id, PaymentEventType::Approved, Money::from_cents(2500))
}

#[tokio::test]
async fn happy_path_completes_the_order_and_counts_the_sale() {
    let h = harness(ScriptedProvider::new().then_succeed()).await;
    let order = h.flow.process_new_order(sample_order(1)).await.unwrap();
    assert_eq!(order.status, OrderStatus::Created);

    let outcome = h.flow.handle_payment_event(approved("pay-1")).await.unwrap();
    let EventOutcome::Fulfilled(order) = outcome else {
        panic!("expected Fulfilled, got {outcome:?}");
    };
    assert_eq!(order.status, OrderStatus::Completed);

    let payment = h.db.fetch_payment_for_order(order.id).await.unwrap().unwrap();
    assert_eq!(payment.status, PaymentStatus::Approved);
    let recharge = h.db.fetch_recharge_for_order(order.id).await.unwrap().unwrap();
    assert_eq!(recharge.status, RechargeStatus::Approved);
    assert_eq!(recharge.attempts, 1);
    assert_eq!(h.provider.call_count(), 1);

    // The sale landed in the daily aggregate immediately.
    let today = order.created_at.date_naive();
    let daily = h.db.fetch_daily_summary(order.store_id, today).await.unwrap().unwrap();
    assert_eq!(daily.total_sales, Money::from_cents(2500));
    assert_eq!(daily.total_orders, 1);
    assert_eq!(daily.total_completed_orders, 1);
    let monthly = h.db.fetch_monthly_summary(order.store_id, today.month(), today.year()).await.unwrap().unwrap();
    assert_eq!(monthly.total_sales, Money::from_cents(2500));
    info!("🚀️ happy path verified");
}

#[tokio::test]
async fn duplicate_approved_webhooks_do_not_recharge_or_count_twice() {
    let h = harness(ScriptedProvider::new().then_succeed()).await;
    let order = h.flow.process_new_order(sample_order(2)).await.unwrap();

    let first = h.flow.handle_payment_event(approved("pay-2")).await.unwrap();
    assert!(matches!(first, EventOutcome::Fulfilled(_)));
    let second = h.flow.handle_payment_event(approved("pay-2")).await.unwrap();
    assert!(matches!(second, EventOutcome::Duplicate));

    assert_eq!(h.provider.call_count(), 1);
    let daily =
        h.db.fetch_daily_summary(order.store_id, order.created_at.date_naive()).await.unwrap().unwrap();
    assert_eq!(daily.total_sales, Money::from_cents(2500));
    assert_eq!(daily.total_completed_orders, 1);
}

#[tokio::test]
async fn order_registration_is_idempotent_on_order_number() {
    let h = harness(ScriptedProvider::new()).await;
    let first = h.flow.process_new_order(sample_order(3)).await.unwrap();
    let again = h.flow.process_new_order(sample_order(3)).await.unwrap();
    assert_eq!(first.id, again.id);
}

#[tokio::test]
async fn rejection_expires_the_order() {
    let h = harness(ScriptedProvider::new()).await;
    let order = h.flow.process_new_order(sample_order(4)).await.unwrap();

    let event = PaymentEvent::new("pay-4", PaymentEventType::Rejected, Money::from_cents(2500));
    let outcome = h.flow.handle_payment_event(event).await.unwrap();
    let EventOutcome::Annulled(order) = outcome else {
        panic!("expected Annulled, got {outcome:?}");
    };
    assert_eq!(order.status, OrderStatus::Expired);
    let payment = h.db.fetch_payment_for_order(order.id).await.unwrap().unwrap();
    assert_eq!(payment.status, PaymentStatus::Rejected);
    let recharge = h.db.fetch_recharge_for_order(order.id).await.unwrap().unwrap();
    assert_eq!(recharge.status, RechargeStatus::Rejected);
    assert_eq!(h.provider.call_count(), 0);

    let daily =
        h.db.fetch_daily_summary(order.store_id, order.created_at.date_naive()).await.unwrap().unwrap();
    assert!(daily.total_sales.is_zero());
    assert_eq!(daily.total_orders, 1);
    assert_eq!(daily.total_expired_orders, 1);
}

#[tokio::test]
async fn refund_of_a_completed_order_walks_the_sale_back() {
    let h = harness(ScriptedProvider::new().then_succeed()).await;
    let order = h.flow.process_new_order(sample_order(5)).await.unwrap();
    h.flow.handle_payment_event(approved("pay-5")).await.unwrap();

    let event = PaymentEvent::new("pay-5", PaymentEventType::Refunded, Money::from_cents(2500));
    let outcome = h.flow.handle_payment_event(event).await.unwrap();
    let EventOutcome::Refunded(order) = outcome else {
        panic!("expected Refunded, got {outcome:?}");
    };
    assert_eq!(order.status, OrderStatus::Refunded);
    // The provider refund does not flip the payment record; only a chargeback does.
    let payment = h.db.fetch_payment_for_order(order.id).await.unwrap().unwrap();
    assert_eq!(payment.status, PaymentStatus::Approved);

    let daily =
        h.db.fetch_daily_summary(order.store_id, order.created_at.date_naive()).await.unwrap().unwrap();
    assert!(daily.total_sales.is_zero());
    assert_eq!(daily.total_completed_orders, 0);
    assert_eq!(daily.total_refunded_orders, 1);

    // A replayed refund changes nothing further.
    let event = PaymentEvent::new("pay-5", PaymentEventType::Refunded, Money::from_cents(2500));
    let outcome = h.flow.handle_payment_event(event).await.unwrap();
    assert!(matches!(outcome, EventOutcome::Duplicate));
}

#[tokio::test]
async fn chargeback_also_rejects_the_payment() {
    let h = harness(ScriptedProvider::new().then_succeed()).await;
    h.flow.process_new_order(sample_order(6)).await.unwrap();
    h.flow.handle_payment_event(approved("pay-6")).await.unwrap();

    let event = PaymentEvent::new("pay-6", PaymentEventType::Chargeback, Money::from_cents(2500));
    let outcome = h.flow.handle_payment_event(event).await.unwrap();
    let EventOutcome::Refunded(order) = outcome else {
        panic!("expected Refunded, got {outcome:?}");
    };
    let payment = h.db.fetch_payment_for_order(order.id).await.unwrap().unwrap();
    assert_eq!(payment.status, PaymentStatus::Rejected);
}

#[tokio::test]
async fn refund_lands_even_when_the_order_never_completed() {
    let h = harness(ScriptedProvider::new()).await;
    let order = h.flow.process_new_order(sample_order(7)).await.unwrap();

    let event = PaymentEvent::new("pay-7", PaymentEventType::Refunded, Money::from_cents(2500));
    let outcome = h.flow.handle_payment_event(event).await.unwrap();
    assert!(matches!(outcome, EventOutcome::Refunded(_)));
    let order = h.db.fetch_order_by_id(order.id).await.unwrap().unwrap();
    assert_eq!(order.status, OrderStatus::Refunded);

    // An APPROVED arriving after the refund is swallowed by the terminal-status check.
    let outcome = h.flow.handle_payment_event(approved("pay-7")).await.unwrap();
    assert!(matches!(outcome, EventOutcome::Duplicate));
    assert_eq!(h.provider.call_count(), 0);

    // Sales were never counted, so only the refund counter moves.
    let daily =
        h.db.fetch_daily_summary(order.store_id, order.created_at.date_naive()).await.unwrap().unwrap();
    assert!(daily.total_sales.is_zero());
    assert_eq!(daily.total_refunded_orders, 1);
}

#[tokio::test]
async fn dispute_is_recorded_without_changing_state() {
    let h = harness(ScriptedProvider::new().then_succeed()).await;
    h.flow.process_new_order(sample_order(8)).await.unwrap();
    h.flow.handle_payment_event(approved("pay-8")).await.unwrap();

    let event = PaymentEvent::new("pay-8", PaymentEventType::InDispute, Money::from_cents(2500));
    let outcome = h.flow.handle_payment_event(event).await.unwrap();
    assert!(matches!(outcome, EventOutcome::DisputeRecorded));

    let payment = h.db.fetch_payment_by_external_id("pay-8").await.unwrap().unwrap();
    assert!(payment.disputed_at.is_some());
    assert_eq!(payment.status, PaymentStatus::Approved);
    let order = h.db.fetch_order_by_id(payment.order_id).await.unwrap().unwrap();
    assert_eq!(order.status, OrderStatus::Completed);
}

#[tokio::test]
async fn events_for_unknown_payments_are_acknowledged_and_dropped() {
    let h = harness(ScriptedProvider::new()).await;
    let outcome = h.flow.handle_payment_event(approved("no-such-payment")).await.unwrap();
    assert!(matches!(outcome, EventOutcome::UnknownPayment));
}

#[tokio::test]
async fn coupon_usage_is_confirmed_only_on_completion() {
    let h = harness(ScriptedProvider::new().then_succeed()).await;
    let new_order = sample_order(9).with_coupon("WELCOME10").with_price(Money::from_cents(2250), Money::from_cents(2500));
    let order = h.flow.process_new_order(new_order).await.unwrap();

    // Speculative: the order is not completed yet, so nothing counts toward the coupon.
    let coupon = h.db.fetch_coupon("WELCOME10").await.unwrap().unwrap();
    assert_eq!(coupon.times_used, 0);
    assert!(coupon.total_sales_amount.is_zero());

    h.flow.handle_payment_event(approved("pay-9")).await.unwrap();
    let coupon = h.db.fetch_coupon("WELCOME10").await.unwrap().unwrap();
    assert_eq!(coupon.times_used, 1);
    assert_eq!(coupon.total_sales_amount, Money::from_cents(2250));

    let usage = h.db.confirm_coupon_usage(order.id, order.total_price).await.unwrap();
    // Already confirmed during finalization, so a second confirmation finds nothing to do and
    // the counters hold steady.
    assert!(usage.is_none());
    let coupon = h.db.fetch_coupon("WELCOME10").await.unwrap().unwrap();
    assert_eq!(coupon.times_used, 1);
    assert_eq!(coupon.total_sales_amount, Money::from_cents(2250));
}

#[tokio::test]
async fn refund_of_a_completed_couponed_order_walks_the_coupon_counters_back() {
    let h = harness(ScriptedProvider::new().then_succeed()).await;
    let new_order =
        sample_order(11).with_coupon("WELCOME10").with_price(Money::from_cents(2250), Money::from_cents(2500));
    h.flow.process_new_order(new_order).await.unwrap();
    h.flow.handle_payment_event(approved("pay-11")).await.unwrap();
    let coupon = h.db.fetch_coupon("WELCOME10").await.unwrap().unwrap();
    assert_eq!(coupon.times_used, 1);
    assert_eq!(coupon.total_sales_amount, Money::from_cents(2250));

    let event = PaymentEvent::new("pay-11", PaymentEventType::Refunded, Money::from_cents(2250));
    let outcome = h.flow.handle_payment_event(event).await.unwrap();
    assert!(matches!(outcome, EventOutcome::Refunded(_)));
    let coupon = h.db.fetch_coupon("WELCOME10").await.unwrap().unwrap();
    assert_eq!(coupon.times_used, 0);
    assert!(coupon.total_sales_amount.is_zero());
}
