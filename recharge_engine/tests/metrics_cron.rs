//! Metrics consistency engine scenarios: recompute idempotency, gap healing and recovery.
mod support;

use chrono::{Datelike, Days, NaiveDate, TimeZone, Utc};
use recharge_engine::{
    db_types::{ExecutionStatus, NewOrder, PaymentEvent, PaymentEventType},
    CronHealth,
    MetricsApi,
    MetricsDatabase,
    SqliteDatabase,
};
use rg_common::Money;
use support::{harness, sample_order, ScriptedProvider, TestHarness};

fn approved(external_id: &str) -> PaymentEvent {
    PaymentEvent::new(external_id, PaymentEventType::Approved, Money::from_cents(2500))
}

fn backdated(order: NewOrder, date: NaiveDate) -> NewOrder {
    let mut order = order;
    order.created_at = Utc.from_utc_datetime(&date.and_hms_opt(12, 0, 0).unwrap());
    order
}

/// Completes one 25.00 order created on `date`.
async fn completed_order_on(h: &TestHarness, n: u64, date: NaiveDate) {
    h.flow.process_new_order(backdated(sample_order(n), date)).await.unwrap();
    h.flow.handle_payment_event(approved(&format!("pay-{n}"))).await.unwrap();
}

async fn seed_execution(db: &SqliteDatabase, date: NaiveDate, status: &str, retry_count: i64) {
    sqlx::query("INSERT INTO metrics_executions (date, status, stores_total, retry_count) VALUES (?, ?, 1, ?)")
        .bind(date)
        .bind(status)
        .bind(retry_count)
        .execute(db.pool())
        .await
        .unwrap();
}

#[tokio::test]
async fn recompute_replaces_drifted_aggregates_with_ledger_truth() {
    let h = harness(ScriptedProvider::new()).await;
    let order = h.flow.process_new_order(sample_order(1)).await.unwrap();
    h.flow.handle_payment_event(approved("pay-1")).await.unwrap();
    let date = order.created_at.date_naive();

    // Sabotage the delta-maintained row; the recompute has to win.
    sqlx::query("UPDATE daily_sales_summaries SET total_sales = 999999, total_orders = 42")
        .execute(h.db.pool())
        .await
        .unwrap();

    let metrics = MetricsApi::new(h.db.clone());
    let execution = metrics.process_date(date).await.unwrap();
    assert_eq!(execution.status, ExecutionStatus::Success);
    assert_eq!(execution.stores_processed, 1);
    assert_eq!(execution.retry_count, 0);

    let daily = h.db.fetch_daily_summary(order.store_id, date).await.unwrap().unwrap();
    assert_eq!(daily.total_sales, Money::from_cents(2500));
    assert_eq!(daily.total_orders, 1);
    assert_eq!(daily.total_completed_orders, 1);

    // Running it again changes nothing.
    metrics.process_date(date).await.unwrap();
    let again = h.db.fetch_daily_summary(order.store_id, date).await.unwrap().unwrap();
    assert_eq!(again.total_sales, daily.total_sales);
    assert_eq!(again.total_orders, daily.total_orders);

    let product = h.db.fetch_product_summary(order.store_id, 7, date.month(), date.year()).await.unwrap().unwrap();
    assert_eq!(product.total_sales, Money::from_cents(2500));
    assert_eq!(product.total_completed_orders, 1);
}

#[tokio::test]
async fn cron_heals_recent_gaps_oldest_first_then_runs_yesterday() {
    let h = harness(ScriptedProvider::new()).await;
    let today = Utc::now().date_naive();
    let d3 = today.checked_sub_days(Days::new(3)).unwrap();
    let d2 = today.checked_sub_days(Days::new(2)).unwrap();
    completed_order_on(&h, 1, d3).await;
    completed_order_on(&h, 2, d2).await;

    let metrics = MetricsApi::new(h.db.clone());
    let summary = metrics.run_daily_cron(today).await.unwrap();

    // Every day in the lookback window lacked a Success record, so all of them ran, oldest
    // first, finishing with yesterday.
    let dates: Vec<NaiveDate> = summary.processed.iter().map(|(d, _)| *d).collect();
    let expected: Vec<NaiveDate> =
        (1..=5).rev().map(|back| today.checked_sub_days(Days::new(back)).unwrap()).collect();
    assert_eq!(dates, expected);
    assert!(summary.processed.iter().all(|(_, s)| *s == ExecutionStatus::Success));
    assert!(summary.abandoned.is_empty());

    let daily = h.db.fetch_daily_summary(1, d3).await.unwrap().unwrap();
    assert_eq!(daily.total_sales, Money::from_cents(2500));

    // With the gaps healed, the next run only touches yesterday.
    let yesterday = today.checked_sub_days(Days::new(1)).unwrap();
    let summary = metrics.run_daily_cron(today).await.unwrap();
    let dates: Vec<NaiveDate> = summary.processed.iter().map(|(d, _)| *d).collect();
    assert_eq!(dates, vec![yesterday]);
}

#[tokio::test]
async fn dates_that_keep_failing_are_abandoned() {
    let h = harness(ScriptedProvider::new()).await;
    let today = Utc::now().date_naive();
    let poisoned = today.checked_sub_days(Days::new(3)).unwrap();
    // More failed runs than the bound allows.
    seed_execution(&h.db, poisoned, "Failed", 4).await;
    // The rest of the window is already resolved.
    for back in [5u64, 4, 2] {
        seed_execution(&h.db, today.checked_sub_days(Days::new(back)).unwrap(), "Success", 0).await;
    }

    let metrics = MetricsApi::new(h.db.clone());
    let summary = metrics.run_daily_cron(today).await.unwrap();
    assert_eq!(summary.abandoned, vec![poisoned]);
    let execution = h.db.fetch_execution(poisoned).await.unwrap().unwrap();
    assert_eq!(execution.status, ExecutionStatus::FailedPermanent);

    // Abandonment sticks across runs.
    let summary = metrics.run_daily_cron(today).await.unwrap();
    assert_eq!(summary.abandoned, vec![poisoned]);
    assert!(summary.processed.iter().all(|(d, _)| *d != poisoned));
}

#[tokio::test]
async fn failed_dates_below_the_limit_are_retried_by_the_cron() {
    let h = harness(ScriptedProvider::new()).await;
    let today = Utc::now().date_naive();
    let flaky = today.checked_sub_days(Days::new(2)).unwrap();
    completed_order_on(&h, 1, flaky).await;
    seed_execution(&h.db, flaky, "Failed", 1).await;

    let metrics = MetricsApi::new(h.db.clone());
    let summary = metrics.run_daily_cron(today).await.unwrap();
    assert!(summary.processed.iter().any(|(d, s)| *d == flaky && *s == ExecutionStatus::Success));
    let execution = h.db.fetch_execution(flaky).await.unwrap().unwrap();
    assert_eq!(execution.status, ExecutionStatus::Success);
    // The retry count survives the successful run as an audit trail.
    assert_eq!(execution.retry_count, 1);
}

#[tokio::test]
async fn a_date_at_exactly_the_retry_bound_gets_one_more_run() {
    let h = harness(ScriptedProvider::new()).await;
    let today = Utc::now().date_naive();
    let flaky = today.checked_sub_days(Days::new(2)).unwrap();
    completed_order_on(&h, 1, flaky).await;
    // Three failed runs is the bound itself, not past it.
    seed_execution(&h.db, flaky, "Failed", 3).await;

    let metrics = MetricsApi::new(h.db.clone());
    let summary = metrics.run_daily_cron(today).await.unwrap();
    assert!(summary.abandoned.is_empty());
    assert!(summary.processed.iter().any(|(d, s)| *d == flaky && *s == ExecutionStatus::Success));
}

#[tokio::test]
async fn one_dates_bookkeeping_failure_does_not_stop_the_run() {
    let h = harness(ScriptedProvider::new()).await;
    let today = Utc::now().date_naive();
    let broken = today.checked_sub_days(Days::new(3)).unwrap();
    let d2 = today.checked_sub_days(Days::new(2)).unwrap();
    completed_order_on(&h, 1, d2).await;

    // Make every execution-ledger write for one date fail, as a database-level fault would.
    for (name, op) in [("block_exec_ins", "INSERT"), ("block_exec_upd", "UPDATE")] {
        let ddl = format!(
            "CREATE TRIGGER {name} BEFORE {op} ON metrics_executions WHEN NEW.date = '{broken}' \
             BEGIN SELECT RAISE(ABORT, 'execution ledger unavailable'); END;"
        );
        sqlx::query(&ddl).execute(h.db.pool()).await.unwrap();
    }

    let metrics = MetricsApi::new(h.db.clone());
    let summary = metrics.run_daily_cron(today).await.unwrap();

    // The broken date is reported, and every other date still ran.
    assert_eq!(summary.errors.len(), 1);
    assert_eq!(summary.errors[0].0, broken);
    let dates: Vec<NaiveDate> = summary.processed.iter().map(|(d, _)| *d).collect();
    let expected: Vec<NaiveDate> = [5u64, 4, 2, 1].iter().map(|&b| today.checked_sub_days(Days::new(b)).unwrap()).collect();
    assert_eq!(dates, expected);
    let daily = h.db.fetch_daily_summary(1, d2).await.unwrap().unwrap();
    assert_eq!(daily.total_sales, Money::from_cents(2500));

    // Once the fault clears, the next cron heals the date like any other gap.
    sqlx::query("DROP TRIGGER block_exec_ins").execute(h.db.pool()).await.unwrap();
    sqlx::query("DROP TRIGGER block_exec_upd").execute(h.db.pool()).await.unwrap();
    let summary = metrics.run_daily_cron(today).await.unwrap();
    assert!(summary.errors.is_empty());
    assert!(summary.processed.iter().any(|(d, s)| *d == broken && *s == ExecutionStatus::Success));
}

#[tokio::test]
async fn cron_health_reflects_the_worst_execution_in_the_month() {
    let h = harness(ScriptedProvider::new()).await;
    let metrics = MetricsApi::new(h.db.clone());

    seed_execution(&h.db, NaiveDate::from_ymd_opt(2024, 5, 10).unwrap(), "Success", 0).await;
    assert_eq!(metrics.cron_health(5, 2024).await.unwrap(), CronHealth::Ok);

    seed_execution(&h.db, NaiveDate::from_ymd_opt(2024, 5, 11).unwrap(), "Failed", 1).await;
    assert_eq!(metrics.cron_health(5, 2024).await.unwrap(), CronHealth::Warning);

    seed_execution(&h.db, NaiveDate::from_ymd_opt(2024, 5, 12).unwrap(), "FailedPermanent", 3).await;
    assert_eq!(metrics.cron_health(5, 2024).await.unwrap(), CronHealth::Error);

    // A different month is unaffected.
    assert_eq!(metrics.cron_health(6, 2024).await.unwrap(), CronHealth::Ok);
}

#[tokio::test]
async fn recover_month_reprocesses_everything_unresolved_including_abandoned_dates() {
    let h = harness(ScriptedProvider::new()).await;
    let d10 = NaiveDate::from_ymd_opt(2024, 5, 10).unwrap();
    let d11 = NaiveDate::from_ymd_opt(2024, 5, 11).unwrap();
    completed_order_on(&h, 1, d10).await;
    seed_execution(&h.db, d10, "Failed", 2).await;
    seed_execution(&h.db, d11, "FailedPermanent", 3).await;

    let metrics = MetricsApi::new(h.db.clone());
    let results = metrics.recover_month(5, 2024).await.unwrap();
    assert_eq!(results.len(), 2);
    assert!(results.iter().all(|(_, s)| *s == ExecutionStatus::Success));

    assert_eq!(metrics.cron_health(5, 2024).await.unwrap(), CronHealth::Ok);
    let daily = h.db.fetch_daily_summary(1, d10).await.unwrap().unwrap();
    assert_eq!(daily.total_sales, Money::from_cents(2500));
}
