//! Shared scaffolding for the engine integration tests.
use std::{
    collections::VecDeque,
    sync::{Arc, Mutex},
};

use chrono::Duration;
use recharge_engine::{
    db_types::NewOrder,
    test_utils::prepare_env::{fresh_test_db, random_db_path},
    traits::{RechargeCallError, RechargeOutcome, RechargeProvider, RechargeRequest},
    OrderFlowApi,
    RetryOrchestrator,
    SqliteDatabase,
};
use rg_common::Money;

/// A provider whose responses are scripted in advance. Once the script runs out, every further
/// call succeeds.
#[derive(Default)]
pub struct ScriptedProvider {
    script: Mutex<VecDeque<Result<RechargeOutcome, RechargeCallError>>>,
    calls: Mutex<Vec<RechargeRequest>>,
}

impl ScriptedProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn then_fail(self, code: i64, message: &str) -> Self {
        self.script.lock().unwrap().push_back(Ok(RechargeOutcome::failure(code, message)));
        self
    }

    pub fn then_succeed(self) -> Self {
        self.script.lock().unwrap().push_back(Ok(RechargeOutcome::success()));
        self
    }

    pub fn then_transport_error(self, message: &str) -> Self {
        self.script.lock().unwrap().push_back(Err(RechargeCallError::Transport(message.to_string())));
        self
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }

    pub fn calls(&self) -> Vec<RechargeRequest> {
        self.calls.lock().unwrap().clone()
    }
}

impl RechargeProvider for ScriptedProvider {
    async fn send_recharge(&self, request: &RechargeRequest) -> Result<RechargeOutcome, RechargeCallError> {
        self.calls.lock().unwrap().push(request.clone());
        self.script.lock().unwrap().pop_front().unwrap_or_else(|| Ok(RechargeOutcome::success()))
    }
}

pub struct TestHarness {
    pub db: SqliteDatabase,
    pub provider: Arc<ScriptedProvider>,
    pub retry: Arc<RetryOrchestrator<SqliteDatabase, ScriptedProvider>>,
    pub flow: OrderFlowApi<SqliteDatabase, ScriptedProvider>,
}

/// Spins up a fresh database and the full order-flow/retry stack around the given provider.
pub async fn harness(provider: ScriptedProvider) -> TestHarness {
    let url = random_db_path();
    let db = fresh_test_db(&url).await;
    let provider = Arc::new(provider);
    let retry = Arc::new(RetryOrchestrator::new(db.clone(), Arc::clone(&provider), Duration::hours(1)));
    let flow = OrderFlowApi::new(db.clone(), Arc::clone(&retry));
    TestHarness { db, provider, retry, flow }
}

/// A representative order: 100 credits for 25.00, payable through external payment id `pay-{n}`.
pub fn sample_order(n: u64) -> NewOrder {
    NewOrder::new(format!("ORD-{n:04}"), 1, format!("cust-{n}"), format!("acct-{n}"))
        .with_package(7, "100 credits", 100)
        .with_price(Money::from_cents(2500), Money::from_cents(2500))
        .with_external_payment_id(format!("pay-{n}"))
}
