use std::sync::Arc;

use actix_web::{
    body::MessageBody,
    http::StatusCode,
    middleware::Logger,
    test,
    test::TestRequest,
    web,
    App,
};
use chrono::Duration;
use recharge_engine::{
    db_types::{NewOrder, Order},
    test_utils::prepare_env::{fresh_test_db, random_db_path},
    MetricsApi,
    OrderFlowApi,
    RetryOrchestrator,
    SqliteDatabase,
};
use rg_common::{Money, Secret};

use super::mocks::MockProvider;
use crate::{
    config::WebhookAuth,
    routes::{health, OrderByNumberRoute, RecoverMetricsRoute, RetryStatsRoute},
    webhook_routes::PaymentWebhookRoute,
};

pub fn disabled_auth() -> WebhookAuth {
    WebhookAuth { secret: Secret::default(), enabled: false }
}

pub fn auth_with_secret(secret: &str) -> WebhookAuth {
    WebhookAuth { secret: Secret::new(secret.to_string()), enabled: true }
}

pub async fn prepare_db() -> SqliteDatabase {
    let url = random_db_path();
    fresh_test_db(&url).await
}

pub async fn seed_order(db: &SqliteDatabase, n: u32) -> Order {
    let provider = Arc::new(MockProvider::new());
    let retry = Arc::new(RetryOrchestrator::new(db.clone(), provider, Duration::hours(1)));
    let flow = OrderFlowApi::new(db.clone(), retry);
    let new_order = NewOrder::new(format!("ORD-{n:04}"), 1, format!("cust-{n}"), format!("acct-{n}"))
        .with_package(7, "100 credits", 100)
        .with_price(Money::from(2500), Money::from(2500))
        .with_external_payment_id(format!("pay-{n}"));
    flow.process_new_order(new_order).await.expect("Could not seed order")
}

/// Builds the full route tree against a real database and a mocked provider, fires one request,
/// and returns the status and body. The service is rebuilt per call since mock expectations are
/// consumed.
pub async fn send_request(
    db: SqliteDatabase,
    provider: MockProvider,
    auth: WebhookAuth,
    req: TestRequest,
) -> (StatusCode, String) {
    let provider = Arc::new(provider);
    let retry = Arc::new(RetryOrchestrator::new(db.clone(), provider, Duration::hours(1)));
    let flow = OrderFlowApi::new(db.clone(), Arc::clone(&retry));
    let metrics = MetricsApi::new(db.clone());
    let app = App::new()
        .wrap(Logger::default())
        .app_data(web::Data::new(db))
        .app_data(web::Data::new(flow))
        .app_data(web::Data::new(metrics))
        .app_data(web::Data::from(Arc::clone(&retry)))
        .app_data(web::Data::new(auth))
        .service(health)
        .service(web::scope("/provider").service(PaymentWebhookRoute::<SqliteDatabase, MockProvider>::new()))
        .service(
            web::scope("/api")
                .service(OrderByNumberRoute::<SqliteDatabase>::new())
                .service(RetryStatsRoute::<SqliteDatabase, MockProvider>::new())
                .service(RecoverMetricsRoute::<SqliteDatabase>::new()),
        );
    let service = test::init_service(app).await;
    let res = test::call_service(&service, req.to_request()).await;
    let status = res.status();
    let body = actix_web::body::to_bytes(res.into_body())
        .await
        .map(|b| String::from_utf8_lossy(&b).into_owned())
        .unwrap_or_default();
    (status, body)
}

/// A webhook payload as the payment provider sends it.
pub fn webhook_payload(payment_id: &str, status: &str, amount: &str) -> String {
    serde_json::json!({
        "id": payment_id,
        "type": "payment.updated",
        "status": status,
        "amount": amount,
        "currency": "BRL",
        "created_at": "2026-08-01T12:00:00Z",
        "updated_at": "2026-08-01T12:00:05Z",
        "payer": { "name": "Ana Souza", "email": "ana@example.com", "document": "12345678900" },
        "payment_method": { "type": "pix", "details": {} }
    })
    .to_string()
}
