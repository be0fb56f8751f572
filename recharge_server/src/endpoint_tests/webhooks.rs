use actix_web::{http::StatusCode, test::TestRequest};
use recharge_engine::{
    db_types::{OrderStatus, RechargeStatus},
    traits::{FulfillmentDatabase, RechargeOutcome},
};
use serde_json::Value;

use super::{
    helpers::{auth_with_secret, disabled_auth, prepare_db, seed_order, send_request, webhook_payload},
    mocks::MockProvider,
};

const WEBHOOK_URI: &str = "/provider/webhook/payment";

fn post_webhook(body: &str) -> TestRequest {
    TestRequest::post().uri(WEBHOOK_URI).insert_header(("Content-Type", "application/json")).set_payload(body.to_string())
}

#[actix_web::test]
async fn approved_payment_fulfills_the_order() {
    let db = prepare_db().await;
    let order = seed_order(&db, 1).await;
    let mut provider = MockProvider::new();
    provider.expect_send_recharge().times(1).returning(|_| Ok(RechargeOutcome::success()));
    let body = webhook_payload("pay-1", "APPROVED", "25.00");
    let (status, response) = send_request(db.clone(), provider, disabled_auth(), post_webhook(&body)).await;
    assert_eq!(status, StatusCode::OK);
    let json: Value = serde_json::from_str(&response).expect("Body was not JSON");
    assert_eq!(json["success"], true);
    assert_eq!(json["message"], "Order ORD-0001 fulfilled");
    let order = db.fetch_order_by_id(order.id).await.unwrap().unwrap();
    assert_eq!(order.status, OrderStatus::Completed);
    let recharge = db.fetch_recharge_for_order(order.id).await.unwrap().unwrap();
    assert_eq!(recharge.status, RechargeStatus::Approved);
}

#[actix_web::test]
async fn approved_payment_with_busy_provider_is_accepted_pending_retry() {
    let db = prepare_db().await;
    let order = seed_order(&db, 2).await;
    let mut provider = MockProvider::new();
    provider
        .expect_send_recharge()
        .times(1)
        .returning(|_| Ok(RechargeOutcome::failure(2001, "provider busy")));
    let body = webhook_payload("pay-2", "APPROVED", "25.00");
    let (status, response) = send_request(db.clone(), provider, disabled_auth(), post_webhook(&body)).await;
    assert_eq!(status, StatusCode::OK);
    let json: Value = serde_json::from_str(&response).expect("Body was not JSON");
    assert_eq!(json["success"], true);
    assert_eq!(json["message"], "Order ORD-0002 accepted, recharge pending");
    let recharge = db.fetch_recharge_for_order(order.id).await.unwrap().unwrap();
    assert_eq!(recharge.status, RechargeStatus::RetryPending);
}

#[actix_web::test]
async fn rejected_payment_annuls_the_order() {
    let db = prepare_db().await;
    let order = seed_order(&db, 3).await;
    let body = webhook_payload("pay-3", "REJECTED", "25.00");
    let (status, response) = send_request(db.clone(), MockProvider::new(), disabled_auth(), post_webhook(&body)).await;
    assert_eq!(status, StatusCode::OK);
    let json: Value = serde_json::from_str(&response).expect("Body was not JSON");
    assert_eq!(json["success"], true);
    assert_eq!(json["message"], "Order ORD-0003 annulled");
    let order = db.fetch_order_by_id(order.id).await.unwrap().unwrap();
    assert_eq!(order.status, OrderStatus::Expired);
}

#[actix_web::test]
async fn event_for_unknown_payment_is_acknowledged() {
    let db = prepare_db().await;
    let body = webhook_payload("pay-nobody-knows", "APPROVED", "10.00");
    let (status, response) = send_request(db, MockProvider::new(), disabled_auth(), post_webhook(&body)).await;
    assert_eq!(status, StatusCode::OK);
    let json: Value = serde_json::from_str(&response).expect("Body was not JSON");
    assert_eq!(json["success"], true);
    assert_eq!(json["message"], "Unknown payment acknowledged");
}

#[actix_web::test]
async fn malformed_payload_is_a_bad_request() {
    let db = prepare_db().await;
    let (status, _) = send_request(db, MockProvider::new(), disabled_auth(), post_webhook("{not json")).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[actix_web::test]
async fn webhook_without_signature_is_forbidden_when_checks_are_on() {
    let db = prepare_db().await;
    seed_order(&db, 4).await;
    let body = webhook_payload("pay-4", "APPROVED", "25.00");
    let (status, _) = send_request(db, MockProvider::new(), auth_with_secret("topsecret"), post_webhook(&body)).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
}

#[actix_web::test]
async fn webhook_with_bad_signature_is_forbidden() {
    let db = prepare_db().await;
    seed_order(&db, 5).await;
    let body = webhook_payload("pay-5", "APPROVED", "25.00");
    let req = post_webhook(&body).insert_header(("X-Rgw-Signature", "bm90IGEgcmVhbCBzaWduYXR1cmU="));
    let (status, _) = send_request(db, MockProvider::new(), auth_with_secret("topsecret"), req).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
}

#[actix_web::test]
async fn webhook_with_valid_signature_is_processed() {
    let db = prepare_db().await;
    let order = seed_order(&db, 6).await;
    let mut provider = MockProvider::new();
    provider.expect_send_recharge().times(1).returning(|_| Ok(RechargeOutcome::success()));
    let body = webhook_payload("pay-6", "APPROVED", "25.00");
    let signature = recharge_client::sign_payload("topsecret", body.as_bytes());
    let req = post_webhook(&body).insert_header(("X-Rgw-Signature", signature));
    let (status, _) = send_request(db.clone(), provider, auth_with_secret("topsecret"), req).await;
    assert_eq!(status, StatusCode::OK);
    let order = db.fetch_order_by_id(order.id).await.unwrap().unwrap();
    assert_eq!(order.status, OrderStatus::Completed);
}
