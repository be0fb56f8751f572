use actix_web::{http::StatusCode, test::TestRequest};
use serde_json::Value;

use super::{
    helpers::{disabled_auth, prepare_db, seed_order, send_request},
    mocks::MockProvider,
};

#[actix_web::test]
async fn health_check() {
    let db = prepare_db().await;
    let req = TestRequest::get().uri("/health");
    let (status, body) = send_request(db, MockProvider::new(), disabled_auth(), req).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, "👍️\n");
}

#[actix_web::test]
async fn order_status_for_registered_order() {
    let db = prepare_db().await;
    let order = seed_order(&db, 1).await;
    let req = TestRequest::get().uri("/api/order/ORD-0001");
    let (status, body) = send_request(db, MockProvider::new(), disabled_auth(), req).await;
    assert_eq!(status, StatusCode::OK);
    let json: Value = serde_json::from_str(&body).expect("Body was not JSON");
    assert_eq!(json["order_number"], order.order_number.as_str());
    assert_eq!(json["status"], "Created");
    assert_eq!(json["package_name"], "100 credits");
    assert_eq!(json["credit_amount"], 100);
    // Internal ids and retry bookkeeping stay off the customer surface
    assert!(json.get("id").is_none());
    assert!(json.get("store_id").is_none());
}

#[actix_web::test]
async fn order_status_for_unknown_order_is_404() {
    let db = prepare_db().await;
    let req = TestRequest::get().uri("/api/order/ORD-9999");
    let (status, body) = send_request(db, MockProvider::new(), disabled_auth(), req).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    let json: Value = serde_json::from_str(&body).expect("Body was not JSON");
    assert!(json["error"].as_str().unwrap_or_default().contains("ORD-9999"));
}

#[actix_web::test]
async fn retry_stats_on_empty_queue() {
    let db = prepare_db().await;
    let req = TestRequest::get().uri("/api/retry/stats/2026/8");
    let (status, body) = send_request(db, MockProvider::new(), disabled_auth(), req).await;
    assert_eq!(status, StatusCode::OK);
    let json: Value = serde_json::from_str(&body).expect("Body was not JSON");
    assert_eq!(json["year"], 2026);
    assert_eq!(json["month"], 8);
    assert_eq!(json["retries"]["queue_depth"], 0);
    assert_eq!(json["cron_health"], "Ok");
}

#[actix_web::test]
async fn retry_stats_rejects_month_13() {
    let db = prepare_db().await;
    let req = TestRequest::get().uri("/api/retry/stats/2026/13");
    let (status, _) = send_request(db, MockProvider::new(), disabled_auth(), req).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[actix_web::test]
async fn recover_metrics_on_clean_month_touches_nothing() {
    let db = prepare_db().await;
    let req = TestRequest::post().uri("/api/metrics/recover/2026/7");
    let (status, body) = send_request(db, MockProvider::new(), disabled_auth(), req).await;
    assert_eq!(status, StatusCode::OK);
    let json: Value = serde_json::from_str(&body).expect("Body was not JSON");
    assert_eq!(json["year"], 2026);
    assert_eq!(json["month"], 7);
    assert_eq!(json["reprocessed"].as_array().map(Vec::len), Some(0));
}
