mod common;

use axum::http::{Method, StatusCode};
use chrono::Utc;
use common::{assert_status, response_json, TestApp};
use rust_decimal_macros::dec;
use serde_json::{json, Value};
use uuid::Uuid;

fn verify_body(provider_order_id: &str, provider_payment_id: &str) -> Value {
    json!({
        "provider_order_id": provider_order_id,
        "provider_payment_id": provider_payment_id,
        "provider_signature": TestApp::payment_signature(provider_order_id, provider_payment_id),
        "method": "card"
    })
}

#[tokio::test]
async fn verify_converts_then_reports_already_converted() {
    let app = TestApp::new().await;
    let intent = app.seed_intent("order_V1", dec!(1500)).await;

    let response = app
        .request(
            Method::POST,
            "/api/v1/checkout/verify",
            Some(verify_body("order_V1", "pay_V1")),
        )
        .await;
    assert_status(&response, StatusCode::OK);
    let body = response_json(response).await;
    assert_eq!(body["success"], true);
    assert_eq!(body["data"]["status"], "converted");
    assert_eq!(body["data"]["provider_order_id"], "order_V1");
    assert!(body["data"]["order_number"]
        .as_str()
        .unwrap()
        .starts_with("ORD-"));
    let order_id = body["data"]["order_id"].as_str().unwrap().to_string();

    let repeat = app
        .request(
            Method::POST,
            "/api/v1/checkout/verify",
            Some(verify_body("order_V1", "pay_V1")),
        )
        .await;
    assert_status(&repeat, StatusCode::OK);
    let body = response_json(repeat).await;
    assert_eq!(body["data"]["status"], "already_converted");
    assert_eq!(body["data"]["order_id"], order_id.as_str());

    assert_eq!(app.order_count().await, 1);
    assert_eq!(app.payment_count().await, 1);
    assert_eq!(app.intent(intent.id).await.status, "CONVERTED");
}

#[tokio::test]
async fn verify_rejects_bad_signature_without_touching_state() {
    let app = TestApp::new().await;
    let intent = app.seed_intent("order_V2", dec!(99)).await;

    let mut body = verify_body("order_V2", "pay_V2");
    body["provider_signature"] = json!(TestApp::payment_signature("order_V2", "pay_other"));

    let response = app
        .request(Method::POST, "/api/v1/checkout/verify", Some(body))
        .await;
    assert_status(&response, StatusCode::UNAUTHORIZED);
    let body = response_json(response).await;
    assert_eq!(body["message"], "Invalid signature");

    assert_eq!(app.order_count().await, 0);
    assert_eq!(app.intent(intent.id).await.status, "PENDING");
}

#[tokio::test]
async fn verify_for_unknown_order_is_not_found() {
    let app = TestApp::new().await;

    let response = app
        .request(
            Method::POST,
            "/api/v1/checkout/verify",
            Some(verify_body("order_ghost", "pay_ghost")),
        )
        .await;
    assert_status(&response, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn verify_requires_all_identifiers() {
    let app = TestApp::new().await;

    let response = app
        .request(
            Method::POST,
            "/api/v1/checkout/verify",
            Some(json!({
                "provider_order_id": "order_V3",
                "provider_payment_id": "",
                "provider_signature": "abc"
            })),
        )
        .await;
    assert_status(&response, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn verify_with_payment_from_another_checkout_conflicts() {
    let app = TestApp::new().await;
    app.seed_intent("order_V4", dec!(10)).await;
    let other = app.seed_intent("order_V5", dec!(10)).await;

    let first = app
        .request(
            Method::POST,
            "/api/v1/checkout/verify",
            Some(verify_body("order_V4", "pay_V4")),
        )
        .await;
    assert_status(&first, StatusCode::OK);

    let reused = app
        .request(
            Method::POST,
            "/api/v1/checkout/verify",
            Some(verify_body("order_V5", "pay_V4")),
        )
        .await;
    assert_status(&reused, StatusCode::CONFLICT);
    assert_eq!(app.intent(other.id).await.status, "PENDING");
    assert_eq!(app.order_count().await, 1);
}

#[tokio::test]
async fn verify_reports_in_flight_conversion() {
    let app = TestApp::new().await;
    app.seed_intent_with(Some("order_V6"), "CONVERTING", dec!(10), Utc::now())
        .await;

    let response = app
        .request(
            Method::POST,
            "/api/v1/checkout/verify",
            Some(verify_body("order_V6", "pay_V6")),
        )
        .await;
    assert_status(&response, StatusCode::OK);
    let body = response_json(response).await;
    assert_eq!(body["data"]["status"], "in_flight");
    assert!(body["data"].get("order_id").is_none());
}

#[tokio::test]
async fn create_intent_registers_provider_order() {
    let app = TestApp::new().await;

    let response = app
        .request(
            Method::POST,
            "/api/v1/checkout/intents",
            Some(json!({
                "draft": {
                    "currency": "inr",
                    "subtotal": "1400.00",
                    "shipping_total": "100.00",
                    "grand_total": "1500.00",
                    "customer_email": "asha@example.com"
                },
                "items": [{
                    "sku": "TEA-250",
                    "name": "Assam tea 250g",
                    "quantity": 2,
                    "unit_price": "700.00",
                    "line_total": "1400.00"
                }]
            })),
        )
        .await;
    assert_status(&response, StatusCode::CREATED);
    let body = response_json(response).await;
    let data = &body["data"];
    assert_eq!(data["status"], "PENDING");
    assert_eq!(data["amount_minor"], 150_000);
    assert_eq!(data["currency"], "INR");
    assert_eq!(data["provider_key_id"], "rzp_test_key");
    assert_eq!(data["provider_order_id"], "order_stub0001");
    assert_eq!(app.gateway.orders_created(), 1);

    let id = data["id"].as_str().unwrap();
    let fetched = app
        .request(Method::GET, &format!("/api/v1/checkout/intents/{id}"), None)
        .await;
    assert_status(&fetched, StatusCode::OK);
    let fetched = response_json(fetched).await;
    assert_eq!(fetched["data"]["provider_order_id"], "order_stub0001");
}

#[tokio::test]
async fn create_intent_rejects_empty_cart() {
    let app = TestApp::new().await;

    let response = app
        .request(
            Method::POST,
            "/api/v1/checkout/intents",
            Some(json!({
                "draft": { "currency": "INR", "subtotal": 10, "grand_total": 10 },
                "items": []
            })),
        )
        .await;
    assert_status(&response, StatusCode::BAD_REQUEST);
    assert_eq!(app.gateway.orders_created(), 0);
}

#[tokio::test]
async fn unknown_intent_is_not_found() {
    let app = TestApp::new().await;
    let response = app
        .request(
            Method::GET,
            &format!("/api/v1/checkout/intents/{}", Uuid::new_v4()),
            None,
        )
        .await;
    assert_status(&response, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn verify_by_intent_id_binds_and_converts() {
    let app = TestApp::new().await;
    let intent = app
        .seed_intent_with(None, "PENDING", dec!(75), Utc::now())
        .await;

    let response = app
        .request(
            Method::POST,
            &format!("/api/v1/checkout/intents/{}/verify", intent.id),
            Some(verify_body("order_I1", "pay_I1")),
        )
        .await;
    assert_status(&response, StatusCode::OK);
    let body = response_json(response).await;
    assert_eq!(body["data"]["status"], "converted");

    let stored = app.intent(intent.id).await;
    assert_eq!(stored.provider_order_id.as_deref(), Some("order_I1"));

    let mismatched = app
        .request(
            Method::POST,
            &format!("/api/v1/checkout/intents/{}/verify", intent.id),
            Some(verify_body("order_I2", "pay_I2")),
        )
        .await;
    assert_status(&mismatched, StatusCode::CONFLICT);
}

#[tokio::test]
async fn verify_by_intent_id_with_provider_order_of_another_intent_conflicts() {
    let app = TestApp::new().await;
    app.seed_intent("order_I3", dec!(75)).await;
    let unbound = app
        .seed_intent_with(None, "PENDING", dec!(75), Utc::now())
        .await;

    let response = app
        .request(
            Method::POST,
            &format!("/api/v1/checkout/intents/{}/verify", unbound.id),
            Some(verify_body("order_I3", "pay_I3")),
        )
        .await;
    assert_status(&response, StatusCode::CONFLICT);
    assert_eq!(app.intent(unbound.id).await.provider_order_id, None);
    assert_eq!(app.order_count().await, 0);
}

#[tokio::test]
async fn health_reports_database() {
    let app = TestApp::new().await;
    let response = app.request(Method::GET, "/api/v1/health", None).await;
    assert_status(&response, StatusCode::OK);
    let body = response_json(response).await;
    assert_eq!(body["data"]["checks"]["database"], "healthy");
}
