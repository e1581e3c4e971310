mod common;

use std::sync::Arc;

use axum::http::{Method, StatusCode};
use common::{assert_status, response_json, FailingMaterializer, TestApp, SIGNATURE_HEADER};
use rust_decimal_macros::dec;
use serde_json::{json, Value};

const WEBHOOK_URI: &str = "/api/v1/payments/webhook";

fn captured_event(provider_order_id: &str, provider_payment_id: &str, amount_minor: i64) -> Value {
    json!({
        "entity": "event",
        "event": "payment.captured",
        "contains": ["payment"],
        "payload": {
            "payment": {
                "entity": {
                    "id": provider_payment_id,
                    "entity": "payment",
                    "order_id": provider_order_id,
                    "amount": amount_minor,
                    "currency": "INR",
                    "status": "captured",
                    "method": "upi"
                }
            }
        },
        "created_at": 1_767_225_600
    })
}

async fn deliver(app: &TestApp, event: &Value) -> axum::response::Response {
    let body = serde_json::to_vec(event).unwrap();
    let signature = TestApp::webhook_signature(&body);
    app.post_raw(WEBHOOK_URI, body, &[(SIGNATURE_HEADER, signature.as_str())])
        .await
}

#[tokio::test]
async fn captured_payment_converts_checkout() {
    let app = TestApp::new().await;
    let intent = app.seed_intent("order_W1", dec!(1500)).await;

    let response = deliver(&app, &captured_event("order_W1", "pay_W1", 149_900)).await;
    assert_status(&response, StatusCode::OK);

    let payments = app.payments_for_provider_order("order_W1").await;
    assert_eq!(payments.len(), 1);
    assert_eq!(payments[0].amount, dec!(1499));
    assert_eq!(payments[0].currency, "INR");
    assert_eq!(payments[0].method.as_deref(), Some("upi"));

    let stored = app.intent(intent.id).await;
    assert_eq!(stored.status, "CONVERTED");
    assert_eq!(stored.modified_by.as_deref(), Some("payment-webhook"));
}

#[tokio::test]
async fn redelivery_is_acknowledged_once_applied() {
    let app = TestApp::new().await;
    app.seed_intent("order_W2", dec!(100)).await;
    let event = captured_event("order_W2", "pay_W2", 10_000);

    for _ in 0..3 {
        let response = deliver(&app, &event).await;
        assert_status(&response, StatusCode::OK);
    }

    assert_eq!(app.order_count().await, 1);
    assert_eq!(app.payment_count().await, 1);
}

#[tokio::test]
async fn webhook_after_client_verify_is_a_no_op() {
    let app = TestApp::new().await;
    app.seed_intent("order_W3", dec!(100)).await;

    let verified = app
        .request(
            Method::POST,
            "/api/v1/checkout/verify",
            Some(json!({
                "provider_order_id": "order_W3",
                "provider_payment_id": "pay_W3",
                "provider_signature": TestApp::payment_signature("order_W3", "pay_W3")
            })),
        )
        .await;
    assert_status(&verified, StatusCode::OK);

    let response = deliver(&app, &captured_event("order_W3", "pay_W3", 10_000)).await;
    assert_status(&response, StatusCode::OK);

    assert_eq!(app.order_count().await, 1);
    assert_eq!(app.payment_count().await, 1);
}

#[tokio::test]
async fn bad_signature_is_unauthorized() {
    let app = TestApp::new().await;
    let intent = app.seed_intent("order_W4", dec!(100)).await;

    let body = serde_json::to_vec(&captured_event("order_W4", "pay_W4", 10_000)).unwrap();
    let forged = TestApp::webhook_signature(b"some other body");
    let response = app
        .post_raw(WEBHOOK_URI, body.clone(), &[(SIGNATURE_HEADER, forged.as_str())])
        .await;
    assert_status(&response, StatusCode::UNAUTHORIZED);

    let unsigned = app.post_raw(WEBHOOK_URI, body, &[]).await;
    assert_status(&unsigned, StatusCode::UNAUTHORIZED);

    assert_eq!(app.order_count().await, 0);
    assert_eq!(app.intent(intent.id).await.status, "PENDING");
}

#[tokio::test]
async fn signature_covers_exact_bytes() {
    let app = TestApp::new().await;
    app.seed_intent("order_W5", dec!(100)).await;

    let compact = serde_json::to_vec(&captured_event("order_W5", "pay_W5", 10_000)).unwrap();
    let signature = TestApp::webhook_signature(&compact);
    let pretty = serde_json::to_vec_pretty(&captured_event("order_W5", "pay_W5", 10_000)).unwrap();

    let response = app
        .post_raw(WEBHOOK_URI, pretty, &[(SIGNATURE_HEADER, signature.as_str())])
        .await;
    assert_status(&response, StatusCode::UNAUTHORIZED);
    assert_eq!(app.order_count().await, 0);
}

#[tokio::test]
async fn signed_but_malformed_payload_is_acknowledged() {
    let app = TestApp::new().await;

    let body = b"{not json".to_vec();
    let signature = TestApp::webhook_signature(&body);
    let response = app
        .post_raw(WEBHOOK_URI, body, &[(SIGNATURE_HEADER, signature.as_str())])
        .await;

    assert_status(&response, StatusCode::OK);
    assert_eq!(response_json(response).await, Value::Null);
}

#[tokio::test]
async fn unhandled_event_is_acknowledged_and_ignored() {
    let app = TestApp::new().await;
    app.seed_intent("order_W6", dec!(100)).await;

    let mut event = captured_event("order_W6", "pay_W6", 10_000);
    event["event"] = json!("refund.created");

    let response = deliver(&app, &event).await;
    assert_status(&response, StatusCode::OK);
    assert_eq!(app.order_count().await, 0);
}

#[tokio::test]
async fn event_without_identifiers_is_acknowledged() {
    let app = TestApp::new().await;

    let response = deliver(
        &app,
        &json!({ "event": "payment.captured", "payload": {} }),
    )
    .await;
    assert_status(&response, StatusCode::OK);
}

#[tokio::test]
async fn uncaptured_payment_is_ignored() {
    let app = TestApp::new().await;
    let intent = app.seed_intent("order_W7", dec!(100)).await;

    let mut event = captured_event("order_W7", "pay_W7", 10_000);
    event["payload"]["payment"]["entity"]["status"] = json!("authorized");

    let response = deliver(&app, &event).await;
    assert_status(&response, StatusCode::OK);
    assert_eq!(app.order_count().await, 0);
    assert_eq!(app.intent(intent.id).await.status, "PENDING");
}

#[tokio::test]
async fn unknown_checkout_is_acknowledged() {
    let app = TestApp::new().await;

    let response = deliver(&app, &captured_event("order_nobody", "pay_W8", 500)).await;
    assert_status(&response, StatusCode::OK);
    assert_eq!(app.payment_count().await, 0);
}

#[tokio::test]
async fn order_paid_event_converts_through_order_entity() {
    let app = TestApp::new().await;
    app.seed_intent("order_W9", dec!(250)).await;

    let response = deliver(
        &app,
        &json!({
            "event": "order.paid",
            "payload": {
                "payment": { "entity": { "id": "pay_W9", "status": "captured" } },
                "order": { "entity": { "id": "order_W9", "amount_paid": 25_000, "currency": "INR" } }
            }
        }),
    )
    .await;
    assert_status(&response, StatusCode::OK);

    let payments = app.payments_for_provider_order("order_W9").await;
    assert_eq!(payments.len(), 1);
    assert_eq!(payments[0].amount, dec!(250));
}

#[tokio::test]
async fn transient_failure_asks_provider_to_redeliver() {
    let app = TestApp::with_materializer(Arc::new(FailingMaterializer)).await;
    let intent = app.seed_intent("order_W10", dec!(100)).await;

    let response = deliver(&app, &captured_event("order_W10", "pay_W10", 10_000)).await;
    assert!(response.status().is_server_error());

    assert_eq!(app.order_count().await, 0);
    assert_eq!(app.intent(intent.id).await.status, "PENDING");
}
