use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

#[derive(OpenApi)]
#[openapi(
    info(
        title = "Storefront API",
        version = "1.0.0",
        description = r#"
# Storefront Checkout API

Converts paid checkouts into orders.

## Flow

1. `POST /checkout/intents` reserves a checkout and creates the provider order.
2. The client pays through the provider's checkout widget.
3. Either the client relays the signed result to `POST /checkout/verify`, or
   the provider delivers a signed webhook to `POST /payments/webhook`.
   Whichever arrives first creates the order; the other is a no-op.

## Signatures

Client confirmations carry `HMAC-SHA256(key_secret, "<order_id>|<payment_id>")`
as lowercase hex. Webhooks are signed over the raw request body with the
webhook secret and sent in the `X-Razorpay-Signature` header.

## Error Handling

```json
{
  "error": "Unauthorized",
  "message": "Invalid signature",
  "request_id": "req-abc123xyz",
  "timestamp": "2024-01-01T00:00:00Z"
}
```
        "#,
        license(
            name = "MIT",
            url = "https://opensource.org/licenses/MIT"
        )
    ),
    servers(
        (url = "http://localhost:8080", description = "Local development")
    ),
    tags(
        (name = "Checkout", description = "Checkout intents and payment verification"),
        (name = "Payments", description = "Payment provider webhooks")
    ),
    paths(
        crate::handlers::commerce::checkout::verify_payment,
        crate::handlers::commerce::checkout::verify_intent_payment,
        crate::handlers::commerce::checkout::create_intent,
        crate::handlers::commerce::checkout::get_intent,
        crate::handlers::payment_webhooks::payment_webhook,
    ),
    components(
        schemas(
            crate::ApiResponse<serde_json::Value>,
            crate::handlers::commerce::checkout::VerifyPaymentRequest,
            crate::handlers::commerce::checkout::FinalizationResponse,
            crate::handlers::commerce::checkout::FinalizationStatus,
            crate::handlers::commerce::checkout::IntentResponse,
            crate::services::commerce::CreateIntentInput,
            crate::entities::OrderDraft,
            crate::entities::OrderDraftItem,
            crate::entities::Address,
            crate::entities::IntentStatus,
            crate::errors::ErrorResponse
        )
    )
)]
pub struct ApiDocV1;

pub fn swagger_ui() -> SwaggerUi {
    SwaggerUi::new("/swagger-ui")
        .url("/api-docs/openapi.json", ApiDocV1::openapi())
        .config(utoipa_swagger_ui::Config::from("/api-docs/openapi.json").try_it_out_enabled(true))
}
