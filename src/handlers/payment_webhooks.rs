use crate::{
    entities::PaymentStatus,
    errors::{ApiError, ServiceError},
    handlers::common::{acknowledged, header_str},
    metrics,
    services::commerce::{FinalizationSource, FinalizePayment},
    webhooks::{EventKind, ProviderEvent},
    AppState,
};
use axum::{
    extract::State,
    http::HeaderMap,
    response::{IntoResponse, Response},
};
use bytes::Bytes;
use tracing::{error, info, warn};

const WEBHOOK_ACTOR: &str = "payment-webhook";

// POST /api/v1/payments/webhook
#[utoipa::path(
    post,
    path = "/api/v1/payments/webhook",
    request_body = String,
    responses(
        (status = 200, description = "Delivery accepted"),
        (status = 401, description = "Invalid signature", body = crate::errors::ErrorResponse),
        (status = 500, description = "Temporary failure; the provider should redeliver", body = crate::errors::ErrorResponse)
    ),
    tag = "Payments"
)]
pub async fn payment_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let signature = header_str(&headers, &state.config.payment.webhook_signature_header);
    if !state.services.signatures.verify_webhook(&body, signature) {
        warn!("Payment webhook signature verification failed");
        metrics::record_webhook("unknown", "unauthorized");
        return ApiError::Unauthorized.into_response();
    }

    // The signature covers the raw bytes, so parsing happens only after it checks out
    let event: ProviderEvent = match serde_json::from_slice(&body) {
        Ok(event) => event,
        Err(e) => {
            warn!(error = %e, "Ignoring malformed payment webhook");
            metrics::record_webhook("unknown", "malformed");
            return acknowledged();
        }
    };

    if event.kind() == EventKind::Unhandled {
        info!(event = %event.event, "Ignoring unhandled payment webhook event");
        metrics::record_webhook(&event.event, "ignored");
        return acknowledged();
    }

    let Some(capture) = event.capture() else {
        warn!(event = %event.event, "Payment webhook without order or payment id");
        metrics::record_webhook(&event.event, "malformed");
        return acknowledged();
    };

    if let Some(status) = capture.payment_status.as_deref() {
        if PaymentStatus::from_provider(status) != Some(PaymentStatus::Captured) {
            info!(
                event = %event.event,
                provider_payment_id = %capture.provider_payment_id,
                status,
                "Ignoring webhook for uncaptured payment"
            );
            metrics::record_webhook(&event.event, "ignored");
            return acknowledged();
        }
    }

    let currency = crate::money::normalize_currency(
        capture.currency.as_deref(),
        &state.config.checkout.default_currency,
    );
    let request = FinalizePayment {
        captured_amount: capture
            .amount_minor
            .map(|minor| crate::money::from_minor_units(minor, &currency)),
        provider_order_id: capture.provider_order_id,
        provider_payment_id: capture.provider_payment_id,
        currency: Some(currency),
        method: capture.method,
        source: FinalizationSource::Webhook,
    };

    match state
        .services
        .finalization
        .finalize(request, Some(WEBHOOK_ACTOR))
        .await
    {
        Ok(outcome) => {
            info!(event = %event.event, outcome = outcome.label(), "Payment webhook handled");
            metrics::record_webhook(&event.event, outcome.label());
            acknowledged()
        }
        Err(ServiceError::NotFound(msg)) => {
            info!(event = %event.event, %msg, "Payment webhook for unknown checkout");
            metrics::record_webhook(&event.event, "not_found");
            acknowledged()
        }
        Err(e) if e.is_transient() => {
            error!(event = %event.event, error = %e, "Payment webhook failed; provider will redeliver");
            metrics::record_webhook(&event.event, "retry");
            e.into_response()
        }
        Err(e) => {
            // Redelivering the same payload cannot succeed
            error!(event = %event.event, error = %e, "Payment webhook rejected");
            metrics::record_webhook(&event.event, "rejected");
            acknowledged()
        }
    }
}
