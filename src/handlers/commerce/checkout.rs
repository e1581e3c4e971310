use crate::handlers::common::{created_response, success_response, validate_input};
use crate::{
    entities::checkout_intent,
    errors::{ApiError, ServiceError},
    services::commerce::{
        CreateIntentInput, FinalizationOutcome, FinalizationSource, FinalizePayment,
    },
    ApiResponse, AppState,
};
use axum::{
    extract::{Json, Path, State},
    response::IntoResponse,
    routing::{get, post},
    Router,
};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use utoipa::ToSchema;
use uuid::Uuid;
use validator::Validate;

const VERIFY_ACTOR: &str = "checkout-verify";

/// Creates the router for checkout endpoints
pub fn checkout_routes() -> Router<AppState> {
    Router::new()
        .route("/verify", post(verify_payment))
        .route("/intents", post(create_intent))
        .route("/intents/:id", get(get_intent))
        .route("/intents/:id/verify", post(verify_intent_payment))
}

/// Payment confirmation relayed by the client after the checkout widget
/// reports success.
#[derive(Debug, Clone, Deserialize, Serialize, Validate, ToSchema)]
pub struct VerifyPaymentRequest {
    #[validate(length(min = 1, max = 64))]
    pub provider_order_id: String,
    #[validate(length(min = 1, max = 64))]
    pub provider_payment_id: String,
    #[validate(length(min = 1, max = 128))]
    pub provider_signature: String,
    /// Captured amount in major units; defaults to the order total
    #[serde(default)]
    pub amount: Option<Decimal>,
    #[serde(default)]
    pub currency: Option<String>,
    #[serde(default)]
    pub method: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum FinalizationStatus {
    Converted,
    AlreadyConverted,
    InFlight,
    Skipped,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct FinalizationResponse {
    pub status: FinalizationStatus,
    pub provider_order_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub order_id: Option<Uuid>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub order_number: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payment_id: Option<Uuid>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub amount: Option<Decimal>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub currency: Option<String>,
}

impl FinalizationResponse {
    fn bare(status: FinalizationStatus, provider_order_id: String) -> Self {
        Self {
            status,
            provider_order_id,
            order_id: None,
            order_number: None,
            payment_id: None,
            amount: None,
            currency: None,
        }
    }

    /// Maps an engine outcome to the client view. A payment id that belongs
    /// to another checkout is a client error.
    fn from_outcome(
        provider_order_id: String,
        outcome: FinalizationOutcome,
    ) -> Result<Self, ApiError> {
        let response = match outcome {
            FinalizationOutcome::Converted { order, payment } => Self {
                order_id: Some(order.id),
                order_number: Some(order.order_number),
                payment_id: Some(payment.id),
                amount: Some(payment.amount),
                currency: Some(payment.currency),
                ..Self::bare(FinalizationStatus::Converted, provider_order_id)
            },
            FinalizationOutcome::AlreadyConverted { payment } => match payment {
                Some(payment) => Self {
                    order_id: Some(payment.order_id),
                    payment_id: Some(payment.id),
                    amount: Some(payment.amount),
                    currency: Some(payment.currency),
                    ..Self::bare(FinalizationStatus::AlreadyConverted, provider_order_id)
                },
                None => Self::bare(FinalizationStatus::AlreadyConverted, provider_order_id),
            },
            FinalizationOutcome::InFlight => {
                Self::bare(FinalizationStatus::InFlight, provider_order_id)
            }
            FinalizationOutcome::Skipped { .. } => {
                Self::bare(FinalizationStatus::Skipped, provider_order_id)
            }
            FinalizationOutcome::PaymentAlreadyRecorded { .. } => {
                return Err(ServiceError::Conflict(
                    "payment is already recorded for another checkout".to_string(),
                )
                .into())
            }
        };
        Ok(response)
    }
}

/// Client view of a checkout intent.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct IntentResponse {
    pub id: Uuid,
    pub provider_order_id: Option<String>,
    /// Public key the checkout widget is opened with
    pub provider_key_id: String,
    pub status: String,
    pub amount_minor: i64,
    pub currency: String,
    pub active: bool,
    pub order_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    pub modified_at: DateTime<Utc>,
}

impl IntentResponse {
    fn new(intent: checkout_intent::Model, provider_key_id: &str) -> Self {
        Self {
            id: intent.id,
            provider_order_id: intent.provider_order_id,
            provider_key_id: provider_key_id.to_string(),
            status: intent.status,
            amount_minor: intent.amount_minor,
            currency: intent.currency,
            active: intent.active,
            order_id: intent.order_id,
            created_at: intent.created_at,
            modified_at: intent.modified_at,
        }
    }
}

fn finalize_request(payload: &VerifyPaymentRequest) -> FinalizePayment {
    FinalizePayment {
        provider_order_id: payload.provider_order_id.clone(),
        provider_payment_id: payload.provider_payment_id.clone(),
        captured_amount: payload.amount,
        currency: payload.currency.clone(),
        method: payload.method.clone(),
        source: FinalizationSource::Verify,
    }
}

fn check_signature(state: &AppState, payload: &VerifyPaymentRequest) -> Result<(), ApiError> {
    if state.services.signatures.verify_payment(
        &payload.provider_order_id,
        &payload.provider_payment_id,
        &payload.provider_signature,
    ) {
        Ok(())
    } else {
        warn!(
            provider_order_id = %payload.provider_order_id,
            "Payment signature verification failed"
        );
        Err(ApiError::Unauthorized)
    }
}

/// Verify a client-reported payment and finalize the checkout
#[utoipa::path(
    post,
    path = "/api/v1/checkout/verify",
    request_body = VerifyPaymentRequest,
    responses(
        (status = 200, description = "Checkout finalized or already finalized", body = ApiResponse<FinalizationResponse>),
        (status = 400, description = "Invalid request", body = crate::errors::ErrorResponse),
        (status = 401, description = "Invalid signature", body = crate::errors::ErrorResponse),
        (status = 404, description = "Unknown provider order", body = crate::errors::ErrorResponse),
        (status = 409, description = "Payment belongs to another checkout", body = crate::errors::ErrorResponse)
    ),
    tag = "Checkout"
)]
pub async fn verify_payment(
    State(state): State<AppState>,
    Json(payload): Json<VerifyPaymentRequest>,
) -> Result<impl IntoResponse, ApiError> {
    validate_input(&payload)?;
    check_signature(&state, &payload)?;

    if state
        .services
        .intents
        .find_by_provider_order_id(&payload.provider_order_id)
        .await?
        .is_none()
    {
        return Err(ApiError::NotFound(format!(
            "No checkout for provider order {}",
            payload.provider_order_id
        )));
    }

    let outcome = state
        .services
        .finalization
        .finalize(finalize_request(&payload), Some(VERIFY_ACTOR))
        .await?;
    info!(
        provider_order_id = %payload.provider_order_id,
        outcome = outcome.label(),
        "Checkout verify handled"
    );

    let response = FinalizationResponse::from_outcome(payload.provider_order_id, outcome)?;
    Ok(success_response(ApiResponse::success(response)))
}

/// Verify a payment against a known intent, binding the provider order id
/// when the intent was created without one
#[utoipa::path(
    post,
    path = "/api/v1/checkout/intents/{id}/verify",
    params(("id" = Uuid, Path, description = "Checkout intent id")),
    request_body = VerifyPaymentRequest,
    responses(
        (status = 200, description = "Checkout finalized or already finalized", body = ApiResponse<FinalizationResponse>),
        (status = 401, description = "Invalid signature", body = crate::errors::ErrorResponse),
        (status = 404, description = "Unknown intent", body = crate::errors::ErrorResponse),
        (status = 409, description = "Intent bound to a different provider order", body = crate::errors::ErrorResponse)
    ),
    tag = "Checkout"
)]
pub async fn verify_intent_payment(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(payload): Json<VerifyPaymentRequest>,
) -> Result<impl IntoResponse, ApiError> {
    validate_input(&payload)?;
    check_signature(&state, &payload)?;

    let outcome = state
        .services
        .finalization
        .finalize_by_intent_id(id, finalize_request(&payload), Some(VERIFY_ACTOR))
        .await?;

    let response = FinalizationResponse::from_outcome(payload.provider_order_id, outcome)?;
    Ok(success_response(ApiResponse::success(response)))
}

/// Reserve a checkout intent and create the provider order
#[utoipa::path(
    post,
    path = "/api/v1/checkout/intents",
    request_body = CreateIntentInput,
    responses(
        (status = 201, description = "Intent created", body = ApiResponse<IntentResponse>),
        (status = 400, description = "Invalid cart snapshot", body = crate::errors::ErrorResponse),
        (status = 502, description = "Payment provider unavailable", body = crate::errors::ErrorResponse)
    ),
    tag = "Checkout"
)]
pub async fn create_intent(
    State(state): State<AppState>,
    Json(payload): Json<CreateIntentInput>,
) -> Result<impl IntoResponse, ApiError> {
    validate_input(&payload)?;
    let actor = payload.draft.customer_email.clone();

    let intent = state
        .services
        .checkout_intents
        .create_intent(payload, actor.as_deref())
        .await?;

    Ok(created_response(ApiResponse::success(IntentResponse::new(
        intent,
        &state.config.payment.key_id,
    ))))
}

/// Fetch a checkout intent, used by clients polling for conversion
#[utoipa::path(
    get,
    path = "/api/v1/checkout/intents/{id}",
    params(("id" = Uuid, Path, description = "Checkout intent id")),
    responses(
        (status = 200, description = "Intent found", body = ApiResponse<IntentResponse>),
        (status = 404, description = "Intent not found", body = crate::errors::ErrorResponse)
    ),
    tag = "Checkout"
)]
pub async fn get_intent(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    let intent = state.services.checkout_intents.get_intent(id).await?;
    Ok(success_response(ApiResponse::success(IntentResponse::new(
        intent,
        &state.config.payment.key_id,
    ))))
}
