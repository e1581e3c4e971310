use crate::{
    config::CheckoutConfig,
    entities::checkout_intent::{self, IntentStatus, OrderDraft, OrderDraftItem},
    errors::ServiceError,
    events::{Event, EventSender},
    money,
    repositories::CheckoutIntentRepository,
    services::payment_gateway::{CreateProviderOrder, PaymentGateway},
};
use chrono::Utc;
use sea_orm::{DatabaseConnection, Set};
use serde::{Deserialize, Serialize};
use std::{collections::BTreeMap, sync::Arc};
use tracing::{error, info, instrument};
use utoipa::ToSchema;
use uuid::Uuid;
use validator::Validate;

/// Cart snapshot submitted when the shopper proceeds to payment.
#[derive(Debug, Clone, Serialize, Deserialize, Validate, ToSchema)]
pub struct CreateIntentInput {
    #[validate]
    pub draft: OrderDraft,
    #[validate]
    pub items: Vec<OrderDraftItem>,
}

/// Reserves checkout intents and registers them with the payment provider.
#[derive(Clone)]
pub struct CheckoutIntentService {
    db: Arc<DatabaseConnection>,
    intents: CheckoutIntentRepository,
    gateway: Arc<dyn PaymentGateway>,
    event_sender: Arc<EventSender>,
    config: CheckoutConfig,
}

impl CheckoutIntentService {
    pub fn new(
        db: Arc<DatabaseConnection>,
        gateway: Arc<dyn PaymentGateway>,
        event_sender: Arc<EventSender>,
        config: CheckoutConfig,
    ) -> Self {
        Self {
            intents: CheckoutIntentRepository::new(db.clone()),
            db,
            gateway,
            event_sender,
            config,
        }
    }

    /// Persists a `PENDING` intent and creates the matching provider order.
    ///
    /// The intent is stored before the provider is called, so a provider
    /// failure leaves an intent without a provider order id behind rather
    /// than a provider order nobody knows about.
    #[instrument(skip(self, input), fields(items = input.items.len()))]
    pub async fn create_intent(
        &self,
        input: CreateIntentInput,
        actor: Option<&str>,
    ) -> Result<checkout_intent::Model, ServiceError> {
        input.validate()?;
        if input.items.is_empty() {
            return Err(ServiceError::ValidationError(
                "items: at least one item is required".to_string(),
            ));
        }

        let currency =
            money::normalize_currency(Some(&input.draft.currency), &self.config.default_currency);
        let amount_minor = money::to_minor_units(input.draft.grand_total, &currency)
            .filter(|amount| *amount > 0)
            .ok_or_else(|| {
                ServiceError::InvalidInput(format!(
                    "grand_total {} is not a valid {} amount",
                    input.draft.grand_total, currency
                ))
            })?;

        let now = Utc::now();
        let intent_id = Uuid::new_v4();
        let intent = self
            .intents
            .insert(
                &*self.db,
                checkout_intent::ActiveModel {
                    id: Set(intent_id),
                    provider_order_id: Set(None),
                    provider_payment_id: Set(None),
                    status: Set(IntentStatus::Pending.as_str().to_string()),
                    order_draft: Set(serde_json::to_value(&input.draft)?),
                    items: Set(serde_json::to_value(&input.items)?),
                    amount_minor: Set(amount_minor),
                    currency: Set(currency.clone()),
                    active: Set(true),
                    order_id: Set(None),
                    created_by: Set(actor.map(str::to_string)),
                    modified_by: Set(actor.map(str::to_string)),
                    created_at: Set(now),
                    modified_at: Set(now),
                },
            )
            .await?;

        let mut notes = BTreeMap::new();
        notes.insert("intent_id".to_string(), intent_id.to_string());
        if let Some(actor) = actor {
            notes.insert("created_by".to_string(), actor.to_string());
        }

        let provider_order = self
            .gateway
            .create_order(&CreateProviderOrder {
                amount: amount_minor,
                currency: currency.clone(),
                receipt: format!("{}_{}", self.config.receipt_prefix, intent_id.simple()),
                notes,
                payment_capture: 1,
            })
            .await
            .map_err(|e| {
                error!(intent_id = %intent_id, error = %e, "Provider order creation failed");
                e
            })?;

        let mut active: checkout_intent::ActiveModel = intent.into();
        active.provider_order_id = Set(Some(provider_order.id.clone()));
        active.modified_at = Set(Utc::now());
        let intent = self.intents.save(&*self.db, active).await?;

        info!(
            intent_id = %intent.id,
            provider_order_id = %provider_order.id,
            amount_minor,
            "Checkout intent created"
        );

        self.event_sender
            .send_or_log(Event::CheckoutIntentCreated {
                intent_id: intent.id,
                provider_order_id: intent.provider_order_id.clone(),
                amount_minor,
                currency,
            })
            .await;

        Ok(intent)
    }

    pub async fn get_intent(&self, id: Uuid) -> Result<checkout_intent::Model, ServiceError> {
        self.intents
            .find_by_id(id)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("checkout intent {}", id)))
    }
}
