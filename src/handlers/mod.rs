pub mod commerce;
pub mod common;
pub mod payment_webhooks;

use crate::{
    config::AppConfig,
    db::DbPool,
    errors::ServiceError,
    events::EventSender,
    repositories::CheckoutIntentRepository,
    services::{
        commerce::{CheckoutFinalizationService, CheckoutIntentService},
        orders::{DefaultOrderMaterializer, OrderMaterializer},
        payment_gateway::{HttpPaymentGateway, PaymentGateway},
    },
    webhooks::SignatureVerifier,
};
use std::sync::Arc;

// Re-export AppState so handler modules can import it as crate::handlers::AppState
pub use crate::AppState;

/// Services layer that encapsulates business logic used by HTTP handlers
#[derive(Clone)]
pub struct AppServices {
    pub signatures: Arc<SignatureVerifier>,
    pub intents: CheckoutIntentRepository,
    pub checkout_intents: Arc<CheckoutIntentService>,
    pub finalization: Arc<CheckoutFinalizationService>,
}

impl AppServices {
    /// Wires the production collaborators: the HTTP gateway and the default
    /// order materializer.
    pub fn from_config(
        db_pool: Arc<DbPool>,
        event_sender: Arc<EventSender>,
        config: &AppConfig,
    ) -> Result<Self, ServiceError> {
        let gateway = Arc::new(HttpPaymentGateway::new(&config.payment)?);
        Ok(Self::new(
            db_pool,
            event_sender,
            config,
            gateway,
            Arc::new(DefaultOrderMaterializer),
        ))
    }

    pub fn new(
        db_pool: Arc<DbPool>,
        event_sender: Arc<EventSender>,
        config: &AppConfig,
        gateway: Arc<dyn PaymentGateway>,
        materializer: Arc<dyn OrderMaterializer>,
    ) -> Self {
        let signatures = Arc::new(SignatureVerifier::new(
            config.payment.key_secret.clone(),
            config.payment.webhook_secret.clone(),
        ));
        let checkout_intents = Arc::new(CheckoutIntentService::new(
            db_pool.clone(),
            gateway,
            event_sender.clone(),
            config.checkout.clone(),
        ));
        let finalization = Arc::new(CheckoutFinalizationService::new(
            db_pool.clone(),
            materializer,
            event_sender,
            config.checkout.clone(),
        ));

        Self {
            signatures,
            intents: CheckoutIntentRepository::new(db_pool),
            checkout_intents,
            finalization,
        }
    }
}
