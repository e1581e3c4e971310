use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{info, warn};
use uuid::Uuid;

#[derive(Debug, Clone)]
pub struct EventSender {
    sender: mpsc::Sender<Event>,
}

impl EventSender {
    /// Creates a new EventSender
    pub fn new(sender: mpsc::Sender<Event>) -> Self {
        Self { sender }
    }

    /// Sends an event asynchronously
    pub async fn send(&self, event: Event) -> Result<(), String> {
        self.sender
            .send(event)
            .await
            .map_err(|e| format!("Failed to send event: {}", e))
    }

    /// Sends an event and logs instead of failing when the consumer is gone.
    pub async fn send_or_log(&self, event: Event) {
        let name = event.name();
        if let Err(e) = self.send(event).await {
            warn!(event = name, error = %e, "Dropping domain event");
        }
    }
}

/// Checkout lifecycle events.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Event {
    CheckoutIntentCreated {
        intent_id: Uuid,
        provider_order_id: Option<String>,
        amount_minor: i64,
        currency: String,
    },
    CheckoutFinalized {
        intent_id: Uuid,
        order_id: Uuid,
        payment_id: Uuid,
        provider_order_id: String,
        provider_payment_id: String,
        amount: Decimal,
        currency: String,
    },
    CheckoutReverted {
        intent_id: Uuid,
        provider_order_id: String,
        reason: String,
    },
}

impl Event {
    pub fn name(&self) -> &'static str {
        match self {
            Event::CheckoutIntentCreated { .. } => "checkout_intent_created",
            Event::CheckoutFinalized { .. } => "checkout_finalized",
            Event::CheckoutReverted { .. } => "checkout_reverted",
        }
    }
}

/// Drains the event channel until every sender is dropped.
pub async fn process_events(mut rx: mpsc::Receiver<Event>) {
    info!("Starting event processing loop");

    while let Some(event) = rx.recv().await {
        match &event {
            Event::CheckoutIntentCreated {
                intent_id,
                provider_order_id,
                amount_minor,
                currency,
            } => info!(
                %intent_id,
                provider_order_id = provider_order_id.as_deref().unwrap_or(""),
                amount_minor,
                %currency,
                "checkout intent created"
            ),
            Event::CheckoutFinalized {
                intent_id,
                order_id,
                provider_order_id,
                provider_payment_id,
                amount,
                currency,
                ..
            } => info!(
                %intent_id,
                %order_id,
                %provider_order_id,
                %provider_payment_id,
                %amount,
                %currency,
                "checkout finalized"
            ),
            Event::CheckoutReverted {
                intent_id,
                provider_order_id,
                reason,
            } => warn!(
                %intent_id,
                %provider_order_id,
                %reason,
                "checkout conversion reverted"
            ),
        }
    }

    info!("Event processing loop stopped");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn events_reach_the_receiver_in_order() {
        let (tx, mut rx) = mpsc::channel(4);
        let sender = EventSender::new(tx);
        let intent_id = Uuid::new_v4();

        sender
            .send(Event::CheckoutIntentCreated {
                intent_id,
                provider_order_id: Some("order_1".into()),
                amount_minor: 100,
                currency: "INR".into(),
            })
            .await
            .unwrap();
        sender
            .send(Event::CheckoutReverted {
                intent_id,
                provider_order_id: "order_1".into(),
                reason: "boom".into(),
            })
            .await
            .unwrap();

        assert_eq!(rx.recv().await.map(|e| e.name()), Some("checkout_intent_created"));
        assert_eq!(rx.recv().await.map(|e| e.name()), Some("checkout_reverted"));
    }

    #[tokio::test]
    async fn closed_channel_is_reported_not_panicked() {
        let (tx, rx) = mpsc::channel(1);
        drop(rx);
        let sender = EventSender::new(tx);
        let event = Event::CheckoutReverted {
            intent_id: Uuid::new_v4(),
            provider_order_id: "order_x".into(),
            reason: "r".into(),
        };

        assert!(sender.send(event.clone()).await.is_err());
        sender.send_or_log(event).await;
    }
}
