use serde::Deserialize;

/// Webhook envelope sent by the payment provider.
///
/// Only the fields needed to finalize a checkout are modelled; everything
/// else in the delivery is ignored.
#[derive(Debug, Clone, Deserialize)]
pub struct ProviderEvent {
    pub event: String,
    #[serde(default)]
    pub payload: EventPayload,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct EventPayload {
    #[serde(default)]
    pub payment: Option<Wrapped<PaymentEntity>>,
    #[serde(default)]
    pub order: Option<Wrapped<OrderEntity>>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Wrapped<T> {
    pub entity: T,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PaymentEntity {
    pub id: String,
    #[serde(default)]
    pub order_id: Option<String>,
    /// Minor units
    #[serde(default)]
    pub amount: Option<i64>,
    #[serde(default)]
    pub currency: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub method: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct OrderEntity {
    pub id: String,
    #[serde(default)]
    pub amount_paid: Option<i64>,
    #[serde(default)]
    pub currency: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    PaymentCaptured,
    OrderPaid,
    Unhandled,
}

impl EventKind {
    pub fn parse(name: &str) -> Self {
        match name {
            "payment.captured" => EventKind::PaymentCaptured,
            "order.paid" => EventKind::OrderPaid,
            _ => EventKind::Unhandled,
        }
    }
}

/// A capture extracted from a handled event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CaptureDetails {
    pub provider_order_id: String,
    pub provider_payment_id: String,
    pub amount_minor: Option<i64>,
    pub currency: Option<String>,
    pub payment_status: Option<String>,
    pub method: Option<String>,
}

impl ProviderEvent {
    pub fn kind(&self) -> EventKind {
        EventKind::parse(&self.event)
    }

    /// Pulls the order/payment pair out of the payload. `None` when the
    /// payload lacks either identifier.
    pub fn capture(&self) -> Option<CaptureDetails> {
        let payment = &self.payload.payment.as_ref()?.entity;
        let order = self.payload.order.as_ref().map(|o| &o.entity);

        let provider_order_id = payment
            .order_id
            .clone()
            .or_else(|| order.map(|o| o.id.clone()))
            .filter(|id| !id.trim().is_empty())?;
        if payment.id.trim().is_empty() {
            return None;
        }

        Some(CaptureDetails {
            provider_order_id,
            provider_payment_id: payment.id.clone(),
            amount_minor: payment.amount.or_else(|| order.and_then(|o| o.amount_paid)),
            currency: payment
                .currency
                .clone()
                .or_else(|| order.and_then(|o| o.currency.clone())),
            payment_status: payment.status.clone(),
            method: payment.method.clone(),
        })
    }
}
