use crate::{
    entities::{
        checkout_intent::{Address, OrderDraft, OrderDraftItem},
        order::{self, PAYMENT_STATUS_PAID, STATUS_CONFIRMED},
        order_item,
    },
    errors::ServiceError,
};
use async_trait::async_trait;
use chrono::Utc;
use sea_orm::{ActiveModelTrait, DatabaseTransaction, Set};
use tracing::{error, info, instrument};
use uuid::Uuid;

/// Turns a checkout snapshot into a persisted order inside the caller's
/// transaction. Nothing is committed here.
#[async_trait]
pub trait OrderMaterializer: Send + Sync {
    async fn create_order_as_paid(
        &self,
        txn: &DatabaseTransaction,
        draft: &OrderDraft,
        items: &[OrderDraftItem],
        provider_order_id: &str,
        actor: Option<&str>,
    ) -> Result<order::Model, ServiceError>;
}

/// Writes `orders` and `order_items` rows straight from the draft.
#[derive(Debug, Clone, Default)]
pub struct DefaultOrderMaterializer;

pub fn order_number_for(order_id: Uuid) -> String {
    format!("ORD-{}", &order_id.simple().to_string()[..8].to_uppercase())
}

fn address_json(address: &Option<Address>) -> Result<Option<String>, ServiceError> {
    address
        .as_ref()
        .map(serde_json::to_string)
        .transpose()
        .map_err(ServiceError::from)
}

#[async_trait]
impl OrderMaterializer for DefaultOrderMaterializer {
    #[instrument(skip(self, txn, draft, items), fields(items = items.len()))]
    async fn create_order_as_paid(
        &self,
        txn: &DatabaseTransaction,
        draft: &OrderDraft,
        items: &[OrderDraftItem],
        provider_order_id: &str,
        actor: Option<&str>,
    ) -> Result<order::Model, ServiceError> {
        if items.is_empty() {
            return Err(ServiceError::InvalidOperation(
                "Cannot create an order without items".to_string(),
            ));
        }

        let now = Utc::now();
        let order_id = Uuid::new_v4();

        let order_model = order::ActiveModel {
            id: Set(order_id),
            order_number: Set(order_number_for(order_id)),
            customer_id: Set(draft.customer_id),
            customer_email: Set(draft.customer_email.clone()),
            status: Set(STATUS_CONFIRMED.to_string()),
            payment_status: Set(PAYMENT_STATUS_PAID.to_string()),
            currency: Set(draft.currency.trim().to_ascii_uppercase()),
            subtotal: Set(draft.subtotal),
            shipping_total: Set(draft.shipping_total),
            tax_total: Set(draft.tax_total),
            discount_total: Set(draft.discount_total),
            grand_total: Set(draft.grand_total),
            shipping_address: Set(address_json(&draft.shipping_address)?),
            billing_address: Set(address_json(&draft.billing_address)?),
            notes: Set(draft.notes.clone()),
            provider_order_id: Set(Some(provider_order_id.to_string())),
            paid_at: Set(None),
            created_by: Set(actor.map(str::to_string)),
            created_at: Set(now),
            updated_at: Set(None),
            version: Set(1),
        }
        .insert(txn)
        .await
        .map_err(|e| {
            error!(error = %e, order_id = %order_id, "Failed to insert order");
            ServiceError::DatabaseError(e)
        })?;

        for item in items {
            order_item::ActiveModel {
                id: Set(Uuid::new_v4()),
                order_id: Set(order_id),
                product_id: Set(item.product_id),
                sku: Set(item.sku.clone()),
                name: Set(item.name.clone()),
                quantity: Set(item.quantity),
                unit_price: Set(item.unit_price),
                total_price: Set(item.line_total),
                created_at: Set(now),
            }
            .insert(txn)
            .await?;
        }

        info!(
            order_id = %order_id,
            order_number = %order_model.order_number,
            "Order materialized from checkout"
        );
        Ok(order_model)
    }
}
