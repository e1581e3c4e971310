use crate::{
    entities::{
        order::{self, Entity as Order, PAYMENT_STATUS_PAID, STATUS_CONFIRMED},
        payment::{self, Entity as Payment, PaymentStatus},
    },
    errors::ServiceError,
};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, DatabaseConnection, EntityTrait,
    QueryFilter, Set, SqlErr,
};
use std::sync::Arc;
use tracing::{info, instrument};
use uuid::Uuid;

/// A captured payment about to be written to the ledger.
#[derive(Debug, Clone, PartialEq)]
pub struct NewPayment {
    pub order_id: Uuid,
    pub provider_payment_id: String,
    pub provider_order_id: Option<String>,
    pub amount: Decimal,
    pub currency: String,
    pub status: PaymentStatus,
    pub method: Option<String>,
}

/// Payment ledger. Every write takes the caller's connection so it joins
/// whatever transaction the caller has open.
#[derive(Debug, Clone)]
pub struct PaymentService {
    db: Arc<DatabaseConnection>,
}

impl PaymentService {
    pub fn new(db: Arc<DatabaseConnection>) -> Self {
        Self { db }
    }

    pub async fn find_by_provider_payment_id<C: ConnectionTrait>(
        &self,
        conn: &C,
        provider_payment_id: &str,
    ) -> Result<Option<payment::Model>, ServiceError> {
        Ok(Payment::find()
            .filter(payment::Column::ProviderPaymentId.eq(provider_payment_id))
            .one(conn)
            .await?)
    }

    /// Records a payment. Saving the same provider payment id twice returns
    /// the row written first.
    #[instrument(skip(self, conn, new), fields(provider_payment_id = %new.provider_payment_id, order_id = %new.order_id))]
    pub async fn save_payment<C: ConnectionTrait>(
        &self,
        conn: &C,
        new: NewPayment,
    ) -> Result<payment::Model, ServiceError> {
        if let Some(existing) = self
            .find_by_provider_payment_id(conn, &new.provider_payment_id)
            .await?
        {
            info!(payment_id = %existing.id, "Payment already recorded");
            return Ok(existing);
        }

        let model = payment::ActiveModel {
            id: Set(Uuid::new_v4()),
            order_id: Set(new.order_id),
            provider_payment_id: Set(new.provider_payment_id.clone()),
            provider_order_id: Set(new.provider_order_id),
            amount: Set(new.amount),
            currency: Set(new.currency),
            status: Set(new.status),
            method: Set(new.method),
            created_at: Set(Utc::now()),
            updated_at: Set(None),
        };

        match model.insert(conn).await {
            Ok(saved) => {
                info!(payment_id = %saved.id, amount = %saved.amount, "Payment recorded");
                Ok(saved)
            }
            Err(err) => match err.sql_err() {
                Some(SqlErr::UniqueConstraintViolation(_)) => Err(ServiceError::Conflict(format!(
                    "payment {} already recorded",
                    new.provider_payment_id
                ))),
                _ => Err(err.into()),
            },
        }
    }

    /// Flags an order as paid and confirmed, stamping `paid_at`.
    pub async fn mark_order_paid<C: ConnectionTrait>(
        &self,
        conn: &C,
        order_id: Uuid,
        paid_at: DateTime<Utc>,
    ) -> Result<order::Model, ServiceError> {
        let existing = Order::find_by_id(order_id)
            .one(conn)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("order {}", order_id)))?;

        let mut active: order::ActiveModel = existing.into();
        active.status = Set(STATUS_CONFIRMED.to_string());
        active.payment_status = Set(PAYMENT_STATUS_PAID.to_string());
        active.paid_at = Set(Some(paid_at));
        Ok(active.update(conn).await?)
    }
}
