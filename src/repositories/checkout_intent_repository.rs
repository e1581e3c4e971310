use chrono::{DateTime, Utc};
use sea_orm::{
    sea_query::Expr, ActiveModelTrait, ColumnTrait, ConnectionTrait, DatabaseConnection,
    EntityTrait, QueryFilter, QuerySelect,
};
use std::sync::Arc;
use uuid::Uuid;

use crate::entities::checkout_intent::{
    ActiveModel as CheckoutIntentActiveModel, Column, Entity as CheckoutIntent, IntentStatus,
    Model as CheckoutIntentModel,
};
use crate::errors::AppError;
use crate::repositories::Repository;

use super::BaseRepository;

/// Persistence for checkout intents.
///
/// Reads through `find_*` use the pool and never lock. The `lock_*` variants
/// must be called with an open transaction; they issue `SELECT ... FOR UPDATE`
/// on backends with row locks and fall back to a plain read elsewhere, so
/// callers pair them with [`CheckoutIntentRepository::transition_status`].
#[derive(Debug, Clone)]
pub struct CheckoutIntentRepository {
    base: BaseRepository,
}

impl CheckoutIntentRepository {
    pub fn new(db: Arc<DatabaseConnection>) -> Self {
        Self {
            base: BaseRepository::new(db),
        }
    }

    pub async fn find_by_id(&self, id: Uuid) -> Result<Option<CheckoutIntentModel>, AppError> {
        CheckoutIntent::find_by_id(id)
            .one(self.base.get_db())
            .await
            .map_err(AppError::DatabaseError)
    }

    pub async fn find_by_provider_order_id(
        &self,
        provider_order_id: &str,
    ) -> Result<Option<CheckoutIntentModel>, AppError> {
        CheckoutIntent::find()
            .filter(Column::ProviderOrderId.eq(provider_order_id))
            .one(self.base.get_db())
            .await
            .map_err(AppError::DatabaseError)
    }

    pub async fn lock_by_provider_order_id<C: ConnectionTrait>(
        &self,
        conn: &C,
        provider_order_id: &str,
    ) -> Result<Option<CheckoutIntentModel>, AppError> {
        CheckoutIntent::find()
            .filter(Column::ProviderOrderId.eq(provider_order_id))
            .lock_exclusive()
            .one(conn)
            .await
            .map_err(AppError::DatabaseError)
    }

    pub async fn lock_by_id<C: ConnectionTrait>(
        &self,
        conn: &C,
        id: Uuid,
    ) -> Result<Option<CheckoutIntentModel>, AppError> {
        CheckoutIntent::find_by_id(id)
            .lock_exclusive()
            .one(conn)
            .await
            .map_err(AppError::DatabaseError)
    }

    pub async fn insert<C: ConnectionTrait>(
        &self,
        conn: &C,
        intent: CheckoutIntentActiveModel,
    ) -> Result<CheckoutIntentModel, AppError> {
        intent.insert(conn).await.map_err(AppError::DatabaseError)
    }

    /// Writes the changed columns of an existing intent.
    pub async fn save<C: ConnectionTrait>(
        &self,
        conn: &C,
        intent: CheckoutIntentActiveModel,
    ) -> Result<CheckoutIntentModel, AppError> {
        intent.update(conn).await.map_err(AppError::DatabaseError)
    }

    /// Conditional status write: succeeds only while the row still holds
    /// `from_raw` (and `observed_modified_at`, when given). Returns whether
    /// this caller won the transition.
    pub async fn transition_status<C: ConnectionTrait>(
        &self,
        conn: &C,
        id: Uuid,
        from_raw: &str,
        observed_modified_at: Option<DateTime<Utc>>,
        to: IntentStatus,
        actor: Option<&str>,
    ) -> Result<bool, AppError> {
        let mut update = CheckoutIntent::update_many()
            .col_expr(Column::Status, Expr::value(to.as_str()))
            .col_expr(Column::ModifiedAt, Expr::value(Utc::now()))
            .filter(Column::Id.eq(id))
            .filter(Column::Status.eq(from_raw));

        if let Some(actor) = actor {
            update = update.col_expr(Column::ModifiedBy, Expr::value(actor.to_string()));
        }
        if let Some(modified_at) = observed_modified_at {
            update = update.filter(Column::ModifiedAt.eq(modified_at));
        }

        let result = update.exec(conn).await.map_err(AppError::DatabaseError)?;
        Ok(result.rows_affected == 1)
    }
}
