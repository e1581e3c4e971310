/*!
 * # Checkout Finalization
 *
 * Converts a checkout intent into a paid order and a recorded payment,
 * exactly once per intent, no matter how many times or from how many
 * callers the capture is reported.
 *
 * The work is split across short transactions:
 *
 * 1. **Claim**: lock the intent row and flip `PENDING -> CONVERTING` with a
 *    conditional update. Losers of the race observe `CONVERTING` (or zero
 *    affected rows) and back off. The claim commits immediately.
 * 2. **Convert**: re-lock the row, materialize the order, record the payment
 *    and mark the intent `CONVERTED` in one transaction.
 * 3. **Revert**: if the conversion fails, its transaction rolls back and a
 *    separate transaction moves the intent back to `PENDING` so a later
 *    delivery can retry.
 *
 * A claim left behind by a crashed process is reclaimed once it is older
 * than `checkout.stale_claim_secs`.
 */

use crate::{
    config::CheckoutConfig,
    db,
    entities::{
        checkout_intent::{self, IntentStatus},
        order::{self, Entity as Order},
        payment::{self, PaymentStatus},
    },
    errors::ServiceError,
    events::{Event, EventSender},
    metrics, money,
    repositories::CheckoutIntentRepository,
    services::{
        orders::OrderMaterializer,
        payments::{NewPayment, PaymentService},
    },
};
use chrono::Utc;
use rust_decimal::Decimal;
use sea_orm::{
    ActiveModelTrait, DatabaseConnection, DatabaseTransaction, EntityTrait, Set, SqlErr,
    TransactionTrait,
};
use std::{sync::Arc, time::Instant};
use tracing::{error, info, instrument, warn};
use uuid::Uuid;

/// Where a capture report came from. Used for metrics and logs only.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FinalizationSource {
    Verify,
    Webhook,
}

impl FinalizationSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            FinalizationSource::Verify => "verify",
            FinalizationSource::Webhook => "webhook",
        }
    }
}

/// A captured payment reported by the client or the provider.
#[derive(Debug, Clone, PartialEq)]
pub struct FinalizePayment {
    pub provider_order_id: String,
    pub provider_payment_id: String,
    /// Falls back to the draft's grand total when absent
    pub captured_amount: Option<Decimal>,
    /// Falls back to the configured default currency when blank
    pub currency: Option<String>,
    pub method: Option<String>,
    pub source: FinalizationSource,
}

#[derive(Debug, Clone, PartialEq)]
pub enum FinalizationOutcome {
    /// This call created the order and the payment.
    Converted {
        order: order::Model,
        payment: payment::Model,
    },
    /// The intent had already been converted.
    AlreadyConverted { payment: Option<payment::Model> },
    /// Another caller holds the claim.
    InFlight,
    /// The stored status is not one we know how to advance.
    Skipped { status: String },
    /// The provider payment id is already attached to a different checkout.
    PaymentAlreadyRecorded { payment: payment::Model },
}

impl FinalizationOutcome {
    pub fn label(&self) -> &'static str {
        match self {
            FinalizationOutcome::Converted { .. } => "converted",
            FinalizationOutcome::AlreadyConverted { .. } => "already_converted",
            FinalizationOutcome::InFlight => "in_flight",
            FinalizationOutcome::Skipped { .. } => "skipped",
            FinalizationOutcome::PaymentAlreadyRecorded { .. } => "payment_already_recorded",
        }
    }
}

enum Claim {
    Won(checkout_intent::Model),
    Settled(FinalizationOutcome),
}

#[derive(Clone)]
pub struct CheckoutFinalizationService {
    db: Arc<DatabaseConnection>,
    intents: CheckoutIntentRepository,
    payments: PaymentService,
    materializer: Arc<dyn OrderMaterializer>,
    event_sender: Arc<EventSender>,
    config: CheckoutConfig,
}

impl CheckoutFinalizationService {
    pub fn new(
        db: Arc<DatabaseConnection>,
        materializer: Arc<dyn OrderMaterializer>,
        event_sender: Arc<EventSender>,
        config: CheckoutConfig,
    ) -> Self {
        Self {
            intents: CheckoutIntentRepository::new(db.clone()),
            payments: PaymentService::new(db.clone()),
            db,
            materializer,
            event_sender,
            config,
        }
    }

    /// Finalizes the intent identified by the provider order id.
    #[instrument(
        skip(self, request),
        fields(
            provider_order_id = %request.provider_order_id,
            provider_payment_id = %request.provider_payment_id,
            source = request.source.as_str()
        )
    )]
    pub async fn finalize(
        &self,
        request: FinalizePayment,
        actor: Option<&str>,
    ) -> Result<FinalizationOutcome, ServiceError> {
        let started = Instant::now();
        let source = request.source.as_str();
        let result = self.run(request, actor).await;

        let label = match &result {
            Ok(outcome) => outcome.label(),
            Err(ServiceError::NotFound(_)) => "not_found",
            Err(_) => "error",
        };
        metrics::record_finalization(source, label, started.elapsed().as_secs_f64());
        result
    }

    /// Finalizes by local intent id, attaching the provider order id first
    /// when the intent does not have one yet.
    #[instrument(skip(self, request), fields(intent_id = %intent_id))]
    pub async fn finalize_by_intent_id(
        &self,
        intent_id: Uuid,
        request: FinalizePayment,
        actor: Option<&str>,
    ) -> Result<FinalizationOutcome, ServiceError> {
        ensure_present("provider_order_id", &request.provider_order_id)?;

        let txn = self.db.begin().await?;
        let intent = match self.intents.lock_by_id(&txn, intent_id).await? {
            Some(intent) => intent,
            None => {
                txn.rollback().await?;
                return Err(ServiceError::NotFound(format!(
                    "checkout intent {}",
                    intent_id
                )));
            }
        };

        let bound = intent.provider_order_id.clone();
        match bound.as_deref() {
            Some(existing) if existing == request.provider_order_id => {
                txn.commit().await?;
            }
            Some(existing) => {
                txn.rollback().await?;
                return Err(ServiceError::Conflict(format!(
                    "checkout intent {} is bound to provider order {}",
                    intent_id, existing
                )));
            }
            None => {
                let mut active: checkout_intent::ActiveModel = intent.into();
                active.provider_order_id = Set(Some(request.provider_order_id.clone()));
                active.modified_by = Set(actor.map(str::to_string));
                active.modified_at = Set(Utc::now());
                if let Err(err) = self.intents.save(&txn, active).await {
                    txn.rollback().await?;
                    return Err(bind_error(err, &request.provider_order_id));
                }
                txn.commit().await?;
            }
        }

        self.finalize(request, actor).await
    }

    async fn run(
        &self,
        request: FinalizePayment,
        actor: Option<&str>,
    ) -> Result<FinalizationOutcome, ServiceError> {
        ensure_present("provider_order_id", &request.provider_order_id)?;
        ensure_present("provider_payment_id", &request.provider_payment_id)?;

        let intent = match self.claim(&request, actor).await? {
            Claim::Won(intent) => intent,
            Claim::Settled(outcome) => return Ok(outcome),
        };

        let started = Instant::now();
        let txn = self.db.begin().await?;
        let converted = match self.convert(&txn, intent.id, &request, actor).await {
            Ok(outcome) => txn.commit().await.map(|_| outcome).map_err(ServiceError::from),
            Err(err) => {
                if let Err(rollback_err) = txn.rollback().await {
                    error!(error = %rollback_err, "Failed to roll back conversion");
                }
                Err(err)
            }
        };
        db::record_transaction("checkout.convert", converted.is_ok(), started.elapsed());

        match converted {
            Ok(FinalizationOutcome::PaymentAlreadyRecorded { payment }) => {
                self.release(
                    intent.id,
                    &request.provider_order_id,
                    format!(
                        "payment {} belongs to order {}",
                        request.provider_payment_id, payment.order_id
                    ),
                    actor,
                )
                .await;
                Ok(FinalizationOutcome::PaymentAlreadyRecorded { payment })
            }
            Ok(outcome) => {
                if let FinalizationOutcome::Converted { order, payment } = &outcome {
                    self.event_sender
                        .send_or_log(Event::CheckoutFinalized {
                            intent_id: intent.id,
                            order_id: order.id,
                            payment_id: payment.id,
                            provider_order_id: request.provider_order_id.clone(),
                            provider_payment_id: request.provider_payment_id.clone(),
                            amount: payment.amount,
                            currency: payment.currency.clone(),
                        })
                        .await;
                }
                Ok(outcome)
            }
            Err(err) => {
                self.release(intent.id, &request.provider_order_id, err.to_string(), actor)
                    .await;
                Err(err)
            }
        }
    }

    /// Locks the intent and tries to move it into `CONVERTING`.
    async fn claim(
        &self,
        request: &FinalizePayment,
        actor: Option<&str>,
    ) -> Result<Claim, ServiceError> {
        let started = Instant::now();
        let txn = self.db.begin().await?;

        let claim = match self.claim_in(&txn, request, actor).await {
            Ok(claim) => {
                txn.commit().await?;
                claim
            }
            Err(err) => {
                txn.rollback().await?;
                db::record_transaction("checkout.claim", false, started.elapsed());
                return Err(err);
            }
        };
        db::record_transaction("checkout.claim", true, started.elapsed());
        Ok(claim)
    }

    async fn claim_in(
        &self,
        txn: &DatabaseTransaction,
        request: &FinalizePayment,
        actor: Option<&str>,
    ) -> Result<Claim, ServiceError> {
        let intent = self
            .intents
            .lock_by_provider_order_id(txn, &request.provider_order_id)
            .await?
            .ok_or_else(|| {
                ServiceError::NotFound(format!(
                    "checkout intent for provider order {}",
                    request.provider_order_id
                ))
            })?;

        let status = match intent.parsed_status() {
            Ok(status) => status,
            Err(err) => {
                warn!(intent_id = %intent.id, error = %err, "Skipping intent with unknown status");
                return Ok(Claim::Settled(FinalizationOutcome::Skipped {
                    status: intent.status,
                }));
            }
        };

        match status {
            IntentStatus::Converted => {
                let payment = match intent.provider_payment_id.as_deref() {
                    Some(id) => self.payments.find_by_provider_payment_id(txn, id).await?,
                    None => None,
                };
                info!(intent_id = %intent.id, "Checkout already converted");
                Ok(Claim::Settled(FinalizationOutcome::AlreadyConverted {
                    payment,
                }))
            }
            IntentStatus::Converting => {
                if !self.claim_is_stale(&intent) {
                    info!(intent_id = %intent.id, "Checkout conversion already in flight");
                    return Ok(Claim::Settled(FinalizationOutcome::InFlight));
                }
                warn!(
                    intent_id = %intent.id,
                    claimed_at = %intent.modified_at,
                    claimed_by = ?intent.modified_by,
                    "Reclaiming abandoned checkout conversion"
                );
                self.take(txn, intent, true, actor).await
            }
            IntentStatus::Pending => self.take(txn, intent, false, actor).await,
        }
    }

    /// A window too long to represent never expires.
    fn claim_is_stale(&self, intent: &checkout_intent::Model) -> bool {
        match chrono::Duration::from_std(self.config.stale_claim_after()) {
            Ok(stale_after) => Utc::now() - intent.modified_at >= stale_after,
            Err(_) => false,
        }
    }

    /// Conditional `-> CONVERTING` write. A stale claim is only taken over
    /// while its timestamp is still the one we observed.
    async fn take(
        &self,
        txn: &DatabaseTransaction,
        intent: checkout_intent::Model,
        reclaiming: bool,
        actor: Option<&str>,
    ) -> Result<Claim, ServiceError> {
        let observed = reclaiming.then_some(intent.modified_at);
        let won = self
            .intents
            .transition_status(
                txn,
                intent.id,
                &intent.status,
                observed,
                IntentStatus::Converting,
                actor,
            )
            .await?;

        if won {
            Ok(Claim::Won(intent))
        } else {
            info!(intent_id = %intent.id, "Lost the claim race");
            Ok(Claim::Settled(FinalizationOutcome::InFlight))
        }
    }

    async fn convert(
        &self,
        txn: &DatabaseTransaction,
        intent_id: Uuid,
        request: &FinalizePayment,
        actor: Option<&str>,
    ) -> Result<FinalizationOutcome, ServiceError> {
        let intent = self
            .intents
            .lock_by_id(txn, intent_id)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("checkout intent {}", intent_id)))?;

        if intent.parsed_status().ok() != Some(IntentStatus::Converting) {
            return Err(ServiceError::InvalidOperation(format!(
                "checkout intent {} is {} instead of CONVERTING",
                intent_id, intent.status
            )));
        }

        if let Some(existing) = self
            .payments
            .find_by_provider_payment_id(txn, &request.provider_payment_id)
            .await?
        {
            let same_checkout = existing.provider_order_id.as_deref()
                == Some(request.provider_order_id.as_str())
                || intent.order_id == Some(existing.order_id);
            if !same_checkout {
                warn!(
                    intent_id = %intent.id,
                    payment_id = %existing.id,
                    "Provider payment id already recorded for another checkout"
                );
                return Ok(FinalizationOutcome::PaymentAlreadyRecorded { payment: existing });
            }

            info!(
                intent_id = %intent.id,
                payment_id = %existing.id,
                "Payment already recorded; completing intent"
            );
            let order_id = existing.order_id;
            self.complete_intent(txn, intent, request, order_id, actor)
                .await?;
            return Ok(FinalizationOutcome::AlreadyConverted {
                payment: Some(existing),
            });
        }

        let draft = intent.draft()?;
        let items = intent.draft_items()?;

        let created = self
            .materializer
            .create_order_as_paid(txn, &draft, &items, &request.provider_order_id, actor)
            .await?;

        let amount = request.captured_amount.unwrap_or(created.grand_total);
        let currency =
            money::normalize_currency(request.currency.as_deref(), &self.config.default_currency);

        let payment = self
            .payments
            .save_payment(
                txn,
                NewPayment {
                    order_id: created.id,
                    provider_payment_id: request.provider_payment_id.clone(),
                    provider_order_id: Some(request.provider_order_id.clone()),
                    amount,
                    currency,
                    status: PaymentStatus::Captured,
                    method: request.method.clone(),
                },
            )
            .await?;

        let order = self
            .payments
            .mark_order_paid(txn, created.id, Utc::now())
            .await?;

        self.complete_intent(txn, intent, request, order.id, actor)
            .await?;

        info!(
            order_id = %order.id,
            payment_id = %payment.id,
            amount = %payment.amount,
            currency = %payment.currency,
            "Checkout finalized"
        );
        Ok(FinalizationOutcome::Converted { order, payment })
    }

    async fn complete_intent(
        &self,
        txn: &DatabaseTransaction,
        intent: checkout_intent::Model,
        request: &FinalizePayment,
        order_id: Uuid,
        actor: Option<&str>,
    ) -> Result<(), ServiceError> {
        let mut active: checkout_intent::ActiveModel = intent.into();
        active.status = Set(IntentStatus::Converted.as_str().to_string());
        active.active = Set(false);
        active.provider_payment_id = Set(Some(request.provider_payment_id.clone()));
        active.order_id = Set(Some(order_id));
        active.modified_by = Set(actor.map(str::to_string));
        active.modified_at = Set(Utc::now());
        self.intents.save(txn, active).await?;
        Ok(())
    }

    /// Moves a claimed intent back to `PENDING`. Failures are logged, never
    /// returned, so the caller still sees the error that caused the revert.
    async fn release(
        &self,
        intent_id: Uuid,
        provider_order_id: &str,
        reason: String,
        actor: Option<&str>,
    ) {
        let started = Instant::now();
        let reverted = async {
            let txn = self.db.begin().await?;
            let reverted = self
                .intents
                .transition_status(
                    &txn,
                    intent_id,
                    IntentStatus::Converting.as_str(),
                    None,
                    IntentStatus::Pending,
                    actor,
                )
                .await?;
            txn.commit().await?;
            Ok::<bool, ServiceError>(reverted)
        }
        .await;
        db::record_transaction("checkout.revert", reverted.is_ok(), started.elapsed());

        match reverted {
            Ok(true) => {
                warn!(intent_id = %intent_id, reason = %reason, "Checkout conversion reverted to PENDING");
                self.event_sender
                    .send_or_log(Event::CheckoutReverted {
                        intent_id,
                        provider_order_id: provider_order_id.to_string(),
                        reason,
                    })
                    .await;
            }
            Ok(false) => {
                warn!(intent_id = %intent_id, "Intent left CONVERTING before it could be reverted");
            }
            Err(err) => {
                error!(
                    intent_id = %intent_id,
                    error = %err,
                    "Failed to revert checkout intent; it will be reclaimed once stale"
                );
            }
        }
    }

    /// Order created for a converted intent, if any.
    pub async fn order_for_intent(
        &self,
        intent: &checkout_intent::Model,
    ) -> Result<Option<order::Model>, ServiceError> {
        match intent.order_id {
            Some(order_id) => Ok(Order::find_by_id(order_id).one(&*self.db).await?),
            None => Ok(None),
        }
    }
}

fn bind_error(err: ServiceError, provider_order_id: &str) -> ServiceError {
    let duplicate = matches!(
        &err,
        ServiceError::DatabaseError(db_err)
            if matches!(db_err.sql_err(), Some(SqlErr::UniqueConstraintViolation(_)))
    );
    if duplicate {
        ServiceError::Conflict(format!(
            "provider order {} is bound to another checkout intent",
            provider_order_id
        ))
    } else {
        err
    }
}

fn ensure_present(field: &str, value: &str) -> Result<(), ServiceError> {
    if value.trim().is_empty() {
        return Err(ServiceError::InvalidInput(format!("{} is required", field)));
    }
    Ok(())
}
