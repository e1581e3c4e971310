#![allow(dead_code)]

use std::sync::{
    atomic::{AtomicUsize, Ordering},
    Arc,
};

use async_trait::async_trait;
use axum::{
    body::Body,
    http::{Method, Request, StatusCode},
    Router,
};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseTransaction, EntityTrait, PaginatorTrait, QueryFilter,
    Set,
};
use serde_json::Value;
use storefront_api::{
    api_v1_routes,
    config::AppConfig,
    db,
    entities::{
        checkout_intent::{self, IntentStatus, OrderDraft, OrderDraftItem},
        order, payment,
    },
    errors::ServiceError,
    events::{self, EventSender},
    handlers::AppServices,
    money,
    services::{
        commerce::CheckoutFinalizationService,
        orders::{DefaultOrderMaterializer, OrderMaterializer},
        payment_gateway::{CreateProviderOrder, PaymentGateway, ProviderOrder},
    },
    webhooks::{signature::payment_message, SignatureVerifier},
    AppState,
};
use tempfile::TempDir;
use tokio::sync::mpsc;
use tower::ServiceExt;
use uuid::Uuid;

pub const API_SECRET: &str = "test_key_secret";
pub const WEBHOOK_SECRET: &str = "test_webhook_secret";
pub const SIGNATURE_HEADER: &str = "x-razorpay-signature";

/// Provider double that hands out sequential order ids.
#[derive(Default)]
pub struct StubGateway {
    created: AtomicUsize,
}

impl StubGateway {
    pub fn orders_created(&self) -> usize {
        self.created.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl PaymentGateway for StubGateway {
    async fn create_order(
        &self,
        request: &CreateProviderOrder,
    ) -> Result<ProviderOrder, ServiceError> {
        let n = self.created.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(ProviderOrder {
            id: format!("order_stub{n:04}"),
            amount: request.amount,
            currency: request.currency.clone(),
            receipt: Some(request.receipt.clone()),
            status: Some("created".to_string()),
        })
    }
}

/// Writes the order through the real materializer and then fails, so a
/// test can observe that the partial write is rolled back.
pub struct FailingMaterializer;

#[async_trait]
impl OrderMaterializer for FailingMaterializer {
    async fn create_order_as_paid(
        &self,
        txn: &DatabaseTransaction,
        draft: &OrderDraft,
        items: &[OrderDraftItem],
        provider_order_id: &str,
        actor: Option<&str>,
    ) -> Result<order::Model, ServiceError> {
        DefaultOrderMaterializer
            .create_order_as_paid(txn, draft, items, provider_order_id, actor)
            .await?;
        Err(ServiceError::InternalError(
            "inventory service unavailable".to_string(),
        ))
    }
}

/// Adds a surcharge to the order after it is written, the way a tax or
/// shipping recalculation would.
pub struct RepricingMaterializer {
    pub surcharge: Decimal,
}

#[async_trait]
impl OrderMaterializer for RepricingMaterializer {
    async fn create_order_as_paid(
        &self,
        txn: &DatabaseTransaction,
        draft: &OrderDraft,
        items: &[OrderDraftItem],
        provider_order_id: &str,
        actor: Option<&str>,
    ) -> Result<order::Model, ServiceError> {
        let created = DefaultOrderMaterializer
            .create_order_as_paid(txn, draft, items, provider_order_id, actor)
            .await?;
        let repriced = created.grand_total + self.surcharge;
        let mut active: order::ActiveModel = created.into();
        active.grand_total = Set(repriced);
        Ok(active.update(txn).await?)
    }
}

/// Helper harness backed by a throwaway SQLite file.
pub struct TestApp {
    router: Router,
    pub state: AppState,
    pub gateway: Arc<StubGateway>,
    _db_dir: TempDir,
    _event_task: tokio::task::JoinHandle<()>,
}

impl TestApp {
    pub async fn new() -> Self {
        Self::build(Arc::new(DefaultOrderMaterializer), |_| {}).await
    }

    pub async fn with_materializer(materializer: Arc<dyn OrderMaterializer>) -> Self {
        Self::build(materializer, |_| {}).await
    }

    pub async fn with_config(tweak: impl FnOnce(&mut AppConfig)) -> Self {
        Self::build(Arc::new(DefaultOrderMaterializer), tweak).await
    }

    async fn build(
        materializer: Arc<dyn OrderMaterializer>,
        tweak: impl FnOnce(&mut AppConfig),
    ) -> Self {
        let db_dir = tempfile::tempdir().expect("temp dir");
        let db_path = db_dir.path().join("storefront_test.db");

        let mut cfg = AppConfig::new(
            format!("sqlite://{}?mode=rwc", db_path.display()),
            "127.0.0.1".to_string(),
            18_080,
            "test".to_string(),
        );
        cfg.db_max_connections = 1;
        cfg.db_min_connections = 1;
        cfg.payment.key_id = "rzp_test_key".to_string();
        cfg.payment.key_secret = API_SECRET.to_string();
        cfg.payment.webhook_secret = WEBHOOK_SECRET.to_string();
        cfg.payment.webhook_signature_header = SIGNATURE_HEADER.to_string();
        tweak(&mut cfg);

        let pool = db::establish_connection_from_app_config(&cfg)
            .await
            .expect("failed to create test database");
        db::run_migrations(&pool)
            .await
            .expect("failed to run migrations in tests");

        let db_arc = Arc::new(pool);
        let (event_tx, event_rx) = mpsc::channel(256);
        let event_sender = EventSender::new(event_tx);
        let event_task = tokio::spawn(events::process_events(event_rx));

        let gateway = Arc::new(StubGateway::default());
        let services = AppServices::new(
            db_arc.clone(),
            Arc::new(event_sender.clone()),
            &cfg,
            gateway.clone(),
            materializer,
        );

        let state = AppState {
            db: db_arc,
            config: cfg,
            event_sender,
            services,
        };

        let router = Router::new()
            .nest("/api/v1", api_v1_routes())
            .with_state(state.clone());

        Self {
            router,
            state,
            gateway,
            _db_dir: db_dir,
            _event_task: event_task,
        }
    }

    pub fn finalization(&self) -> Arc<CheckoutFinalizationService> {
        self.state.services.finalization.clone()
    }

    /// Stores a `PENDING` intent bound to `provider_order_id`.
    pub async fn seed_intent(
        &self,
        provider_order_id: &str,
        grand_total: Decimal,
    ) -> checkout_intent::Model {
        self.seed_intent_with(
            Some(provider_order_id),
            IntentStatus::Pending.as_str(),
            grand_total,
            Utc::now(),
        )
        .await
    }

    pub async fn seed_intent_with(
        &self,
        provider_order_id: Option<&str>,
        status: &str,
        grand_total: Decimal,
        modified_at: DateTime<Utc>,
    ) -> checkout_intent::Model {
        let (draft, items) = cart(grand_total);
        checkout_intent::ActiveModel {
            id: Set(Uuid::new_v4()),
            provider_order_id: Set(provider_order_id.map(str::to_string)),
            provider_payment_id: Set(None),
            status: Set(status.to_string()),
            order_draft: Set(serde_json::to_value(&draft).expect("draft json")),
            items: Set(serde_json::to_value(&items).expect("items json")),
            amount_minor: Set(money::to_minor_units(grand_total, "INR").expect("minor units")),
            currency: Set("INR".to_string()),
            active: Set(true),
            order_id: Set(None),
            created_by: Set(Some("asha@example.com".to_string())),
            modified_by: Set(None),
            created_at: Set(modified_at),
            modified_at: Set(modified_at),
        }
        .insert(&*self.state.db)
        .await
        .expect("seed intent")
    }

    pub async fn intent(&self, id: Uuid) -> checkout_intent::Model {
        checkout_intent::Entity::find_by_id(id)
            .one(&*self.state.db)
            .await
            .expect("query intent")
            .expect("intent exists")
    }

    /// Overwrites the stored status, as an older deployment or a crashed
    /// worker would have left it.
    pub async fn force_status(&self, id: Uuid, status: &str, modified_at: DateTime<Utc>) {
        let mut active: checkout_intent::ActiveModel = self.intent(id).await.into();
        active.status = Set(status.to_string());
        active.modified_at = Set(modified_at);
        active.update(&*self.state.db).await.expect("update intent");
    }

    pub async fn order_count(&self) -> u64 {
        order::Entity::find()
            .count(&*self.state.db)
            .await
            .expect("count orders")
    }

    pub async fn payment_count(&self) -> u64 {
        payment::Entity::find()
            .count(&*self.state.db)
            .await
            .expect("count payments")
    }

    pub async fn payments_for_provider_order(&self, provider_order_id: &str) -> Vec<payment::Model> {
        payment::Entity::find()
            .filter(payment::Column::ProviderOrderId.eq(provider_order_id))
            .all(&*self.state.db)
            .await
            .expect("query payments")
    }

    pub fn payment_signature(provider_order_id: &str, provider_payment_id: &str) -> String {
        SignatureVerifier::sign(
            API_SECRET,
            payment_message(provider_order_id, provider_payment_id).as_bytes(),
        )
        .expect("sign payment")
    }

    pub fn webhook_signature(body: &[u8]) -> String {
        SignatureVerifier::sign(WEBHOOK_SECRET, body).expect("sign webhook")
    }

    pub async fn request(
        &self,
        method: Method,
        uri: &str,
        body: Option<Value>,
    ) -> axum::response::Response {
        let mut builder = Request::builder().method(method).uri(uri);
        let body = match body {
            Some(value) => {
                builder = builder.header("content-type", "application/json");
                Body::from(value.to_string())
            }
            None => Body::empty(),
        };
        self.send(builder.body(body).expect("request")).await
    }

    /// Posts `body` verbatim, so the signature covers exactly these bytes.
    pub async fn post_raw(
        &self,
        uri: &str,
        body: Vec<u8>,
        headers: &[(&str, &str)],
    ) -> axum::response::Response {
        let mut builder = Request::builder()
            .method(Method::POST)
            .uri(uri)
            .header("content-type", "application/json");
        for (name, value) in headers {
            builder = builder.header(*name, *value);
        }
        self.send(builder.body(Body::from(body)).expect("request"))
            .await
    }

    async fn send(&self, request: Request<Body>) -> axum::response::Response {
        self.router
            .clone()
            .oneshot(request)
            .await
            .expect("router response")
    }
}

impl Drop for TestApp {
    fn drop(&mut self) {
        self._event_task.abort();
    }
}

pub fn cart(grand_total: Decimal) -> (OrderDraft, Vec<OrderDraftItem>) {
    let draft = OrderDraft {
        currency: "INR".to_string(),
        subtotal: grand_total,
        shipping_total: Decimal::ZERO,
        tax_total: Decimal::ZERO,
        discount_total: Decimal::ZERO,
        grand_total,
        customer_id: None,
        customer_email: Some("asha@example.com".to_string()),
        shipping_address: None,
        billing_address: None,
        notes: None,
    };
    let items = vec![OrderDraftItem {
        product_id: None,
        sku: "TEA-250".to_string(),
        name: "Assam tea 250g".to_string(),
        quantity: 1,
        unit_price: grand_total,
        line_total: grand_total,
    }];
    (draft, items)
}

pub async fn response_json(response: axum::response::Response) -> Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("read body");
    if bytes.is_empty() {
        return Value::Null;
    }
    serde_json::from_slice(&bytes).expect("json body")
}

pub fn assert_status(response: &axum::response::Response, expected: StatusCode) {
    assert_eq!(response.status(), expected, "unexpected status");
}
