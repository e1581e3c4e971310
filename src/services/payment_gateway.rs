use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use thiserror::Error;
use tracing::{info, instrument, warn};

use crate::{
    circuit_breaker::{CircuitBreaker, CircuitBreakerConfig, CircuitBreakerError},
    config::PaymentProviderConfig,
    errors::ServiceError,
};

const CIRCUIT_NAME: &str = "payment_gateway";

/// Body of the provider's `POST /orders`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CreateProviderOrder {
    /// Minor units
    pub amount: i64,
    pub currency: String,
    pub receipt: String,
    pub notes: BTreeMap<String, String>,
    /// 1 = capture automatically once authorized
    pub payment_capture: u8,
}

/// The provider's order resource, as much of it as we read.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct ProviderOrder {
    pub id: String,
    pub amount: i64,
    pub currency: String,
    #[serde(default)]
    pub receipt: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
}

/// Outbound calls to the payment provider.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait PaymentGateway: Send + Sync {
    async fn create_order(
        &self,
        request: &CreateProviderOrder,
    ) -> Result<ProviderOrder, ServiceError>;
}

#[derive(Debug, Error)]
enum GatewayError {
    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("provider returned {status}: {body}")]
    Status { status: u16, body: String },
}

impl GatewayError {
    /// Client errors are our fault and say nothing about provider health.
    fn is_provider_failure(&self) -> bool {
        match self {
            GatewayError::Transport(_) => true,
            GatewayError::Status { status, .. } => *status >= 500 || *status == 429,
        }
    }
}

/// `reqwest` client for the provider REST API, authenticated with HTTP
/// Basic (`key_id:key_secret`) and guarded by a circuit breaker.
#[derive(Debug, Clone)]
pub struct HttpPaymentGateway {
    client: reqwest::Client,
    base_url: String,
    key_id: String,
    key_secret: String,
    breaker: CircuitBreaker,
}

impl HttpPaymentGateway {
    pub fn new(config: &PaymentProviderConfig) -> Result<Self, ServiceError> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout())
            .build()
            .map_err(|e| ServiceError::InternalError(format!("http client: {}", e)))?;

        let breaker = CircuitBreaker::new(
            CIRCUIT_NAME,
            CircuitBreakerConfig {
                failure_threshold: config.circuit_breaker_failure_threshold,
                timeout: std::time::Duration::from_secs(config.circuit_breaker_timeout_secs),
                success_threshold: 1,
            },
        );

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            key_id: config.key_id.clone(),
            key_secret: config.key_secret.clone(),
            breaker,
        })
    }

    async fn post_order(&self, request: &CreateProviderOrder) -> Result<ProviderOrder, GatewayError> {
        let response = self
            .client
            .post(format!("{}/orders", self.base_url))
            .basic_auth(&self.key_id, Some(&self.key_secret))
            .json(request)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(GatewayError::Status {
                status: status.as_u16(),
                body,
            });
        }

        Ok(response.json::<ProviderOrder>().await?)
    }
}

#[async_trait]
impl PaymentGateway for HttpPaymentGateway {
    #[instrument(skip(self, request), fields(receipt = %request.receipt, amount = request.amount))]
    async fn create_order(
        &self,
        request: &CreateProviderOrder,
    ) -> Result<ProviderOrder, ServiceError> {
        let result = crate::tracing::with_metrics("payment_gateway.create_order", || {
            self.breaker
                .call_classified(|| self.post_order(request), GatewayError::is_provider_failure)
        })
        .await;

        match result {
            Ok(order) => {
                crate::metrics::record_gateway_call("create_order", "success");
                info!(provider_order_id = %order.id, "Provider order created");
                Ok(order)
            }
            Err(CircuitBreakerError::CircuitOpen) => {
                crate::metrics::record_gateway_call("create_order", "circuit_open");
                warn!("Payment gateway circuit open; rejecting call");
                Err(ServiceError::CircuitBreakerOpen)
            }
            Err(CircuitBreakerError::Inner(e)) => {
                crate::metrics::record_gateway_call("create_order", "error");
                warn!(error = %e, "Provider order creation failed");
                Err(ServiceError::ExternalServiceError(e.to_string()))
            }
        }
    }
}
