use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use rust_decimal::Decimal;
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};
use std::{collections::HashMap, fmt, str::FromStr};
use utoipa::ToSchema;
use uuid::Uuid;
use validator::{Validate, ValidationError};

/// Lifecycle of a checkout intent.
///
/// `Pending -> Converting -> Converted`, with `Converting -> Pending` when a
/// conversion attempt fails. `Converted` is terminal.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum IntentStatus {
    Pending,
    Converting,
    Converted,
}

const STATUS_NAMES: [(&str, IntentStatus); 3] = [
    ("PENDING", IntentStatus::Pending),
    ("CONVERTING", IntentStatus::Converting),
    ("CONVERTED", IntentStatus::Converted),
];

static STATUS_BY_NAME: Lazy<HashMap<&'static str, IntentStatus>> =
    Lazy::new(|| STATUS_NAMES.iter().copied().collect());

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown checkout intent status: {0:?}")]
pub struct UnknownIntentStatus(pub String);

impl IntentStatus {
    /// Canonical name stored in `checkout_intents.status`.
    pub const fn as_str(&self) -> &'static str {
        match self {
            IntentStatus::Pending => "PENDING",
            IntentStatus::Converting => "CONVERTING",
            IntentStatus::Converted => "CONVERTED",
        }
    }
}

impl FromStr for IntentStatus {
    type Err = UnknownIntentStatus;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        let key = raw.trim().to_ascii_uppercase();
        STATUS_BY_NAME
            .get(key.as_str())
            .copied()
            .ok_or_else(|| UnknownIntentStatus(raw.to_string()))
    }
}

impl fmt::Display for IntentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Postal address captured at checkout time.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, Validate, ToSchema)]
pub struct Address {
    #[validate(length(min = 1, max = 120))]
    pub name: String,
    #[validate(length(min = 1, max = 255))]
    pub line1: String,
    #[serde(default)]
    pub line2: Option<String>,
    #[validate(length(min = 1, max = 100))]
    pub city: String,
    #[serde(default)]
    pub state: Option<String>,
    #[validate(length(min = 1, max = 20))]
    pub postal_code: String,
    #[validate(length(equal = 2))]
    pub country: String,
    #[serde(default)]
    pub phone: Option<String>,
}

/// Order totals and customer details snapshotted when the intent is created.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize, Validate, ToSchema)]
pub struct OrderDraft {
    #[validate(length(equal = 3))]
    pub currency: String,
    #[validate(custom = "validate_non_negative")]
    pub subtotal: Decimal,
    #[serde(default)]
    #[validate(custom = "validate_non_negative")]
    pub shipping_total: Decimal,
    #[serde(default)]
    #[validate(custom = "validate_non_negative")]
    pub tax_total: Decimal,
    #[serde(default)]
    #[validate(custom = "validate_non_negative")]
    pub discount_total: Decimal,
    #[validate(custom = "validate_positive")]
    pub grand_total: Decimal,
    #[serde(default)]
    pub customer_id: Option<Uuid>,
    #[serde(default)]
    #[validate(email)]
    pub customer_email: Option<String>,
    #[serde(default)]
    pub shipping_address: Option<Address>,
    #[serde(default)]
    pub billing_address: Option<Address>,
    #[serde(default)]
    pub notes: Option<String>,
}

/// One line of the cart snapshot.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize, Validate, ToSchema)]
pub struct OrderDraftItem {
    #[serde(default)]
    pub product_id: Option<Uuid>,
    #[validate(length(min = 1, max = 64))]
    pub sku: String,
    #[validate(length(min = 1, max = 255))]
    pub name: String,
    #[validate(range(min = 1, max = 10000))]
    pub quantity: i32,
    #[validate(custom = "validate_non_negative")]
    pub unit_price: Decimal,
    #[validate(custom = "validate_non_negative")]
    pub line_total: Decimal,
}

fn validate_non_negative(value: &Decimal) -> Result<(), ValidationError> {
    if value.is_sign_negative() && !value.is_zero() {
        let mut err = ValidationError::new("non_negative");
        err.message = Some("Amount cannot be negative".into());
        return Err(err);
    }
    Ok(())
}

fn validate_positive(value: &Decimal) -> Result<(), ValidationError> {
    if *value <= Decimal::ZERO {
        let mut err = ValidationError::new("positive");
        err.message = Some("Amount must be greater than zero".into());
        return Err(err);
    }
    Ok(())
}

#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "checkout_intents")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    #[sea_orm(unique)]
    pub provider_order_id: Option<String>,
    pub provider_payment_id: Option<String>,
    pub status: String,
    pub order_draft: Json,
    pub items: Json,
    pub amount_minor: i64,
    pub currency: String,
    pub active: bool,
    pub order_id: Option<Uuid>,
    pub created_by: Option<String>,
    pub modified_by: Option<String>,
    pub created_at: DateTime<Utc>,
    pub modified_at: DateTime<Utc>,
}

impl Model {
    pub fn parsed_status(&self) -> Result<IntentStatus, UnknownIntentStatus> {
        self.status.parse()
    }

    pub fn draft(&self) -> Result<OrderDraft, serde_json::Error> {
        serde_json::from_value(self.order_draft.clone())
    }

    pub fn draft_items(&self) -> Result<Vec<OrderDraftItem>, serde_json::Error> {
        serde_json::from_value(self.items.clone())
    }
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::order::Entity",
        from = "Column::OrderId",
        to = "super::order::Column::Id"
    )]
    Order,
}

impl Related<super::order::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Order.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn status_names_round_trip_through_the_table() {
        for (name, status) in STATUS_NAMES {
            assert_eq!(status.as_str(), name);
            assert_eq!(name.parse::<IntentStatus>(), Ok(status));
        }
    }

    #[test]
    fn legacy_spellings_are_accepted() {
        assert_eq!(" pending ".parse(), Ok(IntentStatus::Pending));
        assert_eq!("Converted".parse(), Ok(IntentStatus::Converted));
    }

    #[test]
    fn unknown_status_is_an_error() {
        let err = "CANCELLED".parse::<IntentStatus>().unwrap_err();
        assert_eq!(err, UnknownIntentStatus("CANCELLED".into()));
        assert!("".parse::<IntentStatus>().is_err());
    }

    #[test]
    fn draft_rejects_non_positive_grand_total() {
        let draft = OrderDraft {
            currency: "INR".into(),
            subtotal: dec!(0),
            shipping_total: dec!(0),
            tax_total: dec!(0),
            discount_total: dec!(0),
            grand_total: dec!(0),
            customer_id: None,
            customer_email: Some("buyer@example.com".into()),
            shipping_address: None,
            billing_address: None,
            notes: None,
        };
        let errors = draft.validate().unwrap_err();
        assert!(errors.field_errors().contains_key("grand_total"));
    }

    #[test]
    fn draft_amounts_accept_numbers_and_strings() {
        let draft: OrderDraft = serde_json::from_value(serde_json::json!({
            "currency": "INR",
            "subtotal": "1400.00",
            "shipping_total": 100,
            "grand_total": 1500.0
        }))
        .unwrap();
        assert_eq!(draft.grand_total, dec!(1500));
        assert_eq!(draft.tax_total, Decimal::ZERO);
    }
}
