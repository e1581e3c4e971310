pub mod checkout_intent;
pub mod order;
pub mod order_item;
pub mod payment;

pub use checkout_intent::{Address, IntentStatus, OrderDraft, OrderDraftItem};
pub use payment::PaymentStatus;
