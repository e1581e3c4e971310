/// Checkout intent lifecycle: reservation and finalization
pub mod checkout_finalization;
pub mod checkout_intent_service;

pub use checkout_finalization::{
    CheckoutFinalizationService, FinalizationOutcome, FinalizationSource, FinalizePayment,
};
pub use checkout_intent_service::{CheckoutIntentService, CreateIntentInput};
