/// Inbound payment-provider webhook support
pub mod provider_event;
pub mod signature;

pub use provider_event::{CaptureDetails, EventKind, ProviderEvent};
pub use signature::SignatureVerifier;
