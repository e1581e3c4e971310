/// Checkout API handlers
pub mod checkout;

pub use checkout::checkout_routes;
