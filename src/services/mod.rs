// Checkout
pub mod commerce;

// Collaborators the checkout writes through
pub mod orders;
pub mod payments;

// External Services
pub mod payment_gateway;
