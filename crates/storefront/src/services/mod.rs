//! Business logic services for storefront.
//!
//! # Services
//!
//! - `status` - Order status machine (the only writer of order status)
//! - `payments` - Payment processor client, intent reconciliation, webhooks
//! - `checkout` - Roster to order to payment intent
//! - `notifications` - Status emails, the event queue and its worker

pub mod checkout;
pub mod notifications;
pub mod payments;
pub mod status;
