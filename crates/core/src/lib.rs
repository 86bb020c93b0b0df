//! Atelier Core - Domain types and rules for made-to-order orders.
//!
//! This crate provides the types and pure rules shared by all Atelier components:
//! - `storefront` - HTTP service for the roster builder, checkout, payments and operators
//! - `cli` - Command-line tools for migrations and order management
//!
//! # Architecture
//!
//! The core crate contains only types and rules - no I/O, no database access,
//! no HTTP clients. Everything here is deterministic and can be tested without
//! a runtime.
//!
//! # Modules
//!
//! - [`types`] - Newtype ids, email, money and the order status table
//! - [`person`] - A person being outfitted and the completion policy
//! - [`roster`] - The ordered set of people with a navigation cursor
//! - [`order`] - Orders, items and the subtotal invariant
//! - [`pricing`] - Server-side price schedule used at checkout

#![cfg_attr(not(test), forbid(unsafe_code))]

pub mod order;
pub mod person;
pub mod pricing;
pub mod roster;
pub mod types;

pub use order::{Customer, Order, OrderError, OrderItem, OrderParts};
pub use person::{AgeGroup, CUSTOM_SIZE, Gender, Measurements, Person, PersonUpdate};
pub use pricing::{DraftError, OrderDraft, PriceSchedule};
pub use roster::{PersonRoster, RosterError};
pub use types::*;
