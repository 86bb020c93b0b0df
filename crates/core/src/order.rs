//! Orders and order items.
//!
//! An [`Order`] keeps `subtotal == Σ price × quantity` over its items and
//! `total == subtotal + tax` at all times: the totals are derived inside the
//! constructors and fields are only readable through accessors.

use std::num::NonZeroU32;

use chrono::{DateTime, Utc};
use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};

use crate::person::Measurements;
use crate::types::{CurrencyCode, Email, Money, OrderId, OrderStatus, PaymentIntentId};

/// Errors building or restoring an order.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum OrderError {
    /// An order needs at least one item.
    #[error("order has no items")]
    NoItems,
    /// An item carries a negative price.
    #[error("item {name} has a negative price")]
    NegativePrice { name: String },
    /// Arithmetic overflowed.
    #[error("order totals overflow")]
    Overflow,
    /// A persisted subtotal disagrees with the persisted items.
    #[error("stored subtotal {stored} does not match items ({computed})")]
    SubtotalMismatch { stored: Decimal, computed: Decimal },
    /// A persisted total disagrees with subtotal plus tax.
    #[error("stored total {stored} does not match subtotal plus tax ({computed})")]
    TotalMismatch { stored: Decimal, computed: Decimal },
}

/// Contact details for the person paying.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Customer {
    pub name: String,
    pub email: Email,
}

impl Customer {
    /// First whitespace-separated token of the name, or the whole name.
    #[must_use]
    pub fn first_name(&self) -> &str {
        self.name.split_whitespace().next().unwrap_or(&self.name)
    }
}

/// A priced line on an order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderItem {
    pub name: String,
    /// Unit price in the order's currency.
    pub price: Decimal,
    pub quantity: NonZeroU32,
    pub size: String,
    #[serde(default)]
    pub color: Option<String>,
    pub is_custom: bool,
    #[serde(default)]
    pub measurements: Option<Measurements>,
    /// Label of the roster person this line was made for.
    #[serde(default)]
    pub person_name: Option<String>,
}

impl OrderItem {
    /// `price × quantity`, or `None` on overflow.
    #[must_use]
    pub fn line_total(&self) -> Option<Decimal> {
        self.price.checked_mul(Decimal::from(self.quantity.get()))
    }
}

/// Everything a store persists for an order, used to rebuild one.
#[derive(Debug, Clone)]
pub struct OrderParts {
    pub id: OrderId,
    pub customer: Customer,
    pub items: Vec<OrderItem>,
    pub currency: CurrencyCode,
    pub subtotal: Decimal,
    pub tax_rate: Option<Decimal>,
    pub total: Decimal,
    pub status: OrderStatus,
    pub order_date: DateTime<Utc>,
    pub payment_intent_id: Option<PaymentIntentId>,
    pub tracking_reference: Option<String>,
}

/// A customer order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Order {
    id: OrderId,
    customer: Customer,
    items: Vec<OrderItem>,
    currency: CurrencyCode,
    subtotal: Decimal,
    tax_rate: Option<Decimal>,
    tax: Option<Decimal>,
    total: Decimal,
    status: OrderStatus,
    order_date: DateTime<Utc>,
    payment_intent_id: Option<PaymentIntentId>,
    tracking_reference: Option<String>,
}

/// Derived `(subtotal, tax, total)` for a set of items.
fn derive_totals(
    items: &[OrderItem],
    tax_rate: Option<Decimal>,
) -> Result<(Decimal, Option<Decimal>, Decimal), OrderError> {
    if items.is_empty() {
        return Err(OrderError::NoItems);
    }
    let mut subtotal = Decimal::ZERO;
    for item in items {
        if item.price.is_sign_negative() && !item.price.is_zero() {
            return Err(OrderError::NegativePrice {
                name: item.name.clone(),
            });
        }
        let line = item.line_total().ok_or(OrderError::Overflow)?;
        subtotal = subtotal.checked_add(line).ok_or(OrderError::Overflow)?;
    }
    let tax = tax_rate
        .map(|rate| {
            subtotal
                .checked_mul(rate)
                .map(|t| t.round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero))
                .ok_or(OrderError::Overflow)
        })
        .transpose()?;
    let total = subtotal
        .checked_add(tax.unwrap_or(Decimal::ZERO))
        .ok_or(OrderError::Overflow)?;
    Ok((subtotal, tax, total))
}

impl Order {
    /// Create a new `PENDING` order.
    ///
    /// # Errors
    ///
    /// Returns `OrderError` for an empty item list, negative prices or overflow.
    pub fn new(
        id: OrderId,
        customer: Customer,
        items: Vec<OrderItem>,
        currency: CurrencyCode,
        tax_rate: Option<Decimal>,
        order_date: DateTime<Utc>,
    ) -> Result<Self, OrderError> {
        let (subtotal, tax, total) = derive_totals(&items, tax_rate)?;
        Ok(Self {
            id,
            customer,
            items,
            currency,
            subtotal,
            tax_rate,
            tax,
            total,
            status: OrderStatus::Pending,
            order_date,
            payment_intent_id: None,
            tracking_reference: None,
        })
    }

    /// Rebuild an order from persisted parts, re-checking the invariants.
    ///
    /// # Errors
    ///
    /// Returns `OrderError::SubtotalMismatch`/`TotalMismatch` if the stored
    /// totals disagree with the stored items.
    pub fn restore(parts: OrderParts) -> Result<Self, OrderError> {
        let (subtotal, tax, total) = derive_totals(&parts.items, parts.tax_rate)?;
        if subtotal != parts.subtotal {
            return Err(OrderError::SubtotalMismatch {
                stored: parts.subtotal,
                computed: subtotal,
            });
        }
        if total != parts.total {
            return Err(OrderError::TotalMismatch {
                stored: parts.total,
                computed: total,
            });
        }
        Ok(Self {
            id: parts.id,
            customer: parts.customer,
            items: parts.items,
            currency: parts.currency,
            subtotal,
            tax_rate: parts.tax_rate,
            tax,
            total,
            status: parts.status,
            order_date: parts.order_date,
            payment_intent_id: parts.payment_intent_id,
            tracking_reference: parts.tracking_reference,
        })
    }

    /// Append items and re-derive the totals.
    ///
    /// # Errors
    ///
    /// Returns `OrderError` for negative prices or overflow; `self` is untouched.
    pub fn with_items_appended(&self, items: Vec<OrderItem>) -> Result<Self, OrderError> {
        let mut all = self.items.clone();
        all.extend(items);
        let (subtotal, tax, total) = derive_totals(&all, self.tax_rate)?;
        Ok(Self {
            items: all,
            subtotal,
            tax,
            total,
            ..self.clone()
        })
    }

    #[must_use]
    pub const fn id(&self) -> &OrderId {
        &self.id
    }

    #[must_use]
    pub const fn customer(&self) -> &Customer {
        &self.customer
    }

    #[must_use]
    pub fn items(&self) -> &[OrderItem] {
        &self.items
    }

    #[must_use]
    pub const fn currency(&self) -> CurrencyCode {
        self.currency
    }

    #[must_use]
    pub const fn subtotal(&self) -> Money {
        Money::new(self.subtotal, self.currency)
    }

    #[must_use]
    pub const fn tax_rate(&self) -> Option<Decimal> {
        self.tax_rate
    }

    #[must_use]
    pub fn tax(&self) -> Option<Money> {
        self.tax.map(|t| Money::new(t, self.currency))
    }

    #[must_use]
    pub const fn total(&self) -> Money {
        Money::new(self.total, self.currency)
    }

    #[must_use]
    pub const fn status(&self) -> OrderStatus {
        self.status
    }

    #[must_use]
    pub const fn order_date(&self) -> DateTime<Utc> {
        self.order_date
    }

    #[must_use]
    pub const fn payment_intent_id(&self) -> Option<&PaymentIntentId> {
        self.payment_intent_id.as_ref()
    }

    #[must_use]
    pub fn tracking_reference(&self) -> Option<&str> {
        self.tracking_reference.as_deref()
    }

    /// Copy with a payment intent attached.
    #[must_use]
    pub fn with_payment_intent(mut self, intent_id: PaymentIntentId) -> Self {
        self.payment_intent_id = Some(intent_id);
        self
    }

    /// Copy with a tracking reference attached.
    #[must_use]
    pub fn with_tracking_reference(mut self, reference: impl Into<String>) -> Self {
        self.tracking_reference = Some(reference.into());
        self
    }

    /// Copy with a different status. Only stores call this, after their own
    /// compare-and-set has accepted the change.
    #[must_use]
    pub const fn with_status(mut self, status: OrderStatus) -> Self {
        self.status = status;
        self
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
pub(crate) mod tests {
    use super::*;

    pub(crate) fn item(name: &str, price: i64, quantity: u32) -> OrderItem {
        OrderItem {
            name: name.to_owned(),
            price: Decimal::new(price, 2),
            quantity: NonZeroU32::new(quantity).unwrap(),
            size: "M".to_owned(),
            color: None,
            is_custom: false,
            measurements: None,
            person_name: None,
        }
    }

    pub(crate) fn customer() -> Customer {
        Customer {
            name: "Grace Hopper".to_owned(),
            email: Email::parse("grace@example.com").unwrap(),
        }
    }

    #[test]
    fn test_subtotal_is_sum_of_lines() {
        let order = Order::new(
            OrderId::new("O1"),
            customer(),
            vec![item("Jacket", 12_050, 2), item("Tie", 1_999, 1)],
            CurrencyCode::USD,
            None,
            Utc::now(),
        )
        .unwrap();
        assert_eq!(order.subtotal().amount, Decimal::new(26_099, 2));
        assert_eq!(order.total(), order.subtotal());
        assert!(order.tax().is_none());
        assert_eq!(order.status(), OrderStatus::Pending);
    }

    #[test]
    fn test_tax_rounds_to_cents_and_adds_to_total() {
        let order = Order::new(
            OrderId::new("O1"),
            customer(),
            vec![item("Shirt", 3_333, 1)],
            CurrencyCode::USD,
            Some(Decimal::new(825, 4)),
            Utc::now(),
        )
        .unwrap();
        // 33.33 * 0.0825 = 2.749725
        assert_eq!(order.tax().unwrap().amount, Decimal::new(275, 2));
        assert_eq!(order.total().amount, Decimal::new(3_608, 2));
    }

    #[test]
    fn test_empty_order_rejected() {
        let result = Order::new(
            OrderId::new("O1"),
            customer(),
            vec![],
            CurrencyCode::USD,
            None,
            Utc::now(),
        );
        assert_eq!(result.unwrap_err(), OrderError::NoItems);
    }

    #[test]
    fn test_appending_items_keeps_invariant() {
        let order = Order::new(
            OrderId::new("O1"),
            customer(),
            vec![item("Jacket", 10_000, 1)],
            CurrencyCode::USD,
            None,
            Utc::now(),
        )
        .unwrap();
        let grown = order.with_items_appended(vec![item("Vest", 2_500, 2)]).unwrap();
        assert_eq!(grown.items().len(), 2);
        assert_eq!(grown.subtotal().amount, Decimal::new(15_000, 2));
        assert_eq!(order.items().len(), 1);
    }

    #[test]
    fn test_restore_rejects_tampered_subtotal() {
        let parts = OrderParts {
            id: OrderId::new("O1"),
            customer: customer(),
            items: vec![item("Jacket", 10_000, 1)],
            currency: CurrencyCode::USD,
            subtotal: Decimal::new(9_000, 2),
            tax_rate: None,
            total: Decimal::new(9_000, 2),
            status: OrderStatus::Processing,
            order_date: Utc::now(),
            payment_intent_id: None,
            tracking_reference: None,
        };
        assert!(matches!(
            Order::restore(parts),
            Err(OrderError::SubtotalMismatch { .. })
        ));
    }

    #[test]
    fn test_first_name() {
        assert_eq!(customer().first_name(), "Grace");
        let mononym = Customer {
            name: "Cher".to_owned(),
            email: Email::parse("cher@example.com").unwrap(),
        };
        assert_eq!(mononym.first_name(), "Cher");
    }
}
