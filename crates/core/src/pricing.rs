//! Server-side pricing for roster checkout.
//!
//! Prices are never taken from the client. Each completed person becomes one
//! line priced by age group, plus a surcharge for a custom fit.

use std::num::NonZeroU32;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::order::{Customer, Order, OrderError, OrderItem};
use crate::person::{AgeGroup, Gender, Person};
use crate::roster::{PersonRoster, RosterError};
use crate::types::{CurrencyCode, OrderId};

/// Garment price list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PriceSchedule {
    pub currency: CurrencyCode,
    /// Base price for an adult garment.
    pub adult: Decimal,
    /// Base price for a child garment.
    pub child: Decimal,
    /// Added when the size is `Custom`.
    pub custom_fit_surcharge: Decimal,
    /// Sales tax as a fraction (`0.0825`), if charged.
    pub tax_rate: Option<Decimal>,
}

impl Default for PriceSchedule {
    fn default() -> Self {
        Self {
            currency: CurrencyCode::USD,
            adult: Decimal::new(12_000, 2),
            child: Decimal::new(8_000, 2),
            custom_fit_surcharge: Decimal::new(2_500, 2),
            tax_rate: None,
        }
    }
}

const fn gender_label(gender: Gender) -> &'static str {
    match gender {
        Gender::Men => "Men's",
        Gender::Women => "Women's",
        Gender::Children => "Children's",
    }
}

impl PriceSchedule {
    /// Unit price for one person's garment.
    #[must_use]
    pub fn unit_price(&self, person: &Person) -> Decimal {
        let base = match person.age_group {
            AgeGroup::Adult => self.adult,
            AgeGroup::Child => self.child,
        };
        if person.is_custom_size() {
            base + self.custom_fit_surcharge
        } else {
            base
        }
    }

    /// The order line for a completed person, or `None` if the person is incomplete.
    #[must_use]
    pub fn item_for(&self, person: &Person) -> Option<OrderItem> {
        if !person.is_complete() {
            return None;
        }
        let design = person.design_id.as_deref()?;
        let size = person.size.clone()?;
        let is_custom = person.is_custom_size();
        Some(OrderItem {
            name: format!("{} garment, design {design}", gender_label(person.gender)),
            price: self.unit_price(person),
            quantity: NonZeroU32::MIN,
            size,
            color: None,
            is_custom,
            measurements: if is_custom {
                person.measurements.clone()
            } else {
                None
            },
            person_name: Some(person.name.clone()),
        })
    }
}

/// Errors turning a roster into an order.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DraftError {
    #[error(transparent)]
    Roster(#[from] RosterError),
    #[error(transparent)]
    Order(#[from] OrderError),
}

/// Priced items for a checkout-ready roster, not yet an order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrderDraft {
    pub customer: Customer,
    pub items: Vec<OrderItem>,
    pub currency: CurrencyCode,
    pub tax_rate: Option<Decimal>,
}

impl OrderDraft {
    /// Price every person in the roster, one line each, in roster order.
    ///
    /// # Errors
    ///
    /// Returns `DraftError::Roster(RosterError::NotReady)` unless the roster
    /// passes the checkout gate.
    pub fn from_roster(
        roster: &PersonRoster,
        customer: Customer,
        schedule: &PriceSchedule,
    ) -> Result<Self, DraftError> {
        roster.ensure_checkout_ready()?;
        let items = roster
            .people()
            .iter()
            .filter_map(|person| schedule.item_for(person))
            .collect();
        Ok(Self {
            customer,
            items,
            currency: schedule.currency,
            tax_rate: schedule.tax_rate,
        })
    }

    /// Turn the draft into a `PENDING` order.
    ///
    /// # Errors
    ///
    /// Returns `OrderError` if totals cannot be derived.
    pub fn into_order(self, id: OrderId, order_date: DateTime<Utc>) -> Result<Order, OrderError> {
        Order::new(
            id,
            self.customer,
            self.items,
            self.currency,
            self.tax_rate,
            order_date,
        )
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::order::tests::customer;
    use crate::person::tests::complete_person;
    use crate::person::{CUSTOM_SIZE, Measurements};
    use crate::types::PersonId;

    #[test]
    fn test_custom_fit_adds_surcharge() {
        let schedule = PriceSchedule::default();
        let mut person = complete_person("p1");
        assert_eq!(schedule.unit_price(&person), Decimal::new(12_000, 2));

        person.size = Some(CUSTOM_SIZE.to_owned());
        person.measurements = Some(Measurements::from([("waist".to_owned(), Decimal::new(81, 0))]));
        let item = schedule.item_for(&person).unwrap();
        assert_eq!(item.price, Decimal::new(14_500, 2));
        assert!(item.is_custom);
        assert!(item.measurements.is_some());
        assert_eq!(item.person_name.as_deref(), Some("Ada Lovelace"));
    }

    #[test]
    fn test_incomplete_person_has_no_item() {
        let schedule = PriceSchedule::default();
        let person = Person::new(PersonId::new("p"), "Kid", Gender::Children, AgeGroup::Child);
        assert!(schedule.item_for(&person).is_none());
    }

    #[test]
    fn test_draft_requires_ready_roster() {
        let mut roster = PersonRoster::new();
        roster
            .replace(vec![Person::new(PersonId::new("p"), "Kid", Gender::Children, AgeGroup::Child)])
            .unwrap();
        let err = OrderDraft::from_roster(&roster, customer(), &PriceSchedule::default()).unwrap_err();
        assert!(matches!(err, DraftError::Roster(RosterError::NotReady { .. })));
    }

    #[test]
    fn test_draft_prices_each_person_in_order() {
        let mut roster = PersonRoster::new();
        let mut child = complete_person("kid");
        child.age_group = AgeGroup::Child;
        child.name = "Tim".to_owned();
        roster.replace(vec![complete_person("adult"), child]).unwrap();

        let order = OrderDraft::from_roster(&roster, customer(), &PriceSchedule::default())
            .unwrap()
            .into_order(OrderId::new("O1"), Utc::now())
            .unwrap();
        assert_eq!(order.items().len(), 2);
        assert_eq!(order.items()[1].person_name.as_deref(), Some("Tim"));
        assert_eq!(order.total().amount, Decimal::new(20_000, 2));
    }
}
