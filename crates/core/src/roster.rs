//! The ordered set of people being outfitted in one order.
//!
//! The roster owns its people and a navigation cursor. The cursor clamps at
//! both ends: moving past either end is a no-op, not an error, because it is
//! a navigation primitive.
//!
//! The roster is a plain value. Callers load it from their session store,
//! apply one operation, and save the result back.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use crate::person::{Person, PersonUpdate};
use crate::types::PersonId;

/// Errors from roster operations.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RosterError {
    /// No person with this id is in the roster.
    #[error("no person with id {0} in roster")]
    UnknownPerson(PersonId),
    /// Two people share an id.
    #[error("duplicate person id {0} in roster")]
    DuplicatePerson(PersonId),
    /// Checkout was attempted before every person is complete.
    #[error("roster is not ready for checkout ({} incomplete)", incomplete.len())]
    NotReady {
        /// Ids of people still missing required choices. Empty when the roster itself is empty.
        incomplete: Vec<PersonId>,
    },
}

/// Ordered people plus a cursor.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", try_from = "RosterState")]
pub struct PersonRoster {
    people: Vec<Person>,
    current_index: usize,
}

/// Unchecked wire form; converted through [`PersonRoster::replace`] rules.
#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RosterState {
    #[serde(default)]
    people: Vec<Person>,
    #[serde(default)]
    current_index: usize,
}

impl TryFrom<RosterState> for PersonRoster {
    type Error = RosterError;

    fn try_from(state: RosterState) -> Result<Self, Self::Error> {
        let mut roster = Self::new();
        roster.replace(state.people)?;
        // A stale cursor from an older session snaps back into range.
        roster.current_index = state
            .current_index
            .min(roster.people.len().saturating_sub(1));
        Ok(roster)
    }
}

impl PersonRoster {
    /// An empty roster.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            people: Vec::new(),
            current_index: 0,
        }
    }

    /// Set the full ordered sequence and reset the cursor to the first person.
    ///
    /// # Errors
    ///
    /// Returns `RosterError::DuplicatePerson` if two people share an id; the
    /// roster is left unchanged.
    pub fn replace(&mut self, people: Vec<Person>) -> Result<(), RosterError> {
        let mut seen = HashSet::with_capacity(people.len());
        if let Some(dup) = people.iter().find(|p| !seen.insert(&p.id)) {
            return Err(RosterError::DuplicatePerson(dup.id.clone()));
        }
        self.people = people;
        self.current_index = 0;
        Ok(())
    }

    /// Merge fields into the person with `person_id`. The cursor does not move.
    ///
    /// # Errors
    ///
    /// Returns `RosterError::UnknownPerson` if no person has that id.
    pub fn update(&mut self, person_id: &PersonId, update: PersonUpdate) -> Result<&Person, RosterError> {
        let person = self
            .people
            .iter_mut()
            .find(|p| &p.id == person_id)
            .ok_or_else(|| RosterError::UnknownPerson(person_id.clone()))?;
        person.apply(update);
        Ok(person)
    }

    /// Move the cursor forward, stopping at the last person.
    pub fn advance(&mut self) {
        if self.current_index + 1 < self.people.len() {
            self.current_index += 1;
        }
    }

    /// Move the cursor back, stopping at the first person.
    pub const fn retreat(&mut self) {
        self.current_index = self.current_index.saturating_sub(1);
    }

    /// The person under the cursor, or `None` for an empty roster.
    #[must_use]
    pub fn current(&self) -> Option<&Person> {
        self.people.get(self.current_index)
    }

    #[must_use]
    pub const fn current_index(&self) -> usize {
        self.current_index
    }

    #[must_use]
    pub fn people(&self) -> &[Person] {
        &self.people
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.people.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.people.is_empty()
    }

    /// The completion policy applied to one person.
    #[must_use]
    pub fn is_complete(person: &Person) -> bool {
        person.is_complete()
    }

    /// The checkout gate: a non-empty roster where every person is complete.
    #[must_use]
    pub fn all_complete(&self) -> bool {
        !self.people.is_empty() && self.people.iter().all(Person::is_complete)
    }

    /// Ids of people that still block checkout.
    #[must_use]
    pub fn incomplete_people(&self) -> Vec<PersonId> {
        self.people
            .iter()
            .filter(|p| !p.is_complete())
            .map(|p| p.id.clone())
            .collect()
    }

    /// Enforce the checkout gate.
    ///
    /// # Errors
    ///
    /// Returns `RosterError::NotReady` listing incomplete people (empty list
    /// for an empty roster).
    pub fn ensure_checkout_ready(&self) -> Result<(), RosterError> {
        if self.all_complete() {
            Ok(())
        } else {
            Err(RosterError::NotReady {
                incomplete: self.incomplete_people(),
            })
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::person::tests::complete_person;
    use crate::person::{AgeGroup, Gender};

    fn roster_of(ids: &[&str]) -> PersonRoster {
        let mut roster = PersonRoster::new();
        roster
            .replace(ids.iter().map(|id| complete_person(id)).collect())
            .unwrap();
        roster
    }

    #[test]
    fn test_empty_roster_has_no_current_and_is_not_ready() {
        let roster = PersonRoster::new();
        assert!(roster.current().is_none());
        assert!(!roster.all_complete());
        assert_eq!(
            roster.ensure_checkout_ready(),
            Err(RosterError::NotReady { incomplete: vec![] })
        );
    }

    #[test]
    fn test_cursor_clamps_at_both_ends() {
        let mut roster = roster_of(&["a", "b", "c"]);
        roster.retreat();
        assert_eq!(roster.current_index(), 0);

        roster.advance();
        roster.advance();
        roster.advance();
        roster.advance();
        assert_eq!(roster.current_index(), 2);
        assert_eq!(roster.current().unwrap().id.as_str(), "c");

        roster.retreat();
        assert_eq!(roster.current().unwrap().id.as_str(), "b");
    }

    #[test]
    fn test_cursor_on_empty_roster_stays_at_zero() {
        let mut roster = PersonRoster::new();
        roster.advance();
        roster.retreat();
        assert_eq!(roster.current_index(), 0);
    }

    #[test]
    fn test_replace_resets_cursor() {
        let mut roster = roster_of(&["a", "b"]);
        roster.advance();
        roster.replace(vec![complete_person("x")]).unwrap();
        assert_eq!(roster.current_index(), 0);
        assert_eq!(roster.len(), 1);
    }

    #[test]
    fn test_replace_rejects_duplicate_ids_and_keeps_state() {
        let mut roster = roster_of(&["a"]);
        let err = roster
            .replace(vec![complete_person("x"), complete_person("x")])
            .unwrap_err();
        assert_eq!(err, RosterError::DuplicatePerson(PersonId::new("x")));
        assert_eq!(roster.people()[0].id.as_str(), "a");
    }

    #[test]
    fn test_update_does_not_move_cursor() {
        let mut roster = roster_of(&["a", "b"]);
        roster.advance();
        let update = PersonUpdate {
            clear_design: true,
            ..PersonUpdate::default()
        };
        roster.update(&PersonId::new("a"), update).unwrap();
        assert_eq!(roster.current_index(), 1);
        assert!(!roster.all_complete());
        assert_eq!(roster.incomplete_people(), vec![PersonId::new("a")]);
    }

    #[test]
    fn test_update_unknown_person_is_an_error() {
        let mut roster = roster_of(&["a"]);
        let err = roster
            .update(&PersonId::new("zz"), PersonUpdate::default())
            .unwrap_err();
        assert_eq!(err, RosterError::UnknownPerson(PersonId::new("zz")));
    }

    #[test]
    fn test_all_complete_requires_every_person() {
        let mut roster = roster_of(&["a", "b"]);
        assert!(roster.all_complete());

        roster
            .replace(vec![
                complete_person("a"),
                Person::new(PersonId::new("b"), "Bo", Gender::Children, AgeGroup::Child),
            ])
            .unwrap();
        assert!(!roster.all_complete());
        assert!(matches!(
            roster.ensure_checkout_ready(),
            Err(RosterError::NotReady { incomplete }) if incomplete == vec![PersonId::new("b")]
        ));
    }

    #[test]
    fn test_deserialize_clamps_stale_cursor() {
        let roster = roster_of(&["a", "b"]);
        let mut json = serde_json::to_value(&roster).unwrap();
        json["currentIndex"] = serde_json::json!(9);
        let restored: PersonRoster = serde_json::from_value(json).unwrap();
        assert_eq!(restored.current_index(), 1);
        assert_eq!(restored.people(), roster.people());
    }
}
