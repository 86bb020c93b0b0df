//! A person being outfitted, and the completion policy.

use std::collections::BTreeMap;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::types::PersonId;

/// Size literal that requires measurements.
pub const CUSTOM_SIZE: &str = "Custom";

/// Named body dimension → value.
pub type Measurements = BTreeMap<String, Decimal>;

/// Garment line the person is outfitted from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Gender {
    Men,
    Women,
    Children,
}

/// Age group used for pricing and sizing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AgeGroup {
    Adult,
    Child,
}

/// One individual in a roster.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Person {
    pub id: PersonId,
    pub name: String,
    pub gender: Gender,
    pub age_group: AgeGroup,
    #[serde(default)]
    pub design_id: Option<String>,
    #[serde(default)]
    pub size: Option<String>,
    #[serde(default)]
    pub measurements: Option<Measurements>,
}

impl Person {
    /// A person with nothing chosen yet.
    #[must_use]
    pub fn new(id: PersonId, name: impl Into<String>, gender: Gender, age_group: AgeGroup) -> Self {
        Self {
            id,
            name: name.into(),
            gender,
            age_group,
            design_id: None,
            size: None,
            measurements: None,
        }
    }

    /// Whether the chosen size is the custom-fit literal.
    #[must_use]
    pub fn is_custom_size(&self) -> bool {
        self.size.as_deref() == Some(CUSTOM_SIZE)
    }

    /// The completion policy.
    ///
    /// A person is complete iff a design is chosen, a size is chosen, and a
    /// custom size comes with at least one measurement.
    #[must_use]
    pub fn is_complete(&self) -> bool {
        let has_measurements = self.measurements.as_ref().is_some_and(|m| !m.is_empty());
        self.design_id.is_some() && self.size.is_some() && (!self.is_custom_size() || has_measurements)
    }

    /// Merge a partial update into this person.
    pub fn apply(&mut self, update: PersonUpdate) {
        let PersonUpdate {
            name,
            gender,
            age_group,
            design_id,
            size,
            measurements,
            clear_design,
            clear_size,
            clear_measurements,
        } = update;

        if let Some(name) = name {
            self.name = name;
        }
        if let Some(gender) = gender {
            self.gender = gender;
        }
        if let Some(age_group) = age_group {
            self.age_group = age_group;
        }
        if clear_design {
            self.design_id = None;
        }
        if let Some(design_id) = design_id {
            self.design_id = Some(design_id);
        }
        if clear_size {
            self.size = None;
        }
        if let Some(size) = size {
            self.size = Some(size);
        }
        if clear_measurements {
            self.measurements = None;
        }
        if let Some(measurements) = measurements {
            self.measurements = Some(measurements);
        }
    }
}

/// Partial update for a [`Person`].
///
/// `Some` fields overwrite; the `clear_*` flags reset optional choices and are
/// applied before any value supplied in the same update.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PersonUpdate {
    pub name: Option<String>,
    pub gender: Option<Gender>,
    pub age_group: Option<AgeGroup>,
    pub design_id: Option<String>,
    pub size: Option<String>,
    pub measurements: Option<Measurements>,
    pub clear_design: bool,
    pub clear_size: bool,
    pub clear_measurements: bool,
}
