//! Core domain model for venue discovery: display cards, shelves and search criteria.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const CRATE_NAME: &str = "vdisc-core";

/// Image shown when a listing carries no usable photo.
pub const PLACEHOLDER_IMAGE: &str = "https://placehold.co/600x400?text=Venue";

pub const PLACEHOLDER_NAME: &str = "More venues coming soon";

/// Visibility of a card that survived normalization.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VenueStatus {
    Listed,
    InReview,
}

impl VenueStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            VenueStatus::Listed => "listed",
            VenueStatus::InReview => "in_review",
        }
    }
}

/// Display-ready projection of a listing record. Derived on every recompute, never stored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VenueCard {
    pub id: String,
    pub name: String,
    pub price: String,
    pub location: String,
    pub image: String,
    pub amenities: Vec<String>,
    pub rating: f64,
    pub status: VenueStatus,
    pub city_key: String,
    pub region_key: String,
    pub occasion_keys: Vec<String>,
    #[serde(default)]
    pub is_placeholder: bool,
}

impl VenueCard {
    /// Synthetic card padding a shelf. `n` is 1-based.
    pub fn placeholder(blueprint_id: &str, n: usize) -> Self {
        Self {
            id: placeholder_id(blueprint_id, n),
            name: PLACEHOLDER_NAME.to_string(),
            price: String::new(),
            location: String::new(),
            image: PLACEHOLDER_IMAGE.to_string(),
            amenities: Vec::new(),
            rating: 0.0,
            status: VenueStatus::Listed,
            city_key: String::new(),
            region_key: String::new(),
            occasion_keys: Vec::new(),
            is_placeholder: true,
        }
    }
}

pub fn placeholder_id(blueprint_id: &str, n: usize) -> String {
    format!("{blueprint_id}-placeholder-{n}")
}

/// Static description of a named shelf and how many slots it has.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SectionBlueprint {
    pub id: String,
    pub title: String,
    pub card_count: usize,
}

impl SectionBlueprint {
    pub fn new(id: impl Into<String>, title: impl Into<String>, card_count: usize) -> Self {
        Self {
            id: id.into(),
            title: title.into(),
            card_count,
        }
    }
}

/// A filled shelf. `venues.len() == blueprint.card_count` for every section the ranker emits.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Section {
    pub blueprint: SectionBlueprint,
    pub venues: Vec<VenueCard>,
}

impl Section {
    pub fn real_venue_count(&self) -> usize {
        self.venues.iter().filter(|v| !v.is_placeholder).count()
    }

    pub fn placeholder_count(&self) -> usize {
        self.venues.len() - self.real_venue_count()
    }
}

/// Stable logical id of a search input slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldId {
    Where,
    Occasion,
    When,
    Guest,
    Budget,
}

impl FieldId {
    pub const ALL: [FieldId; 5] = [
        FieldId::Where,
        FieldId::Occasion,
        FieldId::When,
        FieldId::Guest,
        FieldId::Budget,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            FieldId::Where => "where",
            FieldId::Occasion => "occasion",
            FieldId::When => "when",
            FieldId::Guest => "guest",
            FieldId::Budget => "budget",
        }
    }
}

impl fmt::Display for FieldId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown search field `{0}`")]
pub struct UnknownField(pub String);

impl FromStr for FieldId {
    type Err = UnknownField;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        FieldId::ALL
            .into_iter()
            .find(|f| f.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| UnknownField(s.to_string()))
    }
}

/// The five query values handed to the results page. Complete iff none is blank.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct SearchCriteria {
    #[serde(default)]
    pub r#where: String,
    #[serde(default)]
    pub occasion: String,
    #[serde(default)]
    pub when: String,
    #[serde(default)]
    pub guest: String,
    #[serde(default)]
    pub budget: String,
}

impl SearchCriteria {
    pub fn get(&self, field: FieldId) -> &str {
        match field {
            FieldId::Where => &self.r#where,
            FieldId::Occasion => &self.occasion,
            FieldId::When => &self.when,
            FieldId::Guest => &self.guest,
            FieldId::Budget => &self.budget,
        }
    }

    pub fn set(&mut self, field: FieldId, value: impl Into<String>) {
        let value = value.into();
        match field {
            FieldId::Where => self.r#where = value,
            FieldId::Occasion => self.occasion = value,
            FieldId::When => self.when = value,
            FieldId::Guest => self.guest = value,
            FieldId::Budget => self.budget = value,
        }
    }

    /// Fields that are empty after trimming, in slot order.
    pub fn missing_fields(&self) -> Vec<FieldId> {
        FieldId::ALL
            .into_iter()
            .filter(|f| self.get(*f).trim().is_empty())
            .collect()
    }

    pub fn is_complete(&self) -> bool {
        self.missing_fields().is_empty()
    }

    /// Copy with every value trimmed.
    pub fn trimmed(&self) -> Self {
        let mut out = Self::default();
        for field in FieldId::ALL {
            out.set(field, self.get(field).trim());
        }
        out
    }
}
