//! Child profiles.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::content::{DifficultyTier, SubjectId};

/// Unique identifier for a child profile
pub type ChildId = String;

/// Coarse age grouping used to target achievements and copy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgeBand {
    PreK,
    Kindergarten,
    Primary,
}

impl AgeBand {
    pub fn from_age(age_years: u8) -> Self {
        match age_years {
            0..=4 => AgeBand::PreK,
            5 => AgeBand::Kindergarten,
            _ => AgeBand::Primary,
        }
    }
}

/// Subscription status. Trial profiles see a bounded prefix of each subject.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Subscription {
    Trial,
    Premium,
}

impl Subscription {
    pub fn as_str(&self) -> &'static str {
        match self {
            Subscription::Trial => "trial",
            Subscription::Premium => "premium",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "trial" => Some(Subscription::Trial),
            "premium" => Some(Subscription::Premium),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Child {
    pub id: ChildId,
    pub display_name: String,
    pub age_years: u8,
    pub language: String,
    pub subscription: Subscription,
    /// Current per-subject difficulty. Missing subjects are `Easy`.
    #[serde(default)]
    pub difficulty: HashMap<SubjectId, DifficultyTier>,
    pub created_at: DateTime<Utc>,
}

impl Child {
    pub fn new(
        id: impl Into<ChildId>,
        display_name: impl Into<String>,
        age_years: u8,
        subscription: Subscription,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: id.into(),
            display_name: display_name.into(),
            age_years,
            language: "en".to_string(),
            subscription,
            difficulty: HashMap::new(),
            created_at,
        }
    }

    pub fn age_band(&self) -> AgeBand {
        AgeBand::from_age(self.age_years)
    }

    pub fn difficulty_for(&self, subject: &str) -> DifficultyTier {
        self.difficulty.get(subject).copied().unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn age_bands() {
        assert_eq!(AgeBand::from_age(3), AgeBand::PreK);
        assert_eq!(AgeBand::from_age(4), AgeBand::PreK);
        assert_eq!(AgeBand::from_age(5), AgeBand::Kindergarten);
        assert_eq!(AgeBand::from_age(6), AgeBand::Primary);
        assert_eq!(AgeBand::from_age(8), AgeBand::Primary);
    }

    #[test]
    fn missing_subject_difficulty_defaults_to_easy() {
        let mut child = Child::new("kid", "Kid", 5, Subscription::Trial, Utc::now());
        assert_eq!(child.difficulty_for("math"), DifficultyTier::Easy);
        child.difficulty.insert("math".into(), DifficultyTier::Hard);
        assert_eq!(child.difficulty_for("math"), DifficultyTier::Hard);
    }
}
