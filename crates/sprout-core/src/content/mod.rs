//! Static curriculum content: subjects, activities and the prerequisite graph.
//!
//! Content is reference data. It is loaded once from a TOML content pack
//! ([`ContentCatalog`]) and validated into a [`ContentGraph`] before any
//! child-specific decision is made.

mod catalog;
mod graph;

pub use catalog::ContentCatalog;
pub use graph::ContentGraph;

use serde::{Deserialize, Serialize};

/// Unique identifier for a subject
pub type SubjectId = String;

/// Unique identifier for an activity
pub type ActivityId = String;

/// Difficulty tier of an activity, and the per-subject setting of a child.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DifficultyTier {
    Easy,
    Medium,
    Hard,
}

impl DifficultyTier {
    /// One tier up, capped at Hard.
    pub fn harder(self) -> Self {
        match self {
            DifficultyTier::Easy => DifficultyTier::Medium,
            DifficultyTier::Medium | DifficultyTier::Hard => DifficultyTier::Hard,
        }
    }

    /// One tier down, floored at Easy.
    pub fn easier(self) -> Self {
        match self {
            DifficultyTier::Hard => DifficultyTier::Medium,
            DifficultyTier::Medium | DifficultyTier::Easy => DifficultyTier::Easy,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            DifficultyTier::Easy => "easy",
            DifficultyTier::Medium => "medium",
            DifficultyTier::Hard => "hard",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.to_ascii_lowercase().as_str() {
            "easy" => Some(DifficultyTier::Easy),
            "medium" => Some(DifficultyTier::Medium),
            "hard" => Some(DifficultyTier::Hard),
            _ => None,
        }
    }
}

impl Default for DifficultyTier {
    fn default() -> Self {
        DifficultyTier::Easy
    }
}

/// A subject and its curriculum sequence.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Subject {
    pub id: SubjectId,
    pub name: String,
    /// Ordered curriculum sequence. Activities of this subject that are not
    /// listed here are ordered after the listed ones, in declaration order.
    #[serde(default)]
    pub sequence: Vec<ActivityId>,
}

/// One discrete learning exercise.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Activity {
    pub id: ActivityId,
    pub subject: SubjectId,
    #[serde(default)]
    pub title: String,
    pub tier: DifficultyTier,
    #[serde(default = "default_min_age")]
    pub min_age: u8,
    #[serde(default = "default_max_age")]
    pub max_age: u8,
    #[serde(default)]
    pub prerequisites: Vec<ActivityId>,
    #[serde(default)]
    pub crown_challenge: bool,
    #[serde(default = "default_true")]
    pub published: bool,
    /// Expected completion time, used only for encouragement copy.
    #[serde(default)]
    pub expected_time_seconds: Option<u32>,
}

impl Activity {
    /// Whether a child of `age_years` falls inside `[min_age, max_age]`.
    pub fn accepts_age(&self, age_years: u8) -> bool {
        age_years >= self.min_age && age_years <= self.max_age
    }
}

fn default_min_age() -> u8 {
    3
}
fn default_max_age() -> u8 {
    8
}
fn default_true() -> bool {
    true
}
