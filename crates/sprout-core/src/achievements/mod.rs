//! Achievement definitions and eligibility.
//!
//! Achievements are declared in the content pack as a table of
//! `id -> criteria`. Criteria form a closed set of pure predicates over the
//! attempt log, the streak and the unlock snapshot; each one also reports a
//! progress ratio for "almost there" hints.

mod evaluator;

pub use evaluator::{AchievementAward, AchievementEvaluator, AchievementProgress, EvaluationContext};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

use crate::attempt::completed_activities;
use crate::child::{AgeBand, ChildId};
use crate::content::{DifficultyTier, SubjectId};
use crate::unlock::subject_completion;

/// Unique identifier for an achievement definition
pub type AchievementId = String;

/// Category, in evaluation order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AchievementCategory {
    Milestone,
    Mastery,
    Streak,
    Exploration,
    Crown,
}

impl AchievementCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            AchievementCategory::Milestone => "milestone",
            AchievementCategory::Mastery => "mastery",
            AchievementCategory::Streak => "streak",
            AchievementCategory::Exploration => "exploration",
            AchievementCategory::Crown => "crown",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "milestone" => Some(AchievementCategory::Milestone),
            "mastery" => Some(AchievementCategory::Mastery),
            "streak" => Some(AchievementCategory::Streak),
            "exploration" => Some(AchievementCategory::Exploration),
            "crown" => Some(AchievementCategory::Crown),
            _ => None,
        }
    }
}

/// Declarative achievement predicate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum AchievementCriteria {
    FirstCompletion,
    TotalCompletions {
        count: u32,
    },
    PerfectScores {
        count: u32,
    },
    /// Longest run of consecutive 3-star attempts, optionally on one tier.
    ConsecutivePerfect {
        count: u32,
        #[serde(default)]
        tier: Option<DifficultyTier>,
    },
    StreakDays {
        days: u32,
    },
    /// Completion percentage of one subject, or of the best subject.
    SubjectCompletion {
        #[serde(default)]
        subject: Option<SubjectId>,
        percent: f64,
    },
    CrownCompletions {
        count: u32,
    },
    CrownUnlocked {
        count: u32,
    },
    DistinctSubjects {
        count: u32,
    },
}

impl AchievementCriteria {
    /// `(reached, target)` for this criterion.
    fn measure(&self, ctx: &EvaluationContext<'_>) -> (f64, f64) {
        match self {
            AchievementCriteria::FirstCompletion => (ctx.attempts.len().min(1) as f64, 1.0),
            AchievementCriteria::TotalCompletions { count } => {
                (ctx.attempts.len() as f64, *count as f64)
            }
            AchievementCriteria::PerfectScores { count } => {
                let perfect = ctx.attempts.iter().filter(|a| a.stars.is_perfect()).count();
                (perfect as f64, *count as f64)
            }
            AchievementCriteria::ConsecutivePerfect { count, tier } => {
                let mut best = 0usize;
                let mut run = 0usize;
                for attempt in ctx
                    .attempts
                    .iter()
                    .filter(|a| tier.map_or(true, |t| a.tier == t))
                {
                    run = if attempt.stars.is_perfect() { run + 1 } else { 0 };
                    best = best.max(run);
                }
                (best as f64, *count as f64)
            }
            AchievementCriteria::StreakDays { days } => {
                (ctx.streak.longest as f64, *days as f64)
            }
            AchievementCriteria::SubjectCompletion { subject, percent } => {
                let reached = match subject {
                    Some(subject) => subject_completion(ctx.graph, ctx.attempts, subject),
                    None => ctx
                        .graph
                        .subjects()
                        .iter()
                        .map(|s| subject_completion(ctx.graph, ctx.attempts, &s.id))
                        .fold(0.0, f64::max),
                };
                (reached, *percent)
            }
            AchievementCriteria::CrownCompletions { count } => {
                let completed = completed_activities(ctx.attempts);
                let crowns = completed
                    .iter()
                    .filter(|id| ctx.graph.activity(id).is_some_and(|a| a.crown_challenge))
                    .count();
                (crowns as f64, *count as f64)
            }
            AchievementCriteria::CrownUnlocked { count } => {
                let unlocked = ctx
                    .unlocks
                    .unlocked_ids()
                    .filter(|id| ctx.graph.activity(id).is_some_and(|a| a.crown_challenge))
                    .count();
                (unlocked as f64, *count as f64)
            }
            AchievementCriteria::DistinctSubjects { count } => {
                let subjects: HashSet<&str> =
                    ctx.attempts.iter().map(|a| a.subject_id.as_str()).collect();
                (subjects.len() as f64, *count as f64)
            }
        }
    }

    pub fn is_met(&self, ctx: &EvaluationContext<'_>) -> bool {
        let (reached, target) = self.measure(ctx);
        reached >= target
    }

    /// Progress toward the target, clamped to 0.0..=1.0.
    pub fn progress(&self, ctx: &EvaluationContext<'_>) -> f64 {
        let (reached, target) = self.measure(ctx);
        if target <= 0.0 {
            1.0
        } else {
            (reached / target).clamp(0.0, 1.0)
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AchievementDefinition {
    pub id: AchievementId,
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub category: AchievementCategory,
    /// Lower fires first within a category.
    #[serde(default)]
    pub priority: u32,
    /// Only children in this band can earn it. `None` targets everyone.
    #[serde(default)]
    pub age_band: Option<AgeBand>,
    pub criteria: AchievementCriteria,
    /// Celebration asset key. Defaults to `celebration.<category>`.
    #[serde(default)]
    pub celebration: Option<String>,
}

impl AchievementDefinition {
    pub fn targets(&self, band: AgeBand) -> bool {
        self.age_band.map_or(true, |b| b == band)
    }

    pub fn celebration_key(&self) -> String {
        self.celebration
            .clone()
            .unwrap_or_else(|| format!("celebration.{}", self.category.as_str()))
    }
}

/// An achievement a child has earned. At most one per (child, achievement).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EarnedAchievement {
    pub child_id: ChildId,
    pub achievement_id: AchievementId,
    pub earned_at: DateTime<Utc>,
}
