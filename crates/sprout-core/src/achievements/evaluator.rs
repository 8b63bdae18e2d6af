//! Achievement evaluation.
//!
//! Evaluation walks the not-yet-earned definitions in a fixed order
//! (category, then priority, then id) so that awards made by one call come
//! out in a stable, reviewable sequence. Already-earned definitions are
//! skipped, which makes repeated evaluation a no-op.

use std::collections::HashSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{AchievementCategory, AchievementDefinition, EarnedAchievement};
use crate::attempt::AttemptRecord;
use crate::child::Child;
use crate::content::ContentGraph;
use crate::storage::config::AchievementConfig;
use crate::streak::StreakState;
use crate::unlock::UnlockSnapshot;

/// Everything a criterion may look at.
pub struct EvaluationContext<'a> {
    pub graph: &'a ContentGraph,
    /// The child's full attempt log, oldest first.
    pub attempts: &'a [AttemptRecord],
    pub streak: &'a StreakState,
    pub unlocks: &'a UnlockSnapshot,
}

/// A newly earned achievement with its celebration keys.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AchievementAward {
    pub earned: EarnedAchievement,
    pub name: String,
    pub category: AchievementCategory,
    pub celebration_key: String,
    pub audio_key: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AchievementProgress {
    pub achievement: AchievementDefinition,
    pub progress_ratio: f64,
    pub earned: bool,
    /// Unearned and past the near-miss threshold.
    pub almost_there: bool,
}

pub struct AchievementEvaluator<'a> {
    definitions: Vec<&'a AchievementDefinition>,
    config: &'a AchievementConfig,
}

impl<'a> AchievementEvaluator<'a> {
    pub fn new(definitions: &'a [AchievementDefinition], config: &'a AchievementConfig) -> Self {
        let mut definitions: Vec<&AchievementDefinition> = definitions.iter().collect();
        definitions.sort_by(|a, b| {
            (a.category, a.priority, &a.id).cmp(&(b.category, b.priority, &b.id))
        });
        Self {
            definitions,
            config,
        }
    }

    /// Newly satisfied achievements, in evaluation order.
    pub fn evaluate(
        &self,
        child: &Child,
        ctx: &EvaluationContext<'_>,
        earned: &HashSet<&str>,
        now: DateTime<Utc>,
    ) -> Vec<AchievementAward> {
        let band = child.age_band();
        self.definitions
            .iter()
            .filter(|def| !earned.contains(def.id.as_str()) && def.targets(band))
            .filter(|def| def.criteria.is_met(ctx))
            .map(|def| AchievementAward {
                earned: EarnedAchievement {
                    child_id: child.id.clone(),
                    achievement_id: def.id.clone(),
                    earned_at: now,
                },
                name: def.name.clone(),
                category: def.category,
                celebration_key: def.celebration_key(),
                audio_key: format!("audio.achievement.{}", def.category.as_str()),
            })
            .collect()
    }

    /// Progress for every definition targeting the child. Read-only.
    pub fn progress(
        &self,
        child: &Child,
        ctx: &EvaluationContext<'_>,
        earned: &HashSet<&str>,
        category: Option<AchievementCategory>,
    ) -> Vec<AchievementProgress> {
        let band = child.age_band();
        self.definitions
            .iter()
            .filter(|def| def.targets(band))
            .filter(|def| category.map_or(true, |c| def.category == c))
            .map(|def| {
                let is_earned = earned.contains(def.id.as_str());
                let progress_ratio = if is_earned {
                    1.0
                } else {
                    def.criteria.progress(ctx)
                };
                AchievementProgress {
                    achievement: (*def).clone(),
                    progress_ratio,
                    earned: is_earned,
                    almost_there: !is_earned
                        && progress_ratio >= self.config.near_miss_threshold
                        && progress_ratio < 1.0,
                }
            })
            .collect()
    }
}
