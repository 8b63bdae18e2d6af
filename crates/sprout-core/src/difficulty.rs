//! Difficulty adviser.
//!
//! Recommends the tier for a child's next content in a subject from recent
//! star ratings. The adviser only recommends; the engine decides whether to
//! apply the recommendation to the child profile.
//!
//! Evidence is the trailing run of consecutive attempts at the child's
//! current tier inside the window. A tier change needs at least
//! `confirm_count` such attempts, and each of the latest `confirm_count`
//! must individually agree with the run mean, so one outlier never moves
//! the tier. Anything short of that holds the current tier.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::attempt::{subject_attempts, AttemptRecord};
use crate::content::{DifficultyTier, SubjectId};
use crate::storage::config::DifficultyConfig;

/// Why the adviser reached its recommendation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AdviceReason {
    /// Not enough consecutive attempts at the current tier.
    InsufficientEvidence,
    Escalate,
    Deescalate,
    /// Escalation earned but already at Hard.
    AtCeiling,
    /// De-escalation earned but already at Easy.
    AtFloor,
    Steady,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DifficultyRecommendation {
    pub subject_id: SubjectId,
    pub current_tier: DifficultyTier,
    pub recommended_tier: DifficultyTier,
    /// Window fullness, 0.0 to 1.0.
    pub confidence: f64,
    pub changed: bool,
    /// Mean stars over the evidence run, if any.
    pub mean_stars: Option<f64>,
    /// Length of the evidence run.
    pub evidence: usize,
    pub reason: AdviceReason,
}

pub struct DifficultyAdviser {
    config: DifficultyConfig,
}

impl DifficultyAdviser {
    pub fn new(config: DifficultyConfig) -> Self {
        Self { config }
    }

    /// Recommend a tier for `subject`. `attempts` is the child's full log,
    /// oldest first.
    pub fn advise(
        &self,
        subject: &str,
        current: DifficultyTier,
        attempts: &[AttemptRecord],
        now: DateTime<Utc>,
    ) -> DifficultyRecommendation {
        let cutoff = now - Duration::days(self.config.window_days.max(0));
        let window: Vec<&AttemptRecord> = subject_attempts(attempts, subject)
            .rev()
            .filter(|a| a.completed_at >= cutoff)
            .take(self.config.window_size)
            .collect();

        let confidence = if self.config.window_size == 0 {
            0.0
        } else {
            (window.len() as f64 / self.config.window_size as f64).min(1.0)
        };

        // Newest first.
        let run: Vec<f64> = window
            .iter()
            .take_while(|a| a.tier == current)
            .map(|a| a.stars.value() as f64)
            .collect();
        let confirm = self.config.confirm_count.max(1);

        let hold = |reason, mean_stars| DifficultyRecommendation {
            subject_id: subject.to_string(),
            current_tier: current,
            recommended_tier: current,
            confidence,
            changed: false,
            mean_stars,
            evidence: run.len(),
            reason,
        };

        if run.len() < confirm {
            return hold(AdviceReason::InsufficientEvidence, None);
        }

        let mean = run.iter().sum::<f64>() / run.len() as f64;
        let latest = &run[..confirm];

        let (recommended, reason) = if mean >= self.config.escalate_threshold
            && latest.iter().all(|s| *s >= self.config.escalate_threshold)
        {
            if current == DifficultyTier::Hard {
                (current, AdviceReason::AtCeiling)
            } else {
                (current.harder(), AdviceReason::Escalate)
            }
        } else if mean <= self.config.deescalate_threshold
            && latest.iter().all(|s| *s <= self.config.deescalate_threshold)
        {
            if current == DifficultyTier::Easy {
                (current, AdviceReason::AtFloor)
            } else {
                (current.easier(), AdviceReason::Deescalate)
            }
        } else {
            return hold(AdviceReason::Steady, Some(mean));
        };

        DifficultyRecommendation {
            subject_id: subject.to_string(),
            current_tier: current,
            recommended_tier: recommended,
            confidence,
            changed: recommended != current,
            mean_stars: Some(mean),
            evidence: run.len(),
            reason,
        }
    }
}
