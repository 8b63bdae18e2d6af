//! Unlock resolver.
//!
//! Per (child, activity) the state machine is `Locked -> Unlocked`, with no
//! way back. An activity unlocks when, in order:
//!
//! 1. it is published,
//! 2. the child's age is inside `[min_age, max_age]`,
//! 3. the subscription covers it (trial profiles get the first
//!    `free_activities_per_subject` of each subject),
//! 4. every prerequisite has a completed attempt,
//! 5. for crown challenges only, the subject shows mastery.
//!
//! Anything previously unlocked or already completed stays unlocked even if
//! a later age or subscription change would fail the rule.

use std::collections::{HashMap, HashSet, VecDeque};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::attempt::{completed_activities, subject_attempts, AttemptRecord};
use crate::child::{Child, Subscription};
use crate::content::{Activity, ActivityId, ContentGraph, DifficultyTier, SubjectId};
use crate::storage::config::UnlockConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnlockReason {
    /// No prerequisites; available from the start.
    EntryPoint,
    PrerequisitesMet,
    /// Crown challenge gate passed.
    MasteryDemonstrated,
    /// Kept from an earlier unlock or completion.
    Retained,
}

impl UnlockReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            UnlockReason::EntryPoint => "entry_point",
            UnlockReason::PrerequisitesMet => "prerequisites_met",
            UnlockReason::MasteryDemonstrated => "mastery_demonstrated",
            UnlockReason::Retained => "retained",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "entry_point" => Some(UnlockReason::EntryPoint),
            "prerequisites_met" => Some(UnlockReason::PrerequisitesMet),
            "mastery_demonstrated" => Some(UnlockReason::MasteryDemonstrated),
            "retained" => Some(UnlockReason::Retained),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum LockReason {
    Unpublished,
    AgeRestricted { min_age: u8, max_age: u8 },
    PremiumGated,
    PrerequisitesMissing { missing: Vec<ActivityId> },
    MasteryRequired { mean_stars: Option<f64>, perfect_run: usize },
    /// The subject's content failed validation.
    ContentUnavailable,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum ActivityAccess {
    Unlocked { reason: UnlockReason },
    Locked { reason: LockReason },
}

impl ActivityAccess {
    pub fn is_unlocked(&self) -> bool {
        matches!(self, ActivityAccess::Unlocked { .. })
    }
}

/// Persisted unlock cache entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UnlockEntry {
    pub activity_id: ActivityId,
    pub reason: UnlockReason,
    pub unlocked_at: DateTime<Utc>,
}

/// Unlocked activity as shown to callers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UnlockedActivityInfo {
    pub activity: Activity,
    pub reason: UnlockReason,
    pub unlocked_at: DateTime<Utc>,
    pub completed: bool,
}

/// Crown-challenge mastery evidence for one subject.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MasteryStatus {
    pub mean_stars: Option<f64>,
    /// Trailing run of 3-star completions on the tier below Hard.
    pub perfect_run: usize,
    /// Both thresholds held at some point in the log. Latches: later
    /// attempts never clear it.
    pub achieved: bool,
}

/// Resolved access for every activity, for one child at one point in the log.
#[derive(Debug, Clone, Default)]
pub struct UnlockSnapshot {
    access: HashMap<ActivityId, ActivityAccess>,
    /// Activity ids in topological order.
    order: Vec<ActivityId>,
    mastery: HashMap<SubjectId, MasteryStatus>,
}

impl UnlockSnapshot {
    pub fn access(&self, activity: &str) -> Option<&ActivityAccess> {
        self.access.get(activity)
    }

    pub fn is_unlocked(&self, activity: &str) -> bool {
        self.access
            .get(activity)
            .is_some_and(ActivityAccess::is_unlocked)
    }

    pub fn reason(&self, activity: &str) -> Option<UnlockReason> {
        match self.access.get(activity) {
            Some(ActivityAccess::Unlocked { reason }) => Some(*reason),
            _ => None,
        }
    }

    /// Unlocked activity ids in topological order.
    pub fn unlocked_ids(&self) -> impl Iterator<Item = &str> + '_ {
        self.order
            .iter()
            .filter(|id| self.is_unlocked(id))
            .map(String::as_str)
    }

    /// Activities unlocked here that were not unlocked in `before`.
    pub fn newly_unlocked(&self, before: &UnlockSnapshot) -> Vec<ActivityId> {
        self.unlocked_ids()
            .filter(|id| !before.is_unlocked(id))
            .map(str::to_string)
            .collect()
    }

    pub fn mastery(&self, subject: &str) -> Option<&MasteryStatus> {
        self.mastery.get(subject)
    }
}

pub struct UnlockResolver<'a> {
    graph: &'a ContentGraph,
    config: &'a UnlockConfig,
}

impl<'a> UnlockResolver<'a> {
    pub fn new(graph: &'a ContentGraph, config: &'a UnlockConfig) -> Self {
        Self { graph, config }
    }

    /// Resolve access for every activity. `retained` holds ids the child
    /// had already unlocked (from the persisted cache).
    pub fn resolve(
        &self,
        child: &Child,
        attempts: &[AttemptRecord],
        retained: &HashSet<&str>,
    ) -> UnlockSnapshot {
        let completed = completed_activities(attempts);
        let mut snapshot = UnlockSnapshot::default();

        for activity in self.graph.topological() {
            let kept = retained.contains(activity.id.as_str())
                || completed.contains(activity.id.as_str());

            let access = if self.graph.is_quarantined(&activity.subject) {
                if kept {
                    ActivityAccess::Unlocked {
                        reason: UnlockReason::Retained,
                    }
                } else {
                    ActivityAccess::Locked {
                        reason: LockReason::ContentUnavailable,
                    }
                }
            } else {
                match self.evaluate(activity, child, attempts, &completed, &mut snapshot.mastery) {
                    Ok(reason) => ActivityAccess::Unlocked { reason },
                    Err(_) if kept => ActivityAccess::Unlocked {
                        reason: UnlockReason::Retained,
                    },
                    Err(reason) => ActivityAccess::Locked { reason },
                }
            };

            snapshot.order.push(activity.id.clone());
            snapshot.access.insert(activity.id.clone(), access);
        }

        snapshot
    }

    fn evaluate(
        &self,
        activity: &Activity,
        child: &Child,
        attempts: &[AttemptRecord],
        completed: &HashSet<&str>,
        mastery: &mut HashMap<SubjectId, MasteryStatus>,
    ) -> Result<UnlockReason, LockReason> {
        if !activity.published {
            return Err(LockReason::Unpublished);
        }
        if !activity.accepts_age(child.age_years) {
            return Err(LockReason::AgeRestricted {
                min_age: activity.min_age,
                max_age: activity.max_age,
            });
        }
        if child.subscription == Subscription::Trial {
            let position = self.graph.sequence_position(&activity.id).unwrap_or(usize::MAX);
            if position >= self.config.free_activities_per_subject {
                return Err(LockReason::PremiumGated);
            }
        }

        let missing: Vec<ActivityId> = activity
            .prerequisites
            .iter()
            .filter(|p| !completed.contains(p.as_str()))
            .cloned()
            .collect();
        if !missing.is_empty() {
            return Err(LockReason::PrerequisitesMissing { missing });
        }

        if activity.crown_challenge {
            let status = mastery
                .entry(activity.subject.clone())
                .or_insert_with(|| self.mastery_status(&activity.subject, attempts));
            if !status.achieved {
                return Err(LockReason::MasteryRequired {
                    mean_stars: status.mean_stars,
                    perfect_run: status.perfect_run,
                });
            }
            return Ok(UnlockReason::MasteryDemonstrated);
        }

        if activity.prerequisites.is_empty() {
            Ok(UnlockReason::EntryPoint)
        } else {
            Ok(UnlockReason::PrerequisitesMet)
        }
    }

    /// Mastery evidence for a subject, replaying the child's log in order.
    /// `mean_stars` and `perfect_run` describe the latest window.
    pub fn mastery_status(&self, subject: &str, attempts: &[AttemptRecord]) -> MasteryStatus {
        let window = self.config.crown_window.max(1);
        let below_hard = DifficultyTier::Hard.easier();
        let mut recent: VecDeque<u8> = VecDeque::with_capacity(window);
        let mut perfect_run = 0usize;
        let mut achieved = false;

        for attempt in subject_attempts(attempts, subject) {
            if recent.len() == window {
                recent.pop_front();
            }
            recent.push_back(attempt.stars.value());
            if attempt.tier == below_hard {
                perfect_run = if attempt.stars.is_perfect() { perfect_run + 1 } else { 0 };
            }
            achieved = achieved
                || (mean(&recent) >= self.config.crown_mastery_threshold
                    && perfect_run >= self.config.crown_perfect_run);
        }

        MasteryStatus {
            mean_stars: (!recent.is_empty()).then(|| mean(&recent)),
            perfect_run,
            achieved,
        }
    }
}

fn mean(stars: &VecDeque<u8>) -> f64 {
    if stars.is_empty() {
        return 0.0;
    }
    stars.iter().map(|&s| f64::from(s)).sum::<f64>() / stars.len() as f64
}

/// First unlocked, not-yet-attempted, non-crown activity of a subject in
/// curriculum order.
pub fn next_activity<'g>(
    graph: &'g ContentGraph,
    snapshot: &UnlockSnapshot,
    attempts: &[AttemptRecord],
    subject: &str,
) -> Option<&'g Activity> {
    let attempted = completed_activities(attempts);
    graph.activities_in_subject(subject).find(|a| {
        !a.crown_challenge && snapshot.is_unlocked(&a.id) && !attempted.contains(a.id.as_str())
    })
}

/// Crown challenges of a subject with their current access.
pub fn crown_challenges<'g>(
    graph: &'g ContentGraph,
    snapshot: &UnlockSnapshot,
    subject: &str,
) -> Vec<(&'g Activity, ActivityAccess)> {
    graph
        .activities_in_subject(subject)
        .filter(|a| a.crown_challenge)
        .filter_map(|a| snapshot.access(&a.id).map(|access| (a, access.clone())))
        .collect()
}

/// Percentage (0-100) of a subject's published non-crown activities that
/// have been completed.
pub fn subject_completion(graph: &ContentGraph, attempts: &[AttemptRecord], subject: &str) -> f64 {
    let completed = completed_activities(attempts);
    let (done, total) = graph
        .activities_in_subject(subject)
        .filter(|a| a.published && !a.crown_challenge)
        .fold((0usize, 0usize), |(done, total), a| {
            let hit = completed.contains(a.id.as_str()) as usize;
            (done + hit, total + 1)
        });
    if total == 0 {
        0.0
    } else {
        done as f64 * 100.0 / total as f64
    }
}

/// Describe the unlocked activities, optionally for one subject, in
/// curriculum order. Unlock times come from the persisted cache; activities
/// unlocked by the current log but not yet cached use `now`.
pub fn describe_unlocked(
    graph: &ContentGraph,
    snapshot: &UnlockSnapshot,
    cached: &[UnlockEntry],
    attempts: &[AttemptRecord],
    subject: Option<&str>,
    now: DateTime<Utc>,
) -> Vec<UnlockedActivityInfo> {
    let completed = completed_activities(attempts);
    let unlocked_at: HashMap<&str, DateTime<Utc>> = cached
        .iter()
        .map(|e| (e.activity_id.as_str(), e.unlocked_at))
        .collect();

    graph
        .subjects()
        .iter()
        .filter(|s| subject.map_or(true, |wanted| s.id == wanted))
        .flat_map(|s| graph.activities_in_subject(&s.id))
        .filter_map(|activity| {
            let reason = snapshot.reason(&activity.id)?;
            Some(UnlockedActivityInfo {
                activity: activity.clone(),
                reason,
                unlocked_at: unlocked_at
                    .get(activity.id.as_str())
                    .copied()
                    .unwrap_or(now),
                completed: completed.contains(activity.id.as_str()),
            })
        })
        .collect()
}
