//! Progression orchestrator.
//!
//! [`ProgressionEngine::process_completion`] is the single entry point per
//! completed activity. It scores the outcome, appends the attempt, consults
//! the difficulty adviser, recomputes unlocks, advances the streak,
//! evaluates achievements and commits everything through one
//! [`ProgressStore::commit_completion`] call. Completions for the same child
//! are serialized; different children proceed independently.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, PoisonError};

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::achievements::{
    AchievementAward, AchievementCategory, AchievementEvaluator, AchievementProgress,
    EvaluationContext,
};
use crate::attempt::{sort_chronologically, AttemptRecord};
use crate::child::{Child, ChildId};
use crate::clock::{Clock, SystemClock};
use crate::content::{Activity, ActivityId, ContentGraph, DifficultyTier};
use crate::difficulty::{DifficultyAdviser, DifficultyRecommendation};
use crate::error::{EntityKind, ProgressionError, Result, ValidationError};
use crate::scoring::{AttemptOutcome, ScoreResult, ScoringCalculator, StarRating};
use crate::storage::{CompletionCommit, DerivedState, EngineConfig, ProgressStore};
use crate::streak::{StreakChange, StreakState, StreakStatus, StreakTracker, StreakUpdate};
use crate::unlock::{
    crown_challenges, describe_unlocked, next_activity, ActivityAccess, MasteryStatus,
    UnlockEntry, UnlockResolver, UnlockSnapshot, UnlockedActivityInfo,
};

/// Opaque presentation keys for the post-activity celebration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Celebration {
    pub message_key: String,
    pub audio_key: String,
}

/// Everything the presentation layer needs after one completion.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgressionResult {
    pub attempt: AttemptRecord,
    pub stars: StarRating,
    pub score: ScoreResult,
    /// Activities unlocked by this completion, in curriculum order.
    pub new_unlocks: Vec<ActivityId>,
    pub new_achievements: Vec<AchievementAward>,
    pub streak_update: StreakUpdate,
    pub streak: StreakState,
    pub difficulty: DifficultyRecommendation,
    /// Whether the recommendation was written to the child profile.
    pub difficulty_applied: bool,
    pub celebration: Celebration,
    /// The submission id was seen before; nothing was written.
    pub replayed: bool,
}

/// Crown challenge with its gate state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CrownChallengeInfo {
    pub activity: Activity,
    pub access: ActivityAccess,
    pub mastery: Option<MasteryStatus>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StreakOverview {
    pub state: StreakState,
    pub status: StreakStatus,
}

/// Per-child state loaded for one operation.
struct ChildView {
    child: Child,
    attempts: Vec<AttemptRecord>,
    cached: Vec<UnlockEntry>,
    /// Cached unlocks were derived from the loaded content.
    cache_current: bool,
}

impl ChildView {
    fn retained(&self) -> HashSet<&str> {
        if self.cache_current {
            self.cached.iter().map(|e| e.activity_id.as_str()).collect()
        } else {
            HashSet::new()
        }
    }
}

pub struct ProgressionEngine<S, C = SystemClock> {
    graph: ContentGraph,
    store: S,
    clock: C,
    config: EngineConfig,
    child_locks: Mutex<HashMap<ChildId, Arc<Mutex<()>>>>,
}

impl<S: ProgressStore> ProgressionEngine<S, SystemClock> {
    pub fn new(graph: ContentGraph, store: S, config: EngineConfig) -> Self {
        Self::with_clock(graph, store, SystemClock, config)
    }
}

impl<S: ProgressStore, C: Clock> ProgressionEngine<S, C> {
    pub fn with_clock(graph: ContentGraph, store: S, clock: C, config: EngineConfig) -> Self {
        Self {
            graph,
            store,
            clock,
            config,
            child_locks: Mutex::new(HashMap::new()),
        }
    }

    pub fn graph(&self) -> &ContentGraph {
        &self.graph
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn clock(&self) -> &C {
        &self.clock
    }

    fn child_lock(&self, child_id: &str) -> Arc<Mutex<()>> {
        let mut locks = self
            .child_locks
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        locks.entry(child_id.to_string()).or_default().clone()
    }

    fn activity(&self, activity_id: &str) -> Result<&Activity> {
        self.graph
            .activity(activity_id)
            .ok_or_else(|| ProgressionError::not_found(EntityKind::Activity, activity_id))
    }

    fn require_subject(&self, subject: &str) -> Result<()> {
        match self.graph.subject(subject) {
            Some(_) => Ok(()),
            None => Err(ProgressionError::not_found(EntityKind::Subject, subject)),
        }
    }

    fn load_child(&self, child_id: &str) -> Result<Child> {
        self.store
            .child(child_id)?
            .ok_or_else(|| ProgressionError::not_found(EntityKind::Child, child_id))
    }

    fn load_view(&self, child_id: &str) -> Result<ChildView> {
        let child = self.load_child(child_id)?;
        let mut attempts = self.store.attempts(child_id)?;
        sort_chronologically(&mut attempts);
        let cached = self.store.unlock_entries(child_id)?;
        let cache_current = match self.store.content_fingerprint(child_id)? {
            Some(stored) if stored != self.graph.fingerprint() => {
                debug!(child_id, "unlock cache built from other content, ignoring it");
                false
            }
            _ => true,
        };
        Ok(ChildView {
            child,
            attempts,
            cached,
            cache_current,
        })
    }

    fn resolver(&self) -> UnlockResolver<'_> {
        UnlockResolver::new(&self.graph, &self.config.unlock)
    }

    /// Insert or update a child profile. Re-registering with an empty
    /// difficulty map keeps the tiers already stored for the child.
    pub fn register_child(&self, child: &Child) -> Result<()> {
        if child.id.trim().is_empty() {
            return Err(ValidationError::invalid("id", "must not be empty").into());
        }
        if child.display_name.trim().is_empty() {
            return Err(ValidationError::invalid("display_name", "must not be empty").into());
        }
        if child.age_years > 18 {
            return Err(ValidationError::invalid(
                "age_years",
                format!("{} is not a plausible age", child.age_years),
            )
            .into());
        }
        let lock = self.child_lock(&child.id);
        let _guard = lock.lock().unwrap_or_else(PoisonError::into_inner);
        match self.store.child(&child.id)? {
            Some(stored) if child.difficulty.is_empty() && !stored.difficulty.is_empty() => {
                let mut merged = child.clone();
                merged.difficulty = stored.difficulty;
                self.store.save_child(&merged)?;
                debug!(child_id = %child.id, "kept stored difficulty tiers");
            }
            _ => self.store.save_child(child)?,
        }
        info!(child_id = %child.id, age = child.age_years, "child profile saved");
        Ok(())
    }

    pub fn child(&self, child_id: &str) -> Result<Child> {
        self.load_child(child_id)
    }

    pub fn list_children(&self) -> Result<Vec<Child>> {
        Ok(self.store.list_children()?)
    }

    /// Record a completed activity and derive everything that follows from it.
    ///
    /// # Errors
    ///
    /// `InvalidInput` and `NotFound` are returned before anything is written.
    /// A `Storage` error means nothing was written and the caller should retry.
    pub fn process_completion(
        &self,
        child_id: &str,
        activity_id: &str,
        outcome: &AttemptOutcome,
    ) -> Result<ProgressionResult> {
        let activity = self.activity(activity_id)?;
        let scorer = ScoringCalculator::new();
        let mut outcome = outcome.clone();
        if outcome.expected_time_seconds.is_none() {
            outcome.expected_time_seconds = activity.expected_time_seconds;
        }
        let score = scorer.score(&outcome)?;

        let lock = self.child_lock(child_id);
        let _guard = lock.lock().unwrap_or_else(PoisonError::into_inner);

        if let Some(submission_id) = outcome.submission_id.as_deref() {
            if let Some(existing) = self.store.find_submission(child_id, submission_id)? {
                debug!(child_id, submission_id, "submission already recorded, replaying");
                return self.replayed_result(child_id, existing, &outcome);
            }
        }

        let mut view = self.load_view(child_id)?;
        let now = self.clock.now();
        let retained_before: HashSet<String> =
            view.retained().into_iter().map(str::to_string).collect();
        let before = {
            let retained: HashSet<&str> = retained_before.iter().map(String::as_str).collect();
            self.resolver().resolve(&view.child, &view.attempts, &retained)
        };
        if !before.is_unlocked(&activity.id) {
            warn!(child_id, activity_id, "completion recorded for an activity that was locked");
        }

        let attempt = AttemptRecord {
            id: uuid::Uuid::new_v4().to_string(),
            child_id: child_id.to_string(),
            activity_id: activity.id.clone(),
            subject_id: activity.subject.clone(),
            tier: activity.tier,
            completed_at: now,
            error_count: score.error_count,
            time_spent_seconds: outcome.time_spent_seconds,
            total_questions: outcome.total_questions,
            correct_answers: outcome
                .correct_answers
                .unwrap_or_else(|| outcome.total_questions.saturating_sub(score.error_count)),
            stars: score.stars,
            session_id: outcome.session_id.clone(),
            submission_id: outcome.submission_id.clone(),
        };
        view.attempts.push(attempt.clone());
        sort_chronologically(&mut view.attempts);
        debug!(child_id, activity_id, stars = score.stars.value(), "attempt scored");

        // Difficulty
        let current_tier = view.child.difficulty_for(&activity.subject);
        let adviser = DifficultyAdviser::new(self.config.difficulty.clone());
        let difficulty = adviser.advise(&activity.subject, current_tier, &view.attempts, now);
        let difficulty_applied = difficulty.changed && self.config.auto_apply_difficulty;
        if difficulty_applied {
            view.child
                .difficulty
                .insert(activity.subject.clone(), difficulty.recommended_tier);
        }

        // Unlocks
        let after = {
            let retained: HashSet<&str> = retained_before.iter().map(String::as_str).collect();
            self.resolver().resolve(&view.child, &view.attempts, &retained)
        };
        let new_unlocks = after.newly_unlocked(&before);
        let (unlock_entries, reset_unlocks) = self.unlock_entries_to_store(&view, &after, now);

        // Streak, before achievements so streak criteria see today's length.
        let streak_change = self.advance_streak(child_id, &view, &attempt, &after)?;

        // Achievements
        let earned = self.store.earned_achievements(child_id)?;
        let earned_ids: HashSet<&str> = earned.iter().map(|e| e.achievement_id.as_str()).collect();
        let new_achievements = {
            let ctx = EvaluationContext {
                graph: &self.graph,
                attempts: &view.attempts,
                streak: &streak_change.state,
                unlocks: &after,
            };
            AchievementEvaluator::new(self.graph.achievements(), &self.config.achievements)
                .evaluate(&view.child, &ctx, &earned_ids, now)
        };

        let commit = CompletionCommit {
            child_id: child_id.to_string(),
            attempt: attempt.clone(),
            difficulty_change: difficulty_applied
                .then(|| (activity.subject.clone(), difficulty.recommended_tier)),
            new_unlocks: unlock_entries,
            reset_unlocks,
            new_achievements: new_achievements.iter().map(|a| a.earned.clone()).collect(),
            streak: streak_change.state.clone(),
            content_fingerprint: self.graph.fingerprint().to_string(),
        };
        if let Err(err) = self.store.commit_completion(&commit) {
            warn!(child_id, activity_id, error = %err, "completion aborted, nothing was written");
            return Err(err.into());
        }

        if difficulty_applied {
            info!(
                child_id,
                subject = %activity.subject,
                from = current_tier.as_str(),
                to = difficulty.recommended_tier.as_str(),
                "difficulty tier changed"
            );
        }
        for unlocked in &new_unlocks {
            info!(child_id, activity_id = %unlocked, "activity unlocked");
        }
        for award in &new_achievements {
            info!(child_id, achievement_id = %award.earned.achievement_id, "achievement earned");
        }

        let celebration = celebration_for(
            score.stars,
            &new_achievements,
            &new_unlocks,
            &streak_change.update,
        );
        Ok(ProgressionResult {
            stars: score.stars,
            score,
            attempt,
            new_unlocks,
            new_achievements,
            streak_update: streak_change.update,
            streak: streak_change.state,
            difficulty,
            difficulty_applied,
            celebration,
            replayed: false,
        })
    }

    /// Unlock rows to persist. With a current cache only the additions are
    /// written; otherwise the whole set replaces the stale rows.
    fn unlock_entries_to_store(
        &self,
        view: &ChildView,
        after: &UnlockSnapshot,
        now: DateTime<Utc>,
    ) -> (Vec<UnlockEntry>, bool) {
        let cached_at: HashMap<&str, DateTime<Utc>> = view
            .cached
            .iter()
            .map(|e| (e.activity_id.as_str(), e.unlocked_at))
            .collect();
        let entries = after
            .unlocked_ids()
            .filter(|id| !view.cache_current || !cached_at.contains_key(id))
            .filter_map(|id| {
                after.reason(id).map(|reason| UnlockEntry {
                    activity_id: id.to_string(),
                    reason,
                    unlocked_at: cached_at.get(id).copied().unwrap_or(now),
                })
            })
            .collect();
        (entries, !view.cache_current)
    }

    fn advance_streak(
        &self,
        child_id: &str,
        view: &ChildView,
        attempt: &AttemptRecord,
        after: &UnlockSnapshot,
    ) -> Result<StreakChange> {
        let tracker = StreakTracker::new();
        let offset = self.config.streak.offset();
        let day = attempt.local_date(offset);
        let prior = self.stored_streak(
            child_id,
            view.attempts.iter().filter(|a| a.id != attempt.id),
        )?;
        let mut change = tracker.record(&prior, day);

        let backdated = prior.last_activity_date.is_some_and(|last| day < last);
        if backdated {
            // An older day may bridge a gap; recount from the whole log.
            change.state = tracker.rebuild(view.attempts.iter().map(|a| a.local_date(offset)));
            debug!(child_id, %day, "backdated attempt, streak rebuilt from log");
        }

        if let StreakUpdate::Broken { recovery, .. } = &mut change.update {
            recovery.suggested_activity =
                self.recovery_activity(after, &attempt.subject_id).map(|a| a.id.clone());
            info!(child_id, "streak broken, recovery offered");
        }
        Ok(change)
    }

    /// Cached streak, or one recounted from `attempts` when the row is missing.
    fn stored_streak<'a>(
        &self,
        child_id: &str,
        attempts: impl IntoIterator<Item = &'a AttemptRecord>,
    ) -> Result<StreakState> {
        if let Some(state) = self.store.streak(child_id)? {
            return Ok(state);
        }
        debug!(child_id, "no cached streak, recounting from log");
        let offset = self.config.streak.offset();
        Ok(StreakTracker::new().rebuild(attempts.into_iter().map(|a| a.local_date(offset))))
    }

    /// Lowest-sequence unlocked Easy activity in the subject.
    fn recovery_activity(&self, snapshot: &UnlockSnapshot, subject: &str) -> Option<&Activity> {
        self.graph.activities_in_subject(subject).find(|a| {
            a.tier == DifficultyTier::Easy && !a.crown_challenge && snapshot.is_unlocked(&a.id)
        })
    }

    fn replayed_result(
        &self,
        child_id: &str,
        existing: AttemptRecord,
        outcome: &AttemptOutcome,
    ) -> Result<ProgressionResult> {
        let child = self.load_child(child_id)?;
        let attempts = self.store.attempts(child_id)?;
        let streak = self.stored_streak(child_id, &attempts)?;
        let replay_outcome = AttemptOutcome {
            total_questions: existing.total_questions,
            correct_answers: Some(existing.correct_answers),
            error_count: Some(existing.error_count as i32),
            time_spent_seconds: existing.time_spent_seconds,
            expected_time_seconds: outcome.expected_time_seconds,
            session_id: existing.session_id.clone(),
            submission_id: existing.submission_id.clone(),
        };
        let score = ScoringCalculator::new().score(&replay_outcome)?;
        let current = child.difficulty_for(&existing.subject_id);
        let difficulty = DifficultyAdviser::new(self.config.difficulty.clone()).advise(
            &existing.subject_id,
            current,
            &attempts,
            self.clock.now(),
        );
        Ok(ProgressionResult {
            stars: existing.stars,
            celebration: celebration_for(existing.stars, &[], &[], &StreakUpdate::AlreadyCounted),
            attempt: existing,
            score,
            new_unlocks: Vec::new(),
            new_achievements: Vec::new(),
            streak_update: StreakUpdate::AlreadyCounted,
            streak,
            difficulty,
            difficulty_applied: false,
            replayed: true,
        })
    }

    fn snapshot(&self, view: &ChildView) -> UnlockSnapshot {
        self.resolver()
            .resolve(&view.child, &view.attempts, &view.retained())
    }

    /// Unlocked activities, optionally for one subject, in curriculum order.
    pub fn get_unlocked_activities(
        &self,
        child_id: &str,
        subject: Option<&str>,
    ) -> Result<Vec<UnlockedActivityInfo>> {
        if let Some(subject) = subject {
            self.require_subject(subject)?;
        }
        let view = self.load_view(child_id)?;
        let snapshot = self.snapshot(&view);
        let cached: &[UnlockEntry] = if view.cache_current { &view.cached } else { &[] };
        Ok(describe_unlocked(
            &self.graph,
            &snapshot,
            cached,
            &view.attempts,
            subject,
            self.clock.now(),
        ))
    }

    /// Lowest-sequence unlocked, unattempted, non-crown activity.
    pub fn get_next_recommended_activity(
        &self,
        child_id: &str,
        subject: &str,
    ) -> Result<Option<Activity>> {
        self.require_subject(subject)?;
        let view = self.load_view(child_id)?;
        let snapshot = self.snapshot(&view);
        Ok(next_activity(&self.graph, &snapshot, &view.attempts, subject).cloned())
    }

    pub fn get_crown_challenges(
        &self,
        child_id: &str,
        subject: &str,
    ) -> Result<Vec<CrownChallengeInfo>> {
        self.require_subject(subject)?;
        let view = self.load_view(child_id)?;
        let snapshot = self.snapshot(&view);
        let mastery = self.resolver().mastery_status(subject, &view.attempts);
        Ok(crown_challenges(&self.graph, &snapshot, subject)
            .into_iter()
            .map(|(activity, access)| CrownChallengeInfo {
                activity: activity.clone(),
                access,
                mastery: Some(mastery.clone()),
            })
            .collect())
    }

    pub fn get_streak_status(&self, child_id: &str) -> Result<StreakOverview> {
        let view = self.load_view(child_id)?;
        let offset = self.config.streak.offset();
        let state = self.stored_streak(child_id, &view.attempts)?;
        let today: NaiveDate = self.clock.now().with_timezone(&offset).date_naive();
        let mut status = StreakTracker::new().status(&state, today);
        if let StreakStatus::Broken { recovery, .. } = &mut status {
            if let Some(last) = view.attempts.last() {
                let snapshot = self.snapshot(&view);
                recovery.suggested_activity = self
                    .recovery_activity(&snapshot, &last.subject_id)
                    .map(|a| a.id.clone());
            }
        }
        Ok(StreakOverview { state, status })
    }

    /// Progress toward every achievement the child can earn. Read-only.
    pub fn get_achievement_progress(
        &self,
        child_id: &str,
        category: Option<AchievementCategory>,
    ) -> Result<Vec<AchievementProgress>> {
        let view = self.load_view(child_id)?;
        let snapshot = self.snapshot(&view);
        let streak = self.stored_streak(child_id, &view.attempts)?;
        let earned = self.store.earned_achievements(child_id)?;
        let earned_ids: HashSet<&str> = earned.iter().map(|e| e.achievement_id.as_str()).collect();
        let ctx = EvaluationContext {
            graph: &self.graph,
            attempts: &view.attempts,
            streak: &streak,
            unlocks: &snapshot,
        };
        Ok(
            AchievementEvaluator::new(self.graph.achievements(), &self.config.achievements)
                .progress(&view.child, &ctx, &earned_ids, category),
        )
    }

    /// Current recommendation for a subject without applying it.
    pub fn recommend_difficulty(
        &self,
        child_id: &str,
        subject: &str,
    ) -> Result<DifficultyRecommendation> {
        self.require_subject(subject)?;
        let child = self.load_child(child_id)?;
        let mut attempts = self.store.attempts(child_id)?;
        sort_chronologically(&mut attempts);
        Ok(DifficultyAdviser::new(self.config.difficulty.clone()).advise(
            subject,
            child.difficulty_for(subject),
            &attempts,
            self.clock.now(),
        ))
    }

    /// Parental override of a subject's tier.
    pub fn set_difficulty(&self, child_id: &str, subject: &str, tier: DifficultyTier) -> Result<()> {
        self.require_subject(subject)?;
        let lock = self.child_lock(child_id);
        let _guard = lock.lock().unwrap_or_else(PoisonError::into_inner);
        self.load_child(child_id)?;
        self.store.set_difficulty(child_id, subject, tier)?;
        info!(child_id, subject, tier = tier.as_str(), "difficulty set manually");
        Ok(())
    }

    /// Recompute the unlock cache and streak from the attempt log and
    /// replace the stored copies.
    pub fn rebuild_derived_state(&self, child_id: &str) -> Result<DerivedState> {
        let lock = self.child_lock(child_id);
        let _guard = lock.lock().unwrap_or_else(PoisonError::into_inner);
        let view = self.load_view(child_id)?;
        let snapshot = self.snapshot(&view);
        let now = self.clock.now();
        let cached_at: HashMap<&str, DateTime<Utc>> = view
            .cached
            .iter()
            .map(|e| (e.activity_id.as_str(), e.unlocked_at))
            .collect();
        let unlocks = snapshot
            .unlocked_ids()
            .filter_map(|id| {
                snapshot.reason(id).map(|reason| UnlockEntry {
                    activity_id: id.to_string(),
                    reason,
                    unlocked_at: cached_at.get(id).copied().unwrap_or(now),
                })
            })
            .collect();
        let offset = self.config.streak.offset();
        let streak = StreakTracker::new().rebuild(view.attempts.iter().map(|a| a.local_date(offset)));
        let derived = DerivedState {
            unlocks,
            streak,
            content_fingerprint: self.graph.fingerprint().to_string(),
        };
        self.store.replace_derived_state(child_id, &derived)?;
        info!(
            child_id,
            unlocks = derived.unlocks.len(),
            streak = derived.streak.current,
            "derived state rebuilt"
        );
        Ok(derived)
    }
}

fn celebration_for(
    stars: StarRating,
    achievements: &[AchievementAward],
    unlocks: &[ActivityId],
    streak: &StreakUpdate,
) -> Celebration {
    let message_key = if let Some(first) = achievements.first() {
        first.celebration_key.clone()
    } else if !unlocks.is_empty() {
        "celebration.unlock".to_string()
    } else if let StreakUpdate::Extended { days } = streak {
        format!("celebration.streak.{days}")
    } else {
        format!("celebration.{}_star", stars.value())
    };
    Celebration {
        message_key,
        audio_key: format!("audio.stars.{}", stars.value()),
    }
}
