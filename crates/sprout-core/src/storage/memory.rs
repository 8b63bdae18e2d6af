//! In-process progress store.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard};

use super::{CompletionCommit, DerivedState, ProgressStore};
use crate::achievements::EarnedAchievement;
use crate::attempt::{sort_chronologically, AttemptRecord};
use crate::child::{Child, ChildId};
use crate::content::DifficultyTier;
use crate::error::StorageError;
use crate::streak::StreakState;
use crate::unlock::UnlockEntry;

#[derive(Debug, Default, Clone)]
struct ChildRecord {
    profile: Option<Child>,
    attempts: Vec<AttemptRecord>,
    unlocks: Vec<UnlockEntry>,
    achievements: Vec<EarnedAchievement>,
    streak: Option<StreakState>,
    fingerprint: Option<String>,
}

/// Progress store held in memory. Writes are applied to a copy of the
/// child's record and swapped in, so a failed commit leaves nothing behind.
#[derive(Debug, Default)]
pub struct MemoryStore {
    children: Mutex<HashMap<ChildId, ChildRecord>>,
    fail_commits: AtomicBool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every following commit fail with a retryable error until reset.
    pub fn fail_commits(&self, fail: bool) {
        self.fail_commits.store(fail, Ordering::SeqCst);
    }

    fn lock(&self) -> Result<MutexGuard<'_, HashMap<ChildId, ChildRecord>>, StorageError> {
        self.children
            .lock()
            .map_err(|_| StorageError::QueryFailed("store mutex poisoned".to_string()))
    }

    fn read<T>(&self, child_id: &str, f: impl FnOnce(&ChildRecord) -> T) -> Result<T, StorageError> {
        let children = self.lock()?;
        let empty = ChildRecord::default();
        Ok(f(children.get(child_id).unwrap_or(&empty)))
    }

    fn write(
        &self,
        child_id: &str,
        f: impl FnOnce(&mut ChildRecord) -> Result<(), StorageError>,
    ) -> Result<(), StorageError> {
        let mut children = self.lock()?;
        let mut staged = children.get(child_id).cloned().unwrap_or_default();
        f(&mut staged)?;
        if self.fail_commits.load(Ordering::SeqCst) {
            return Err(StorageError::TransactionAborted(
                "injected commit failure".to_string(),
            ));
        }
        children.insert(child_id.to_string(), staged);
        Ok(())
    }
}

fn require_profile(record: &ChildRecord, child_id: &str) -> Result<(), StorageError> {
    match record.profile {
        Some(_) => Ok(()),
        None => Err(StorageError::QueryFailed(format!(
            "no child profile for '{child_id}'"
        ))),
    }
}

impl ProgressStore for MemoryStore {
    fn child(&self, child_id: &str) -> Result<Option<Child>, StorageError> {
        self.read(child_id, |r| r.profile.clone())
    }

    fn save_child(&self, child: &Child) -> Result<(), StorageError> {
        self.write(&child.id, |r| {
            r.profile = Some(child.clone());
            Ok(())
        })
    }

    fn list_children(&self) -> Result<Vec<Child>, StorageError> {
        let children = self.lock()?;
        let mut profiles: Vec<Child> = children.values().filter_map(|r| r.profile.clone()).collect();
        profiles.sort_by(|a, b| (a.created_at, &a.id).cmp(&(b.created_at, &b.id)));
        Ok(profiles)
    }

    fn set_difficulty(
        &self,
        child_id: &str,
        subject: &str,
        tier: DifficultyTier,
    ) -> Result<(), StorageError> {
        self.write(child_id, |r| {
            require_profile(r, child_id)?;
            if let Some(profile) = r.profile.as_mut() {
                profile.difficulty.insert(subject.to_string(), tier);
            }
            Ok(())
        })
    }

    fn attempts(&self, child_id: &str) -> Result<Vec<AttemptRecord>, StorageError> {
        self.read(child_id, |r| r.attempts.clone())
    }

    fn find_submission(
        &self,
        child_id: &str,
        submission_id: &str,
    ) -> Result<Option<AttemptRecord>, StorageError> {
        self.read(child_id, |r| {
            r.attempts
                .iter()
                .find(|a| a.submission_id.as_deref() == Some(submission_id))
                .cloned()
        })
    }

    fn unlock_entries(&self, child_id: &str) -> Result<Vec<UnlockEntry>, StorageError> {
        self.read(child_id, |r| r.unlocks.clone())
    }

    fn earned_achievements(&self, child_id: &str) -> Result<Vec<EarnedAchievement>, StorageError> {
        self.read(child_id, |r| r.achievements.clone())
    }

    fn streak(&self, child_id: &str) -> Result<Option<StreakState>, StorageError> {
        self.read(child_id, |r| r.streak.clone())
    }

    fn content_fingerprint(&self, child_id: &str) -> Result<Option<String>, StorageError> {
        self.read(child_id, |r| r.fingerprint.clone())
    }

    fn commit_completion(&self, commit: &CompletionCommit) -> Result<(), StorageError> {
        self.write(&commit.child_id, |r| {
            require_profile(r, &commit.child_id)?;
            if r.attempts.iter().any(|a| a.id == commit.attempt.id) {
                return Err(StorageError::TransactionAborted(format!(
                    "duplicate attempt id '{}'",
                    commit.attempt.id
                )));
            }
            r.attempts.push(commit.attempt.clone());
            sort_chronologically(&mut r.attempts);

            if let (Some((subject, tier)), Some(profile)) =
                (&commit.difficulty_change, r.profile.as_mut())
            {
                profile.difficulty.insert(subject.clone(), *tier);
            }
            if commit.reset_unlocks {
                r.unlocks.clear();
            }
            for entry in &commit.new_unlocks {
                if !r.unlocks.iter().any(|e| e.activity_id == entry.activity_id) {
                    r.unlocks.push(entry.clone());
                }
            }
            for earned in &commit.new_achievements {
                if !r
                    .achievements
                    .iter()
                    .any(|e| e.achievement_id == earned.achievement_id)
                {
                    r.achievements.push(earned.clone());
                }
            }
            r.streak = Some(commit.streak.clone());
            r.fingerprint = Some(commit.content_fingerprint.clone());
            Ok(())
        })
    }

    fn replace_derived_state(
        &self,
        child_id: &str,
        derived: &DerivedState,
    ) -> Result<(), StorageError> {
        self.write(child_id, |r| {
            require_profile(r, child_id)?;
            r.unlocks = derived.unlocks.clone();
            r.streak = Some(derived.streak.clone());
            r.fingerprint = Some(derived.content_fingerprint.clone());
            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::child::Subscription;
    use crate::scoring::StarRating;
    use crate::test_support::attempt_at;
    use chrono::{TimeZone, Utc};

    fn commit() -> CompletionCommit {
        let at = Utc.with_ymd_and_hms(2026, 2, 2, 10, 0, 0).unwrap();
        CompletionCommit {
            child_id: "kid".into(),
            attempt: attempt_at("m1", "math", DifficultyTier::Easy, StarRating::Three, at),
            difficulty_change: None,
            new_unlocks: Vec::new(),
            reset_unlocks: false,
            new_achievements: Vec::new(),
            streak: StreakState::default(),
            content_fingerprint: "fp".into(),
        }
    }

    #[test]
    fn injected_failure_leaves_no_trace() {
        let store = MemoryStore::new();
        store
            .save_child(&Child::new("kid", "Kid", 4, Subscription::Trial, Utc::now()))
            .unwrap();

        store.fail_commits(true);
        let err = store.commit_completion(&commit()).unwrap_err();
        assert!(err.is_retryable());
        assert!(store.attempts("kid").unwrap().is_empty());
        assert_eq!(store.content_fingerprint("kid").unwrap(), None);

        store.fail_commits(false);
        store.commit_completion(&commit()).unwrap();
        assert_eq!(store.attempts("kid").unwrap().len(), 1);
    }

    #[test]
    fn commit_requires_profile() {
        let store = MemoryStore::new();
        assert!(store.commit_completion(&commit()).is_err());
        assert!(store.list_children().unwrap().is_empty());
    }
}
