pub mod config;
pub mod database;
mod memory;
pub mod migrations;

pub use config::EngineConfig;
pub use database::SqliteStore;
pub use memory::MemoryStore;

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::achievements::EarnedAchievement;
use crate::attempt::AttemptRecord;
use crate::child::{Child, ChildId};
use crate::content::{DifficultyTier, SubjectId};
use crate::error::StorageError;
use crate::streak::StreakState;
use crate::unlock::UnlockEntry;

/// Returns `~/.config/sprout[-dev]/` based on SPROUT_ENV.
///
/// Set SPROUT_ENV=dev to use development data directory.
///
/// # Errors
/// Returns an error if creating the directory fails.
pub fn data_dir() -> Result<PathBuf, StorageError> {
    let base_dir = dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".config");

    let env = std::env::var("SPROUT_ENV").unwrap_or_else(|_| "production".to_string());

    let dir = if env == "dev" {
        base_dir.join("sprout-dev")
    } else {
        base_dir.join("sprout")
    };

    std::fs::create_dir_all(&dir).map_err(|e| StorageError::DataDir(e.to_string()))?;
    Ok(dir)
}

/// Everything one completed activity writes. Applied all-or-nothing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompletionCommit {
    pub child_id: ChildId,
    pub attempt: AttemptRecord,
    pub difficulty_change: Option<(SubjectId, DifficultyTier)>,
    pub new_unlocks: Vec<UnlockEntry>,
    /// Drop the child's cached unlocks first; `new_unlocks` is then the
    /// complete set. Used when the cache was built from other content.
    pub reset_unlocks: bool,
    pub new_achievements: Vec<EarnedAchievement>,
    pub streak: StreakState,
    /// Fingerprint of the content graph the unlocks were derived from.
    pub content_fingerprint: String,
}

/// Recomputed caches that replace whatever is stored for a child.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DerivedState {
    pub unlocks: Vec<UnlockEntry>,
    pub streak: StreakState,
    pub content_fingerprint: String,
}

/// Persistence seam for the progression engine.
///
/// Attempts are append-only and authoritative. Unlock entries, the streak
/// and the content fingerprint are caches that can be rebuilt from the log.
pub trait ProgressStore: Send + Sync {
    fn child(&self, child_id: &str) -> Result<Option<Child>, StorageError>;

    /// Insert or update a profile, including its difficulty map.
    fn save_child(&self, child: &Child) -> Result<(), StorageError>;

    fn list_children(&self) -> Result<Vec<Child>, StorageError>;

    fn set_difficulty(
        &self,
        child_id: &str,
        subject: &str,
        tier: DifficultyTier,
    ) -> Result<(), StorageError>;

    /// The child's attempts, oldest first.
    fn attempts(&self, child_id: &str) -> Result<Vec<AttemptRecord>, StorageError>;

    fn find_submission(
        &self,
        child_id: &str,
        submission_id: &str,
    ) -> Result<Option<AttemptRecord>, StorageError>;

    fn unlock_entries(&self, child_id: &str) -> Result<Vec<UnlockEntry>, StorageError>;

    fn earned_achievements(&self, child_id: &str) -> Result<Vec<EarnedAchievement>, StorageError>;

    fn streak(&self, child_id: &str) -> Result<Option<StreakState>, StorageError>;

    /// Fingerprint recorded with the child's unlock cache, if any.
    fn content_fingerprint(&self, child_id: &str) -> Result<Option<String>, StorageError>;

    /// Atomically apply one completion.
    fn commit_completion(&self, commit: &CompletionCommit) -> Result<(), StorageError>;

    /// Atomically replace the child's cached unlocks, streak and fingerprint.
    fn replace_derived_state(
        &self,
        child_id: &str,
        derived: &DerivedState,
    ) -> Result<(), StorageError>;
}
