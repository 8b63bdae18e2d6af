//! # Sprout Core Library
//!
//! This library provides the offline progression and mastery engine for the
//! Sprout learning app: it turns completed activities into stars, difficulty
//! advice, unlocks, achievements and daily streaks. Presentation, audio and
//! accounts live elsewhere; the engine only hands back opaque keys.
//!
//! ## Architecture
//!
//! - **Content**: a TOML content pack validated into a prerequisite DAG
//! - **Pure evaluators**: scoring, difficulty, unlocks, achievements, streaks
//! - **Orchestrator**: one `process_completion` call per finished activity,
//!   committed atomically through a storage collaborator
//! - **Storage**: SQLite-backed progress store and TOML-based configuration
//!
//! ## Key Components
//!
//! - [`ProgressionEngine`]: Orchestrator and read-side queries
//! - [`ContentGraph`]: Validated curriculum graph
//! - [`SqliteStore`] / [`MemoryStore`]: [`ProgressStore`] implementations
//! - [`EngineConfig`]: Engine configuration management

pub mod achievements;
pub mod attempt;
pub mod child;
pub mod clock;
pub mod content;
pub mod difficulty;
pub mod engine;
pub mod error;
pub mod scoring;
pub mod storage;
pub mod streak;
pub mod unlock;

#[cfg(test)]
mod test_support;

pub use achievements::{
    AchievementAward, AchievementCategory, AchievementCriteria, AchievementDefinition,
    AchievementProgress, EarnedAchievement,
};
pub use attempt::AttemptRecord;
pub use child::{AgeBand, Child, Subscription};
pub use clock::{Clock, FixedClock, SystemClock};
pub use content::{Activity, ContentCatalog, ContentGraph, DifficultyTier, Subject};
pub use difficulty::{DifficultyAdviser, DifficultyRecommendation};
pub use engine::{Celebration, CrownChallengeInfo, ProgressionEngine, ProgressionResult, StreakOverview};
pub use error::{
    ConfigError, ContentGraphError, EntityKind, ProgressionError, Result, StorageError,
    ValidationError,
};
pub use scoring::{AttemptOutcome, ScoreResult, ScoringCalculator, StarRating};
pub use storage::{EngineConfig, MemoryStore, ProgressStore, SqliteStore};
pub use streak::{StreakState, StreakStatus, StreakTracker, StreakUpdate};
pub use unlock::{ActivityAccess, LockReason, UnlockReason, UnlockedActivityInfo};
