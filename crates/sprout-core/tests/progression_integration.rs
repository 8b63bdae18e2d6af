//! End-to-end progression flows against the in-memory store.

mod common;

use std::collections::HashSet;

use chrono::Duration;
use common::{add_child, at, engine_with, perfect, with_errors};
use sprout_core::difficulty::AdviceReason;
use sprout_core::storage::DerivedState;
use sprout_core::unlock::UnlockResolver;
use sprout_core::{
    ActivityAccess, AchievementCategory, DifficultyTier, EngineConfig, LockReason, MemoryStore,
    ProgressStore, ProgressionError, StarRating, StreakState, StreakStatus, StreakUpdate,
    Subscription, UnlockReason,
};

fn ids<'a>(items: impl IntoIterator<Item = &'a String>) -> Vec<&'a str> {
    items.into_iter().map(String::as_str).collect()
}

#[test]
fn scenario_a_first_completion_unlocks_dependant() {
    let engine = engine_with(MemoryStore::new(), EngineConfig::default());
    add_child(&engine, "ada", 5, Subscription::Premium);

    let result = engine.process_completion("ada", "count-to-5", &perfect()).unwrap();

    assert_eq!(result.stars, StarRating::Three);
    assert!(result.score.passed);
    assert_eq!(ids(&result.new_unlocks), vec!["count-to-10"]);

    let unlocked = engine.get_unlocked_activities("ada", Some("math")).unwrap();
    let first = unlocked.iter().find(|u| u.activity.id == "count-to-5").unwrap();
    assert!(first.completed);
    let second = unlocked.iter().find(|u| u.activity.id == "count-to-10").unwrap();
    assert_eq!(second.reason, UnlockReason::PrerequisitesMet);
    assert!(!second.completed);
}

#[test]
fn scenario_b_hard_run_holds_tier_and_grants_mastery() {
    let engine = engine_with(MemoryStore::new(), EngineConfig::default());
    add_child(&engine, "ben", 7, Subscription::Premium);
    engine.set_difficulty("ben", "math", DifficultyTier::Hard).unwrap();

    let mut last = None;
    for activity in ["add-within-10", "missing-number", "add-within-10"] {
        last = Some(engine.process_completion("ben", activity, &perfect()).unwrap());
    }
    let last = last.unwrap();

    assert_eq!(last.difficulty.recommended_tier, DifficultyTier::Hard);
    assert_eq!(last.difficulty.reason, AdviceReason::AtCeiling);
    assert!(!last.difficulty.changed);

    let awarded: Vec<&str> = last
        .new_achievements
        .iter()
        .map(|a| a.earned.achievement_id.as_str())
        .collect();
    assert_eq!(awarded, vec!["triple-perfect", "hard-hat-trick"]);
    assert!(last
        .new_achievements
        .iter()
        .all(|a| a.category == AchievementCategory::Mastery));
}

#[test]
fn scenario_c_skipped_day_breaks_streak() {
    let engine = engine_with(MemoryStore::new(), EngineConfig::default());
    add_child(&engine, "cy", 6, Subscription::Premium);

    engine.clock().set(at(1, 9));
    let day1 = engine.process_completion("cy", "count-to-5", &perfect()).unwrap();
    assert_eq!(day1.streak_update, StreakUpdate::Started);

    engine.clock().set(at(2, 9));
    let day2 = engine.process_completion("cy", "count-to-10", &perfect()).unwrap();
    assert_eq!(day2.streak_update, StreakUpdate::Extended { days: 2 });

    engine.clock().set(at(4, 9));
    let overview = engine.get_streak_status("cy").unwrap();
    match overview.status {
        StreakStatus::Broken {
            previous_length,
            longest,
            recovery,
        } => {
            assert_eq!(previous_length, 2);
            assert_eq!(longest, 2);
            assert_eq!(recovery.suggested_activity.as_deref(), Some("count-to-5"));
        }
        other => panic!("expected broken streak, got {other:?}"),
    }

    let day4 = engine.process_completion("cy", "more-or-less", &perfect()).unwrap();
    match &day4.streak_update {
        StreakUpdate::Broken {
            previous_length,
            missed_days,
            recovery,
        } => {
            assert_eq!(*previous_length, 2);
            assert_eq!(*missed_days, 1);
            assert_eq!(recovery.suggested_activity.as_deref(), Some("count-to-5"));
        }
        other => panic!("expected broken update, got {other:?}"),
    }
    assert_eq!(day4.streak.current, 1);
    assert_eq!(day4.streak.longest, 2);
}

#[test]
fn scenario_d_trial_child_is_premium_gated() {
    let engine = engine_with(MemoryStore::new(), EngineConfig::default());
    add_child(&engine, "dee", 6, Subscription::Trial);

    for activity in ["count-to-5", "count-to-10", "more-or-less"] {
        engine.process_completion("dee", activity, &perfect()).unwrap();
    }

    let unlocked = engine.get_unlocked_activities("dee", Some("math")).unwrap();
    let unlocked: Vec<&str> = unlocked.iter().map(|u| u.activity.id.as_str()).collect();
    assert_eq!(unlocked, vec!["count-to-5", "count-to-10", "more-or-less"]);
    assert_eq!(engine.get_next_recommended_activity("dee", "math").unwrap(), None);

    let child = engine.child("dee").unwrap();
    let attempts = engine.store().attempts("dee").unwrap();
    let snapshot = UnlockResolver::new(engine.graph(), &engine.config().unlock).resolve(
        &child,
        &attempts,
        &HashSet::new(),
    );
    assert_eq!(
        snapshot.access("add-within-5"),
        Some(&ActivityAccess::Locked {
            reason: LockReason::PremiumGated
        })
    );
}

#[test]
fn achievements_never_fire_twice() {
    let engine = engine_with(MemoryStore::new(), EngineConfig::default());
    add_child(&engine, "eve", 5, Subscription::Premium);

    let first = engine.process_completion("eve", "count-to-5", &with_errors(1)).unwrap();
    assert_eq!(first.new_achievements.len(), 1);
    let second = engine.process_completion("eve", "count-to-5", &with_errors(1)).unwrap();
    assert!(second.new_achievements.is_empty());

    let earned = engine.store().earned_achievements("eve").unwrap();
    assert_eq!(earned.len(), 1);

    let milestones = engine
        .get_achievement_progress("eve", Some(AchievementCategory::Milestone))
        .unwrap();
    assert!(milestones[0].earned);
    assert!((milestones[1].progress_ratio - 0.2).abs() < 1e-9);
    assert!(!milestones[1].almost_there);
}

#[test]
fn same_day_attempts_count_once() {
    let engine = engine_with(MemoryStore::new(), EngineConfig::default());
    add_child(&engine, "fin", 5, Subscription::Premium);

    engine.process_completion("fin", "count-to-5", &perfect()).unwrap();
    engine.clock().advance(Duration::hours(2));
    let again = engine.process_completion("fin", "count-to-10", &perfect()).unwrap();

    assert_eq!(again.streak_update, StreakUpdate::AlreadyCounted);
    assert_eq!(again.streak.current, 1);
}

#[test]
fn single_bad_attempt_does_not_deescalate() {
    let config = EngineConfig {
        auto_apply_difficulty: false,
        ..EngineConfig::default()
    };
    let engine = engine_with(MemoryStore::new(), config);
    add_child(&engine, "gus", 6, Subscription::Premium);
    engine.set_difficulty("gus", "math", DifficultyTier::Medium).unwrap();

    for _ in 0..3 {
        engine.process_completion("gus", "add-within-5", &perfect()).unwrap();
    }
    let slip = engine.process_completion("gus", "add-within-5", &with_errors(4)).unwrap();

    assert_eq!(slip.stars, StarRating::One);
    assert_eq!(slip.difficulty.recommended_tier, DifficultyTier::Medium);
    assert!(!slip.difficulty.changed);
    assert!(!slip.difficulty_applied);
    assert_eq!(engine.child("gus").unwrap().difficulty_for("math"), DifficultyTier::Medium);
}

#[test]
fn storage_failure_aborts_everything() {
    let engine = engine_with(MemoryStore::new(), EngineConfig::default());
    add_child(&engine, "hal", 5, Subscription::Premium);

    engine.store().fail_commits(true);
    let err = engine.process_completion("hal", "count-to-5", &perfect()).unwrap_err();
    assert!(matches!(err, ProgressionError::Storage(_)));
    assert!(err.is_retryable());

    let store = engine.store();
    assert!(store.attempts("hal").unwrap().is_empty());
    assert!(store.unlock_entries("hal").unwrap().is_empty());
    assert!(store.earned_achievements("hal").unwrap().is_empty());
    assert_eq!(store.streak("hal").unwrap(), None);

    store.fail_commits(false);
    let retried = engine.process_completion("hal", "count-to-5", &perfect()).unwrap();
    assert_eq!(retried.new_achievements.len(), 1);
    assert_eq!(store.attempts("hal").unwrap().len(), 1);
}

#[test]
fn resubmitted_submission_is_replayed() {
    let engine = engine_with(MemoryStore::new(), EngineConfig::default());
    add_child(&engine, "ivy", 5, Subscription::Premium);
    let outcome = sprout_core::AttemptOutcome {
        submission_id: Some("tablet-42".into()),
        ..with_errors(2)
    };

    let first = engine.process_completion("ivy", "count-to-5", &outcome).unwrap();
    let second = engine.process_completion("ivy", "count-to-5", &outcome).unwrap();

    assert!(!first.replayed);
    assert!(second.replayed);
    assert_eq!(second.stars, StarRating::Two);
    assert_eq!(second.attempt.id, first.attempt.id);
    assert!(second.new_unlocks.is_empty());
    assert!(second.new_achievements.is_empty());
    assert_eq!(engine.store().attempts("ivy").unwrap().len(), 1);
}

#[test]
fn invalid_outcome_changes_nothing() {
    let engine = engine_with(MemoryStore::new(), EngineConfig::default());
    add_child(&engine, "jo", 5, Subscription::Premium);
    let outcome = sprout_core::AttemptOutcome {
        total_questions: 3,
        correct_answers: Some(4),
        ..Default::default()
    };

    let err = engine.process_completion("jo", "count-to-5", &outcome).unwrap_err();
    assert!(matches!(err, ProgressionError::InvalidInput(_)));
    assert!(!err.is_retryable());
    assert!(engine.store().attempts("jo").unwrap().is_empty());
}

#[test]
fn rebuild_restores_lost_caches() {
    let engine = engine_with(MemoryStore::new(), EngineConfig::default());
    add_child(&engine, "kai", 5, Subscription::Premium);

    engine.clock().set(at(1, 9));
    engine.process_completion("kai", "count-to-5", &perfect()).unwrap();
    engine.clock().set(at(2, 9));
    engine.process_completion("kai", "count-to-10", &perfect()).unwrap();

    let wiped = DerivedState {
        unlocks: Vec::new(),
        streak: StreakState::default(),
        content_fingerprint: engine.graph().fingerprint().to_string(),
    };
    engine.store().replace_derived_state("kai", &wiped).unwrap();

    let rebuilt = engine.rebuild_derived_state("kai").unwrap();
    assert_eq!(rebuilt.streak.current, 2);
    assert_eq!(rebuilt.streak.longest, 2);
    let unlocked: Vec<&str> = rebuilt.unlocks.iter().map(|u| u.activity_id.as_str()).collect();
    assert!(unlocked.contains(&"count-to-5"));
    assert!(unlocked.contains(&"count-to-10"));
    assert!(unlocked.contains(&"more-or-less"));
    assert_eq!(engine.store().streak("kai").unwrap(), Some(rebuilt.streak.clone()));
}

#[test]
fn crown_challenge_opens_after_mastery() {
    let engine = engine_with(MemoryStore::new(), EngineConfig::default());
    add_child(&engine, "liv", 6, Subscription::Premium);

    let path = [
        "count-to-5",
        "count-to-10",
        "more-or-less",
        "add-within-5",
        "subtract-within-5",
        "number-bonds",
    ];
    let mut opened = Vec::new();
    for activity in path {
        let result = engine.process_completion("liv", activity, &perfect()).unwrap();
        opened.extend(result.new_unlocks);
    }

    let crowns = engine.get_crown_challenges("liv", "math").unwrap();
    assert_eq!(crowns.len(), 1);
    assert!(crowns[0].access.is_unlocked());
    assert!(crowns[0].mastery.as_ref().unwrap().achieved);
    assert!(opened.iter().any(|id| id == "math-crown"));

    let reading = engine.get_crown_challenges("liv", "reading").unwrap();
    assert!(!reading[0].access.is_unlocked());
}

const BROKEN_PACK: &str = r#"
[[subjects]]
id = "math"
name = "Numbers"
sequence = ["count", "add"]

[[subjects]]
id = "art"
name = "Colours"
sequence = ["red", "blue"]

[[activities]]
id = "count"
subject = "math"
tier = "easy"

[[activities]]
id = "add"
subject = "math"
tier = "easy"
prerequisites = ["count"]

[[activities]]
id = "red"
subject = "art"
tier = "easy"
prerequisites = ["blue"]

[[activities]]
id = "blue"
subject = "art"
tier = "easy"
prerequisites = ["red"]
"#;

#[test]
fn cyclic_subject_is_quarantined_not_fatal() {
    let catalog = sprout_core::ContentCatalog::from_toml_str(BROKEN_PACK).unwrap();
    assert!(sprout_core::ContentGraph::build(catalog.clone()).is_err());

    let (graph, problems) = sprout_core::ContentGraph::build_lenient(catalog);
    assert!(!problems.is_empty());
    assert!(graph.is_quarantined("art"));
    assert!(!graph.is_quarantined("math"));

    let engine = sprout_core::ProgressionEngine::with_clock(
        graph,
        MemoryStore::new(),
        sprout_core::FixedClock::new(at(2, 17)),
        EngineConfig::default(),
    );
    add_child(&engine, "max", 5, Subscription::Premium);

    let result = engine.process_completion("max", "count", &perfect()).unwrap();
    assert_eq!(ids(&result.new_unlocks), vec!["add"]);
    assert!(engine.get_unlocked_activities("max", Some("art")).unwrap().is_empty());

    let child = engine.child("max").unwrap();
    let snapshot = UnlockResolver::new(engine.graph(), &engine.config().unlock).resolve(
        &child,
        &[],
        &HashSet::new(),
    );
    assert_eq!(
        snapshot.access("red"),
        Some(&ActivityAccess::Locked {
            reason: LockReason::ContentUnavailable
        })
    );
}
