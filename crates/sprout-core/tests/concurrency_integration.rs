//! Concurrent completions: serialized per child, independent across children.

mod common;

use std::collections::HashSet;
use std::thread;

use common::{add_child, engine_with, perfect};
use sprout_core::{
    AttemptOutcome, EngineConfig, MemoryStore, ProgressStore, SqliteStore, Subscription,
};

const THREADS: usize = 8;

#[test]
fn parallel_completions_for_one_child_are_all_recorded() {
    let engine = engine_with(MemoryStore::new(), EngineConfig::default());
    add_child(&engine, "ada", 6, Subscription::Premium);

    let engine = &engine;
    thread::scope(|s| {
        for _ in 0..THREADS {
            s.spawn(move || {
                for _ in 0..5 {
                    engine.process_completion("ada", "count-to-5", &perfect()).unwrap();
                }
            });
        }
    });

    let store = engine.store();
    assert_eq!(store.attempts("ada").unwrap().len(), THREADS * 5);

    let earned = store.earned_achievements("ada").unwrap();
    let unique: HashSet<&str> = earned.iter().map(|e| e.achievement_id.as_str()).collect();
    assert_eq!(unique.len(), earned.len());
    assert!(unique.contains("first-steps"));
    assert!(unique.contains("ten-done"));
    assert!(unique.contains("triple-perfect"));

    let streak = store.streak("ada").unwrap().unwrap();
    assert_eq!(streak.current, 1);
}

#[test]
fn racing_resubmissions_record_once() {
    let engine = engine_with(MemoryStore::new(), EngineConfig::default());
    add_child(&engine, "ben", 6, Subscription::Premium);
    let outcome = AttemptOutcome {
        submission_id: Some("shared".into()),
        ..perfect()
    };

    let (engine, outcome) = (&engine, &outcome);
    let results: Vec<_> = thread::scope(|s| {
        let handles: Vec<_> = (0..THREADS)
            .map(|_| s.spawn(move || engine.process_completion("ben", "count-to-5", outcome)))
            .collect();
        handles.into_iter().map(|h| h.join().unwrap().unwrap()).collect()
    });

    assert_eq!(results.iter().filter(|r| !r.replayed).count(), 1);
    let first_id = &results[0].attempt.id;
    assert!(results.iter().all(|r| &r.attempt.id == first_id));
    assert_eq!(engine.store().attempts("ben").unwrap().len(), 1);
}

#[test]
fn children_progress_independently_on_sqlite() {
    let dir = tempfile::tempdir().unwrap();
    let store = SqliteStore::open_at(&dir.path().join("sprout.db")).unwrap();
    let engine = engine_with(store, EngineConfig::default());
    let children: Vec<String> = (0..THREADS).map(|i| format!("kid-{i}")).collect();
    for id in &children {
        add_child(&engine, id, 5, Subscription::Premium);
    }

    let engine = &engine;
    thread::scope(|s| {
        for id in &children {
            s.spawn(move || {
                for activity in ["count-to-5", "count-to-10", "more-or-less"] {
                    engine.process_completion(id, activity, &perfect()).unwrap();
                }
            });
        }
    });

    for id in &children {
        let attempts = engine.store().attempts(id).unwrap();
        assert_eq!(attempts.len(), 3);
        assert!(attempts.iter().all(|a| &a.child_id == id));
        let next = engine.get_next_recommended_activity(id, "math").unwrap();
        assert_eq!(next.map(|a| a.id).as_deref(), Some("add-within-5"));
        let earned = engine.store().earned_achievements(id).unwrap();
        let ids: Vec<&str> = earned.iter().map(|e| e.achievement_id.as_str()).collect();
        assert!(ids.contains(&"first-steps"));
        assert!(ids.contains(&"triple-perfect"));
    }
}
