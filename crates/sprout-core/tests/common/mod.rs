//! Shared helpers for sprout-core integration tests.
#![allow(dead_code)]

use chrono::{DateTime, TimeZone, Utc};
use sprout_core::{
    AttemptOutcome, Child, ContentCatalog, ContentGraph, EngineConfig, FixedClock,
    ProgressStore, ProgressionEngine, Subscription,
};

pub const BUILTIN_PACK: &str = include_str!("../../content/default_pack.toml");

/// 2026-03-`day` at `hour`:00 UTC.
pub fn at(day: u32, hour: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 3, day, hour, 0, 0).unwrap()
}

pub fn builtin_graph() -> ContentGraph {
    ContentGraph::build(ContentCatalog::builtin().unwrap()).unwrap()
}

pub fn engine_with<S: ProgressStore>(
    store: S,
    config: EngineConfig,
) -> ProgressionEngine<S, FixedClock> {
    ProgressionEngine::with_clock(builtin_graph(), store, FixedClock::new(at(2, 17)), config)
}

pub fn add_child<S: ProgressStore>(
    engine: &ProgressionEngine<S, FixedClock>,
    id: &str,
    age: u8,
    subscription: Subscription,
) {
    engine
        .register_child(&Child::new(id, id, age, subscription, at(1, 8)))
        .unwrap();
}

pub fn with_errors(errors: i32) -> AttemptOutcome {
    AttemptOutcome {
        total_questions: 5,
        error_count: Some(errors),
        time_spent_seconds: 100,
        ..Default::default()
    }
}

pub fn perfect() -> AttemptOutcome {
    with_errors(0)
}
