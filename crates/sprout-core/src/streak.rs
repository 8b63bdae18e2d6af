//! Daily streak tracking.
//!
//! A calendar day qualifies when the child completes at least one activity
//! on it. Several attempts on the same day count once. Missing a single day
//! breaks the streak: the counter restarts at 1 with the next qualifying day
//! and a recovery plan is offered instead of a silent reset. The longest
//! streak never decreases.

use chrono::{Duration, NaiveDate};
use serde::{Deserialize, Serialize};

use crate::content::ActivityId;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreakState {
    pub current: u32,
    pub longest: u32,
    pub start_date: Option<NaiveDate>,
    pub last_activity_date: Option<NaiveDate>,
}

/// Lower-friction suggestion offered after a broken streak.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecoveryPlan {
    /// Opaque copy key for the presentation layer.
    pub message_key: String,
    pub suggested_activity: Option<ActivityId>,
}

impl RecoveryPlan {
    fn gentle_restart(previous_length: u32) -> Self {
        let message_key = if previous_length >= 7 {
            "streak.recovery.big_comeback"
        } else {
            "streak.recovery.gentle_restart"
        };
        Self {
            message_key: message_key.to_string(),
            suggested_activity: None,
        }
    }
}

/// What recording one qualifying day did to the streak.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum StreakUpdate {
    Started,
    Extended { days: u32 },
    /// The day was already counted (same day, or an older backfilled day).
    AlreadyCounted,
    Broken {
        previous_length: u32,
        missed_days: u32,
        recovery: RecoveryPlan,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreakChange {
    pub update: StreakUpdate,
    pub state: StreakState,
}

/// Read-side view of a streak on a given day.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum StreakStatus {
    NoStreak {
        longest: u32,
    },
    Active {
        days: u32,
        longest: u32,
        completed_today: bool,
    },
    Broken {
        previous_length: u32,
        longest: u32,
        recovery: RecoveryPlan,
    },
}

#[derive(Debug, Clone, Copy, Default)]
pub struct StreakTracker;

impl StreakTracker {
    pub fn new() -> Self {
        Self
    }

    /// Record a qualifying day.
    pub fn record(&self, state: &StreakState, day: NaiveDate) -> StreakChange {
        let mut next = state.clone();
        let update = match state.last_activity_date {
            None => {
                next.current = 1;
                next.start_date = Some(day);
                next.last_activity_date = Some(day);
                StreakUpdate::Started
            }
            Some(last) if day <= last => StreakUpdate::AlreadyCounted,
            Some(last) if day == last + Duration::days(1) => {
                next.current = state.current + 1;
                if next.start_date.is_none() {
                    next.start_date = Some(last);
                }
                next.last_activity_date = Some(day);
                StreakUpdate::Extended { days: next.current }
            }
            Some(last) => {
                let missed_days = (day - last).num_days().saturating_sub(1) as u32;
                next.current = 1;
                next.start_date = Some(day);
                next.last_activity_date = Some(day);
                if state.current == 0 {
                    StreakUpdate::Started
                } else {
                    StreakUpdate::Broken {
                        previous_length: state.current,
                        missed_days,
                        recovery: RecoveryPlan::gentle_restart(state.current),
                    }
                }
            }
        };
        next.longest = next.longest.max(next.current);
        StreakChange {
            update,
            state: next,
        }
    }

    /// Status as seen on `today`, before any activity recorded today.
    pub fn status(&self, state: &StreakState, today: NaiveDate) -> StreakStatus {
        let longest = state.longest;
        match state.last_activity_date {
            Some(last) if state.current > 0 && last >= today => StreakStatus::Active {
                days: state.current,
                longest,
                completed_today: true,
            },
            Some(last) if state.current > 0 && last + Duration::days(1) == today => {
                StreakStatus::Active {
                    days: state.current,
                    longest,
                    completed_today: false,
                }
            }
            Some(_) if state.current > 0 => StreakStatus::Broken {
                previous_length: state.current,
                longest,
                recovery: RecoveryPlan::gentle_restart(state.current),
            },
            _ => StreakStatus::NoStreak { longest },
        }
    }

    /// Recompute the streak from every qualifying day in the log.
    pub fn rebuild(&self, days: impl IntoIterator<Item = NaiveDate>) -> StreakState {
        let mut days: Vec<NaiveDate> = days.into_iter().collect();
        days.sort_unstable();
        days.dedup();
        days.into_iter()
            .fold(StreakState::default(), |state, day| self.record(&state, day).state)
    }
}
