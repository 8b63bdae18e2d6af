//! Append-only attempt log entries.
//!
//! Every derived value in the engine (unlocks, streaks, achievement
//! eligibility) is a function of the attempt log plus static content.

use std::collections::HashSet;

use chrono::{DateTime, FixedOffset, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::child::ChildId;
use crate::content::{ActivityId, DifficultyTier, SubjectId};
use crate::scoring::StarRating;

/// Unique identifier for an attempt record
pub type AttemptId = String;

/// One completed activity attempt. Immutable once written.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttemptRecord {
    pub id: AttemptId,
    pub child_id: ChildId,
    pub activity_id: ActivityId,
    pub subject_id: SubjectId,
    /// Tier of the activity when it was played.
    pub tier: DifficultyTier,
    pub completed_at: DateTime<Utc>,
    pub error_count: u32,
    pub time_spent_seconds: u32,
    pub total_questions: u32,
    pub correct_answers: u32,
    pub stars: StarRating,
    pub session_id: Option<String>,
    pub submission_id: Option<String>,
}

impl AttemptRecord {
    /// Calendar day of the attempt in the given offset.
    pub fn local_date(&self, offset: FixedOffset) -> NaiveDate {
        self.completed_at.with_timezone(&offset).date_naive()
    }
}

/// Activities with at least one completed attempt. Every completed attempt
/// carries at least one star, so completion alone satisfies a prerequisite.
pub fn completed_activities(attempts: &[AttemptRecord]) -> HashSet<&str> {
    attempts.iter().map(|a| a.activity_id.as_str()).collect()
}

/// Attempts for one subject, in log order.
pub fn subject_attempts<'a>(
    attempts: &'a [AttemptRecord],
    subject: &'a str,
) -> impl DoubleEndedIterator<Item = &'a AttemptRecord> + 'a {
    attempts.iter().filter(move |a| a.subject_id == subject)
}

/// Sort attempts chronologically, keeping insertion order for equal times.
pub fn sort_chronologically(attempts: &mut [AttemptRecord]) {
    attempts.sort_by_key(|a| a.completed_at);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::attempt_at;
    use chrono::TimeZone;

    #[test]
    fn local_date_respects_offset() {
        let at = Utc.with_ymd_and_hms(2026, 3, 1, 23, 30, 0).unwrap();
        let record = attempt_at("m1", "math", DifficultyTier::Easy, StarRating::Three, at);
        let utc = FixedOffset::east_opt(0).unwrap();
        let tokyo = FixedOffset::east_opt(9 * 3600).unwrap();
        assert_eq!(record.local_date(utc), NaiveDate::from_ymd_opt(2026, 3, 1).unwrap());
        assert_eq!(record.local_date(tokyo), NaiveDate::from_ymd_opt(2026, 3, 2).unwrap());
    }

    #[test]
    fn completed_and_subject_filters() {
        let at = Utc.with_ymd_and_hms(2026, 3, 1, 10, 0, 0).unwrap();
        let log = vec![
            attempt_at("m1", "math", DifficultyTier::Easy, StarRating::One, at),
            attempt_at("w1", "words", DifficultyTier::Easy, StarRating::Two, at),
            attempt_at("m1", "math", DifficultyTier::Easy, StarRating::Three, at),
        ];
        let done = completed_activities(&log);
        assert_eq!(done.len(), 2);
        assert!(done.contains("m1"));
        assert_eq!(subject_attempts(&log, "math").count(), 2);
    }
}
