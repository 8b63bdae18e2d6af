//! Shared fixtures for unit tests.

use chrono::{DateTime, Utc};

use crate::attempt::AttemptRecord;
use crate::content::{ContentCatalog, ContentGraph, DifficultyTier};
use crate::scoring::StarRating;

pub(crate) fn attempt_at(
    activity: &str,
    subject: &str,
    tier: DifficultyTier,
    stars: StarRating,
    at: DateTime<Utc>,
) -> AttemptRecord {
    let error_count = match stars {
        StarRating::Three => 0,
        StarRating::Two => 1,
        StarRating::One => 3,
    };
    AttemptRecord {
        id: uuid::Uuid::new_v4().to_string(),
        child_id: "kid".to_string(),
        activity_id: activity.to_string(),
        subject_id: subject.to_string(),
        tier,
        completed_at: at,
        error_count,
        time_spent_seconds: 60,
        total_questions: 5,
        correct_answers: 5u32.saturating_sub(error_count),
        stars,
        session_id: None,
        submission_id: None,
    }
}

/// Small math curriculum:
/// m1 (easy) -> m2 (easy) -> m3 (medium) -> m4 (medium) -> m5 (hard),
/// crown (hard, crown challenge, requires m4), and a words subject.
pub(crate) const SMALL_PACK: &str = r#"
[[subjects]]
id = "math"
name = "Mathematics"
sequence = ["m1", "m2", "m3", "m4", "m5", "crown"]

[[subjects]]
id = "words"
name = "Words"
sequence = ["w1", "w2"]

[[activities]]
id = "m1"
subject = "math"
tier = "easy"

[[activities]]
id = "m2"
subject = "math"
tier = "easy"
prerequisites = ["m1"]

[[activities]]
id = "m3"
subject = "math"
tier = "medium"
prerequisites = ["m2"]

[[activities]]
id = "m4"
subject = "math"
tier = "medium"
prerequisites = ["m3"]

[[activities]]
id = "m5"
subject = "math"
tier = "hard"
min_age = 6
prerequisites = ["m4"]

[[activities]]
id = "crown"
subject = "math"
tier = "hard"
crown_challenge = true
prerequisites = ["m4"]

[[activities]]
id = "w1"
subject = "words"
tier = "easy"

[[activities]]
id = "w2"
subject = "words"
tier = "easy"
prerequisites = ["w1"]
published = false

[[achievements]]
id = "first-steps"
name = "First Steps"
category = "milestone"
priority = 1
criteria = { kind = "first_completion" }

[[achievements]]
id = "five-done"
name = "High Five"
category = "milestone"
priority = 2
criteria = { kind = "total_completions", count = 5 }

[[achievements]]
id = "triple-perfect"
name = "Triple Perfect"
category = "mastery"
criteria = { kind = "consecutive_perfect", count = 3 }

[[achievements]]
id = "two-day-streak"
name = "Two in a Row"
category = "streak"
criteria = { kind = "streak_days", days = 2 }

[[achievements]]
id = "math-done"
name = "Number Explorer"
category = "exploration"
criteria = { kind = "subject_completion", subject = "math", percent = 100.0 }

[[achievements]]
id = "crown-open"
name = "Royal Invitation"
category = "crown"
criteria = { kind = "crown_unlocked", count = 1 }
"#;

pub(crate) fn small_graph() -> ContentGraph {
    ContentGraph::build(ContentCatalog::from_toml_str(SMALL_PACK).unwrap()).unwrap()
}
