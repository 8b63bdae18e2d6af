//! Star-rating rule for completed attempts.
//!
//! This is the single authoritative scoring rule. Every other component
//! consumes [`StarRating`] values produced here and never re-derives them.
//!
//! | Errors | Stars |
//! |--------|-------|
//! | 0      | 3     |
//! | 1-2    | 2     |
//! | 3+     | 1     |
//!
//! There is no fail state: every completed attempt earns at least one star.
//! Time spent is advisory and only selects encouragement copy.

use serde::{Deserialize, Serialize};

use crate::error::ValidationError;

/// Star rating of one attempt (1-3).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum StarRating {
    One = 1,
    Two = 2,
    Three = 3,
}

impl StarRating {
    pub fn value(self) -> u8 {
        self as u8
    }

    pub fn is_perfect(self) -> bool {
        self == StarRating::Three
    }

    /// The fixed three-tier error policy.
    pub fn from_error_count(error_count: u32) -> Self {
        match error_count {
            0 => StarRating::Three,
            1 | 2 => StarRating::Two,
            _ => StarRating::One,
        }
    }
}

impl TryFrom<u8> for StarRating {
    type Error = ValidationError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(StarRating::One),
            2 => Ok(StarRating::Two),
            3 => Ok(StarRating::Three),
            other => Err(ValidationError::StarsOutOfRange(other)),
        }
    }
}

impl From<StarRating> for u8 {
    fn from(stars: StarRating) -> Self {
        stars.value()
    }
}

/// Raw outcome of a completed activity, as reported by the activity screen.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AttemptOutcome {
    pub total_questions: u32,
    /// Used to derive the error count when `error_count` is absent.
    #[serde(default)]
    pub correct_answers: Option<u32>,
    #[serde(default)]
    pub error_count: Option<i32>,
    #[serde(default)]
    pub time_spent_seconds: u32,
    #[serde(default)]
    pub expected_time_seconds: Option<u32>,
    #[serde(default)]
    pub session_id: Option<String>,
    /// Client-generated id; resubmitting the same id is a no-op.
    #[serde(default)]
    pub submission_id: Option<String>,
}

impl AttemptOutcome {
    /// Convenience constructor for an outcome known only by its error count.
    pub fn with_errors(total_questions: u32, error_count: i32) -> Self {
        Self {
            total_questions,
            error_count: Some(error_count),
            ..Default::default()
        }
    }

    /// Check the outcome and resolve its error count.
    pub fn validate(&self) -> Result<u32, ValidationError> {
        if let Some(correct) = self.correct_answers {
            if correct > self.total_questions {
                return Err(ValidationError::invalid(
                    "correct_answers",
                    format!(
                        "{correct} correct answers exceed {} questions",
                        self.total_questions
                    ),
                ));
            }
        }
        match (self.error_count, self.correct_answers) {
            (Some(errors), _) if errors < 0 => Err(ValidationError::invalid(
                "error_count",
                format!("must not be negative (got {errors})"),
            )),
            (Some(errors), _) => Ok(errors as u32),
            (None, Some(correct)) => Ok(self.total_questions - correct),
            (None, None) => Err(ValidationError::invalid(
                "error_count",
                "either error_count or correct_answers is required",
            )),
        }
    }
}

/// How long the attempt took relative to the expected time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Pace {
    Quick,
    OnPace,
    Unhurried,
}

impl Pace {
    fn classify(spent: u32, expected: Option<u32>) -> Option<Self> {
        let expected = expected.filter(|e| *e > 0)?;
        if spent == 0 {
            return None;
        }
        let ratio = spent as f64 / expected as f64;
        Some(if ratio <= 0.75 {
            Pace::Quick
        } else if ratio <= 1.5 {
            Pace::OnPace
        } else {
            Pace::Unhurried
        })
    }

    fn as_str(&self) -> &'static str {
        match self {
            Pace::Quick => "quick",
            Pace::OnPace => "on_pace",
            Pace::Unhurried => "unhurried",
        }
    }
}

/// Result of scoring one attempt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoreResult {
    pub stars: StarRating,
    /// Always true: there is no fail state.
    pub passed: bool,
    pub error_count: u32,
    pub pace: Option<Pace>,
    pub breakdown: String,
    /// Opaque copy key for the presentation layer.
    pub encouragement_key: String,
}

/// Pure scoring function wrapper.
#[derive(Debug, Clone, Copy, Default)]
pub struct ScoringCalculator;

impl ScoringCalculator {
    pub fn new() -> Self {
        Self
    }

    /// Score an outcome. Invalid outcomes are rejected.
    pub fn score(&self, outcome: &AttemptOutcome) -> Result<ScoreResult, ValidationError> {
        let error_count = outcome.validate()?;
        let stars = StarRating::from_error_count(error_count);
        let pace = Pace::classify(outcome.time_spent_seconds, outcome.expected_time_seconds);

        let mistakes = match error_count {
            0 => "No mistakes".to_string(),
            1 => "1 mistake".to_string(),
            n => format!("{n} mistakes"),
        };
        let breakdown = format!(
            "{mistakes} in {} questions: {} star{}",
            outcome.total_questions,
            stars.value(),
            if stars == StarRating::One { "" } else { "s" }
        );
        let encouragement_key = match pace {
            Some(pace) => format!("encourage.{}_star.{}", stars.value(), pace.as_str()),
            None => format!("encourage.{}_star", stars.value()),
        };

        Ok(ScoreResult {
            stars,
            passed: true,
            error_count,
            pace,
            breakdown,
            encouragement_key,
        })
    }
}
