//! Read-only progress queries.

use clap::Subcommand;
use sprout_core::AchievementCategory;

use super::{open_engine, print_json, CliResult};

#[derive(Subcommand)]
pub enum ProgressAction {
    /// Unlocked activities
    Unlocked {
        child: String,
        #[arg(long)]
        subject: Option<String>,
    },
    /// Next recommended activity in a subject
    Next { child: String, subject: String },
    /// Crown challenges of a subject
    Crowns { child: String, subject: String },
    /// Streak state and status
    Streak { child: String },
    /// Progress toward achievements
    Achievements {
        child: String,
        /// Only this category
        #[arg(long)]
        category: Option<String>,
    },
    /// Rebuild cached unlocks and streak from the attempt log
    Rebuild { child: String },
}

pub fn run(action: ProgressAction) -> CliResult {
    let engine = open_engine()?;

    match action {
        ProgressAction::Unlocked { child, subject } => {
            print_json(&engine.get_unlocked_activities(&child, subject.as_deref())?)
        }
        ProgressAction::Next { child, subject } => {
            print_json(&engine.get_next_recommended_activity(&child, &subject)?)
        }
        ProgressAction::Crowns { child, subject } => {
            print_json(&engine.get_crown_challenges(&child, &subject)?)
        }
        ProgressAction::Streak { child } => print_json(&engine.get_streak_status(&child)?),
        ProgressAction::Achievements { child, category } => {
            let category = match category {
                Some(c) => Some(
                    AchievementCategory::parse(&c).ok_or_else(|| format!("unknown category: {c}"))?,
                ),
                None => None,
            };
            print_json(&engine.get_achievement_progress(&child, category)?)
        }
        ProgressAction::Rebuild { child } => print_json(&engine.rebuild_derived_state(&child)?),
    }
}
