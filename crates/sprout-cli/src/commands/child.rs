//! Child profile commands for CLI.

use chrono::Utc;
use clap::Subcommand;
use sprout_core::{Child, DifficultyTier, Subscription};

use super::{open_engine, print_json, CliResult};

#[derive(Subcommand)]
pub enum ChildAction {
    /// Register a child profile
    Add {
        /// Profile id
        id: String,
        /// Display name
        #[arg(long)]
        name: String,
        /// Age in years
        #[arg(long)]
        age: u8,
        /// "trial" or "premium"
        #[arg(long, default_value = "trial")]
        subscription: String,
        /// Preferred language code
        #[arg(long, default_value = "en")]
        language: String,
    },
    /// Show one profile
    Show { id: String },
    /// List all profiles
    List,
    /// Show the difficulty recommendation, or override the tier
    Difficulty {
        id: String,
        subject: String,
        /// New tier ("easy", "medium", "hard")
        tier: Option<String>,
    },
}

pub fn run(action: ChildAction) -> CliResult {
    let engine = open_engine()?;

    match action {
        ChildAction::Add {
            id,
            name,
            age,
            subscription,
            language,
        } => {
            let subscription = Subscription::parse(&subscription)
                .ok_or_else(|| format!("unknown subscription: {subscription}"))?;
            let mut child = Child::new(id, name, age, subscription, Utc::now());
            child.language = language;
            engine.register_child(&child)?;
            println!("Child registered: {}", child.id);
            print_json(&child)?;
        }
        ChildAction::Show { id } => {
            print_json(&engine.child(&id)?)?;
        }
        ChildAction::List => {
            print_json(&engine.list_children()?)?;
        }
        ChildAction::Difficulty { id, subject, tier } => match tier {
            Some(tier) => {
                let tier = DifficultyTier::parse(&tier)
                    .ok_or_else(|| format!("unknown tier: {tier}"))?;
                engine.set_difficulty(&id, &subject, tier)?;
                println!("ok");
            }
            None => print_json(&engine.recommend_difficulty(&id, &subject)?)?,
        },
    }
    Ok(())
}
