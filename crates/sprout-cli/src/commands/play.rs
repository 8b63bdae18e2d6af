use clap::Args;
use sprout_core::AttemptOutcome;

use super::{open_engine, print_json, CliResult};

#[derive(Args)]
pub struct PlayArgs {
    /// Child profile id
    pub child: String,
    /// Activity id
    pub activity: String,
    /// Questions in the activity
    #[arg(long, default_value_t = 5)]
    pub total: u32,
    /// Mistakes made
    #[arg(long, allow_hyphen_values = true)]
    pub errors: Option<i32>,
    /// Correct answers, used when --errors is absent
    #[arg(long)]
    pub correct: Option<u32>,
    /// Time spent in seconds
    #[arg(long, default_value_t = 0)]
    pub seconds: u32,
    /// Client submission id for safe retries
    #[arg(long)]
    pub submission: Option<String>,
}

pub fn run(args: PlayArgs) -> CliResult {
    let engine = open_engine()?;
    let outcome = AttemptOutcome {
        total_questions: args.total,
        correct_answers: args.correct,
        error_count: args.errors,
        time_spent_seconds: args.seconds,
        submission_id: args.submission,
        ..Default::default()
    };
    let result = engine.process_completion(&args.child, &args.activity, &outcome)?;
    print_json(&result)
}
