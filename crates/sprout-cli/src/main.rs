use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

mod commands;

#[derive(Parser)]
#[command(name = "sprout-cli", version, about = "Sprout progression engine CLI")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Child profile management
    Child {
        #[command(subcommand)]
        action: commands::child::ChildAction,
    },
    /// Record a completed activity
    Play(commands::play::PlayArgs),
    /// Progress queries
    Progress {
        #[command(subcommand)]
        action: commands::progress::ProgressAction,
    },
    /// Content pack inspection
    Content {
        #[command(subcommand)]
        action: commands::content::ContentAction,
    },
    /// Configuration management
    Config {
        #[command(subcommand)]
        action: commands::config::ConfigAction,
    },
}

fn init_logging() {
    let filter = EnvFilter::try_from_env("SPROUT_LOG").unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn main() {
    init_logging();

    let cli = Cli::parse();
    let result = match cli.command {
        Commands::Child { action } => commands::child::run(action),
        Commands::Play(args) => commands::play::run(args),
        Commands::Progress { action } => commands::progress::run(action),
        Commands::Content { action } => commands::content::run(action),
        Commands::Config { action } => commands::config::run(action),
    };

    if let Err(e) = result {
        eprintln!("error: {e}");
        std::process::exit(1);
    }
}
