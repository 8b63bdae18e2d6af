use clap::Subcommand;
use serde::Serialize;
use sprout_core::{ContentGraph, EngineConfig};

use super::{load_catalog, print_json, CliResult};

#[derive(Subcommand)]
pub enum ContentAction {
    /// Validate the configured content pack
    Validate,
    /// Show subjects and activities in curriculum order
    Show {
        /// Only this subject
        #[arg(long)]
        subject: Option<String>,
    },
}

#[derive(Serialize)]
struct ValidationReport {
    valid: bool,
    fingerprint: String,
    subjects: usize,
    activities: usize,
    achievements: usize,
    problems: Vec<String>,
    quarantined: Vec<String>,
}

pub fn run(action: ContentAction) -> CliResult {
    let config = EngineConfig::load()?;
    let catalog = load_catalog(&config)?;
    let (graph, problems) = ContentGraph::build_lenient(catalog);

    match action {
        ContentAction::Validate => {
            let report = ValidationReport {
                valid: problems.is_empty(),
                fingerprint: graph.fingerprint().to_string(),
                subjects: graph.subjects().len(),
                activities: graph.activities().len(),
                achievements: graph.achievements().len(),
                problems: problems.iter().map(ToString::to_string).collect(),
                quarantined: graph
                    .subjects()
                    .iter()
                    .filter(|s| graph.is_quarantined(&s.id))
                    .map(|s| s.id.clone())
                    .collect(),
            };
            print_json(&report)?;
            if !report.valid {
                std::process::exit(2);
            }
            Ok(())
        }
        ContentAction::Show { subject } => {
            if let Some(id) = subject.as_deref() {
                if graph.subject(id).is_none() {
                    return Err(format!("unknown subject: {id}").into());
                }
            }
            let listing: Vec<serde_json::Value> = graph
                .subjects()
                .iter()
                .filter(|s| subject.as_deref().map_or(true, |wanted| s.id == wanted))
                .map(|s| {
                    serde_json::json!({
                        "subject": s,
                        "quarantined": graph.is_quarantined(&s.id),
                        "activities": graph.activities_in_subject(&s.id).collect::<Vec<_>>(),
                    })
                })
                .collect();
            print_json(&listing)
        }
    }
}
