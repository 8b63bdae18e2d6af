pub mod child;
pub mod config;
pub mod content;
pub mod play;
pub mod progress;

use sprout_core::{
    ContentCatalog, ContentGraph, ContentGraphError, EngineConfig, ProgressionEngine, SqliteStore,
};
use tracing::warn;

pub type CliResult = Result<(), Box<dyn std::error::Error>>;

/// The configured content pack, or the built-in one.
pub fn load_catalog(config: &EngineConfig) -> Result<ContentCatalog, ContentGraphError> {
    match &config.content_pack {
        Some(path) => ContentCatalog::load(path),
        None => ContentCatalog::builtin(),
    }
}

/// Engine over the on-disk store. Broken subjects are quarantined, not fatal.
pub fn open_engine() -> Result<ProgressionEngine<SqliteStore>, Box<dyn std::error::Error>> {
    let config = EngineConfig::load()?;
    let (graph, problems) = ContentGraph::build_lenient(load_catalog(&config)?);
    if !problems.is_empty() {
        warn!(count = problems.len(), "content pack has problems, run `content validate`");
    }
    let store = SqliteStore::open()?;
    Ok(ProgressionEngine::new(graph, store, config))
}

pub fn print_json<T: serde::Serialize>(value: &T) -> CliResult {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
