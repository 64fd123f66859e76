//! Inspect command implementation.

use super::{open_engine, CliError, Layout, OutputFormat};
use meshdb_core::keys;
use meshdb_storage::KvRead;
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::Path;

/// Database inspection result.
#[derive(Debug, Serialize)]
pub struct InspectResult {
    /// Database path.
    pub path: String,
    /// Sequence number of the latest commit.
    pub sequence: u64,
    /// Commit log size in bytes.
    pub log_size: u64,
    /// Number of live keys.
    pub total_keys: u64,
    /// Keys outside the known layout.
    pub unparsed_keys: usize,
    /// Per-collection summaries.
    pub collections: Vec<CollectionInfo>,
}

/// Collection summary.
#[derive(Debug, Serialize)]
pub struct CollectionInfo {
    /// Collection name.
    pub name: String,
    /// Number of stored models.
    pub models: u64,
    /// Value of the count key, if it decodes.
    pub stored_count: Option<u64>,
    /// Index entries per index.
    pub indexes: BTreeMap<String, u64>,
}

/// Runs the inspect command.
pub fn run(path: &Path, format: OutputFormat) -> Result<(), CliError> {
    let engine = open_engine(path)?;
    let result = inspect(path, &engine, engine.latest_seq().0, engine.log_size()?)?;
    engine.close()?;

    match format {
        OutputFormat::Json => match serde_json::to_string_pretty(&result) {
            Ok(json) => println!("{json}"),
            Err(err) => eprintln!("failed to render JSON: {err}"),
        },
        OutputFormat::Text => print_text_output(&result),
    }
    Ok(())
}

fn inspect(
    path: &Path,
    reader: &dyn KvRead,
    sequence: u64,
    log_size: u64,
) -> Result<InspectResult, CliError> {
    let layout = Layout::scan(reader)?;
    let collections = layout
        .collections
        .into_iter()
        .map(|(name, stats)| CollectionInfo {
            name,
            models: stats.models,
            stored_count: stats
                .stored_count
                .as_deref()
                .and_then(|raw| keys::decode_count(raw).ok()),
            indexes: stats.index_entries,
        })
        .collect();

    Ok(InspectResult {
        path: path.display().to_string(),
        sequence,
        log_size,
        total_keys: layout.total_keys,
        unparsed_keys: layout.unparsed.len(),
        collections,
    })
}

fn print_text_output(result: &InspectResult) {
    println!("MeshDB Database Inspection");
    println!("==========================");
    println!();
    println!("Path:      {}", result.path);
    println!("Sequence:  {}", result.sequence);
    println!("Log size:  {}", format_size(result.log_size));
    println!("Keys:      {}", result.total_keys);
    if result.unparsed_keys > 0 {
        println!("Unparsed:  {}", result.unparsed_keys);
    }

    if result.collections.is_empty() {
        return;
    }
    println!();
    println!("Collections:");
    for col in &result.collections {
        let count = col
            .stored_count
            .map_or_else(|| "-".to_string(), |c| c.to_string());
        println!("  {}: {} models (count key: {})", col.name, col.models, count);
        for (index, entries) in &col.indexes {
            println!("    index {index}: {entries} entries");
        }
    }
}

fn format_size(bytes: u64) -> String {
    if bytes < 1024 {
        format!("{bytes} bytes")
    } else if bytes < 1024 * 1024 {
        format!("{:.1} KB", bytes as f64 / 1024.0)
    } else if bytes < 1024 * 1024 * 1024 {
        format!("{:.1} MB", bytes as f64 / (1024.0 * 1024.0))
    } else {
        format!("{:.1} GB", bytes as f64 / (1024.0 * 1024.0 * 1024.0))
    }
}
