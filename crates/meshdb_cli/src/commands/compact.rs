//! Compact command implementation.

use super::{open_engine, CliError};
use std::path::Path;
use tracing::info;

/// Compaction statistics.
#[derive(Debug)]
pub struct CompactStats {
    /// Commit log size before compaction.
    pub bytes_before: u64,
    /// Commit log size after compaction.
    pub bytes_after: u64,
}

impl CompactStats {
    fn saved_percent(&self) -> f64 {
        if self.bytes_before == 0 {
            0.0
        } else {
            self.bytes_before.saturating_sub(self.bytes_after) as f64 / self.bytes_before as f64
                * 100.0
        }
    }
}

/// Runs the compact command.
pub fn run(path: &Path, dry_run: bool) -> Result<(), CliError> {
    println!("Compacting commit log at {}", path.display());
    if dry_run {
        println!("(dry run - no changes will be made)");
    }
    println!();

    let stats = compact(path, dry_run)?;
    println!("  Size before: {} bytes", stats.bytes_before);
    if !dry_run {
        println!("  Size after:  {} bytes", stats.bytes_after);
        println!(
            "  Space saved: {} bytes ({:.1}%)",
            stats.bytes_before.saturating_sub(stats.bytes_after),
            stats.saved_percent()
        );
    }
    Ok(())
}

fn compact(path: &Path, dry_run: bool) -> Result<CompactStats, CliError> {
    let engine = open_engine(path)?;
    let bytes_before = engine.log_size()?;
    if !dry_run {
        engine.compact()?;
    }
    let bytes_after = engine.log_size()?;
    if !dry_run {
        info!(bytes_before, bytes_after, "commit log compacted");
    }
    engine.close()?;
    Ok(CompactStats {
        bytes_before,
        bytes_after,
    })
}
