//! Verify command implementation.
//!
//! Checks the structural rules that hold for every collection regardless of
//! its model type: keys parse, index entries point at stored models and count
//! keys agree with the number of primary keys. Payload decoding needs the
//! model types and is left to `Database::check_integrity`.

use super::{open_engine, CliError, CollectionLayout, Layout};
use meshdb_core::keys;
use meshdb_storage::KvRead;
use std::collections::HashSet;
use std::path::Path;

/// Verification result.
#[derive(Debug, Default)]
pub struct VerifyResult {
    /// Number of keys checked.
    pub keys_checked: u64,
    /// Problems found, one line each.
    pub problems: Vec<String>,
}

impl VerifyResult {
    fn is_ok(&self) -> bool {
        self.problems.is_empty()
    }
}

/// Runs the verify command.
pub fn run(path: &Path) -> Result<(), CliError> {
    println!("Verifying database at {}", path.display());
    println!();

    let engine = open_engine(path)?;
    let result = verify(&engine)?;
    engine.close()?;

    println!("  Keys checked: {}", result.keys_checked);
    for problem in &result.problems {
        println!("  - {problem}");
    }
    println!();
    if result.is_ok() {
        println!("✓ Database verification passed");
        Ok(())
    } else {
        println!("✗ Database verification failed");
        Err(CliError::VerificationFailed {
            problems: result.problems.len(),
        })
    }
}

fn verify(reader: &dyn KvRead) -> Result<VerifyResult, CliError> {
    let layout = Layout::scan(reader)?;
    let mut result = VerifyResult {
        keys_checked: layout.total_keys,
        problems: Vec::new(),
    };

    for (key, reason) in &layout.unparsed {
        result
            .problems
            .push(format!("{}: {reason}", String::from_utf8_lossy(key)));
    }
    for (name, collection) in &layout.collections {
        check_collection(name, collection, &mut result.problems);
    }
    Ok(result)
}

fn check_collection(name: &str, collection: &CollectionLayout, problems: &mut Vec<String>) {
    let ids: HashSet<&[u8]> = collection.ids.iter().map(Vec::as_slice).collect();
    for (index, id, key) in &collection.references {
        if !ids.contains(id.as_slice()) {
            problems.push(format!(
                "{name}: entry {} of index {index} refers to a missing model",
                String::from_utf8_lossy(key)
            ));
        }
    }

    let stored = match collection.stored_count.as_deref().map(keys::decode_count) {
        None => 0,
        Some(Ok(0)) => {
            problems.push(format!("{name}: count key holds zero"));
            return;
        }
        Some(Ok(count)) => count,
        Some(Err(err)) => {
            problems.push(format!("{name}: {err}"));
            return;
        }
    };
    if stored != collection.models {
        problems.push(format!(
            "{name}: count key says {stored} but {} models are stored",
            collection.models
        ));
    }
}
