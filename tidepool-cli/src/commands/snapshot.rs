//! Snapshot command - load, update and dump a store.

use anyhow::{Context, Result};
use std::path::Path;

/// Options for the snapshot command.
pub struct SnapshotOptions<'a> {
    /// Base64 snapshot to start from.
    pub snapshot: Option<&'a str>,
    /// Primary records to upsert.
    pub primary: Option<&'a str>,
    /// Secondary records to upsert.
    pub secondary: Option<&'a str>,
    /// Print the persisted snapshot instead of the JSON view.
    pub persist: bool,
}

/// Run the snapshot command.
pub fn run(module: &Path, config: Option<&Path>, options: SnapshotOptions<'_>) -> Result<()> {
    let mut binding = super::bind(module, config)?;
    super::initialize(&mut binding, options.snapshot)?;

    if let Some(primary) = options.primary {
        binding
            .upsert_primary(&super::text_argument(primary)?)
            .context("Failed to upsert primary records")?;
    }
    if let Some(secondary) = options.secondary {
        binding
            .upsert_secondary(&super::text_argument(secondary)?)
            .context("Failed to upsert secondary records")?;
    }

    let output = if options.persist {
        binding.persist_base64().context("Failed to persist store")?
    } else {
        binding
            .fetch_snapshot_json()
            .context("Failed to fetch store JSON")?
    };
    println!("{output}");
    Ok(())
}
