//! Convert command - build a result tuple and aggregate it.

use anyhow::{Context, Result};
use std::path::Path;

/// Run the convert command.
///
/// The tuple is aggregated twice: once re-uploaded with a patched array
/// base and once in place. Both totals are printed.
pub fn run(module: &Path, config: Option<&Path>, input: &str, start: u32, end: u32) -> Result<()> {
    let json = super::text_argument(input)?;
    let mut binding = super::bind(module, config)?;

    let result = binding.convert(&json).context("Conversion failed")?;
    let decoded = binding
        .decode_result(&result)
        .context("Failed to decode result tuple")?;
    let patched = binding
        .aggregate_range(&decoded, start, end)
        .context("Aggregation of the uploaded copy failed")?;
    let in_place = binding
        .aggregate_range_in_place(&result, start, end)
        .context("In-place aggregation failed")?;
    binding
        .release_result(result)
        .context("Failed to release result tuple")?;

    if patched != in_place {
        tracing::warn!(?patched, ?in_place, "aggregation paths disagree");
    }

    let header = decoded.header();
    let output = serde_json::json!({
        "range": [header.range_start, header.range_end],
        "aggregation": header.aggregation,
        "capacity": header.array.capacity,
        "elements": decoded.recommendations().context("Failed to read elements")?,
        "totals": patched,
        "in_place_totals": in_place,
    });
    println!("{}", serde_json::to_string_pretty(&output)?);

    tracing::debug!(
        live = binding.ledger().live_count(),
        allocated = binding.ledger().total_allocated(),
        "ledger after convert"
    );
    Ok(())
}
