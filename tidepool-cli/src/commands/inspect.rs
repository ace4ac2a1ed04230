//! Inspect command - list a module's exports and size descriptors.

use anyhow::{Context, Result};
use std::path::Path;

/// Run the inspect command.
pub fn run(module: &Path, config: Option<&Path>, json: bool) -> Result<()> {
    tracing::info!(module = %module.display(), "Inspecting module");

    let mut binding = super::bind(module, config)?;
    let report = binding.inspect();

    if json {
        let text = serde_json::to_string_pretty(&report).context("Failed to serialize report")?;
        println!("{text}");
        return Ok(());
    }

    let describe = |bytes: Option<u32>| match bytes {
        Some(bytes) => format!("{bytes} bytes"),
        None => "not exported".to_string(),
    };

    println!("Module Information");
    println!("==================");
    println!("Name:           {}", report.module);
    println!("Arena:          {} bytes", report.arena_bytes);
    println!("Generation:     {}", report.generation);
    println!("Result tuple:   {}", describe(report.histogram_bytes));
    println!("Element:        {}", describe(report.recommendation_bytes));
    println!();

    println!("Entry Points");
    println!("============");
    for status in &report.entry_points {
        let mark = if status.available { "✓" } else { "✗" };
        println!("  {mark} {:<20} {}", status.operation, status.export);
    }
    println!();

    println!("Exports ({})", report.exports.len());
    for name in &report.exports {
        println!("  - {name}");
    }

    Ok(())
}
