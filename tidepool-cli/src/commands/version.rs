//! Version command - show version information.

use anyhow::Result;

/// Version information.
const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Run the version command.
pub fn run() -> Result<()> {
    println!("Tidepool - arena marshalling host for store modules");
    println!();
    println!("Version:     {}", VERSION);
    println!(
        "Platform:    {} / {}",
        std::env::consts::OS,
        std::env::consts::ARCH
    );
    println!();
    println!("Components:");
    println!("  tidepool-core  Handles, wire layouts, diagnostics, ledger");
    println!("  tidepool-host  Wasmtime runtime, arena proxy, module binding");
    println!("  tidepool-cli   Command-line interface");

    Ok(())
}
