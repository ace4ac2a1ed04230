//! CLI command implementations.

pub mod convert;
pub mod inspect;
pub mod query;
pub mod snapshot;
pub mod version;

use anyhow::{Context, Result};
use std::path::Path;
use std::sync::Arc;
use tidepool_core::BindingConfig;
use tidepool_host::{ModuleBinding, TracingSink, WasmRuntime, WasmRuntimeConfig};

/// Compile and bind the module at `path`.
pub fn bind(path: &Path, config: Option<&Path>) -> Result<ModuleBinding> {
    let config = match config {
        Some(file) => BindingConfig::from_yaml_file(file)
            .with_context(|| format!("Failed to load config: {}", file.display()))?,
        None => BindingConfig::default(),
    };

    let runtime =
        WasmRuntime::new(WasmRuntimeConfig::default()).context("Failed to create runtime")?;
    let module = runtime
        .compile_file(path)
        .with_context(|| format!("Failed to compile module: {}", path.display()))?;

    ModuleBinding::instantiate(&runtime, &module, config, Arc::new(TracingSink))
        .with_context(|| format!("Failed to bind module: {}", path.display()))
}

/// Read an argument that is either literal text or `@path`.
pub fn text_argument(value: &str) -> Result<String> {
    match value.strip_prefix('@') {
        Some(path) => {
            std::fs::read_to_string(path).with_context(|| format!("Failed to read {path}"))
        }
        None => Ok(value.to_string()),
    }
}

/// Initialize the store from an optional base64 snapshot.
pub fn initialize(binding: &mut ModuleBinding, snapshot: Option<&str>) -> Result<()> {
    match snapshot {
        Some(snapshot) => binding
            .initialize_base64(&text_argument(snapshot)?)
            .context("Failed to initialize store from snapshot"),
        None => binding
            .initialize(&[])
            .context("Failed to initialize empty store"),
    }
}
