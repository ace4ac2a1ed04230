//! Host function bindings for modules.
//!
//! Provides the diagnostic channel and plain log imports. Both read the
//! arena through the `Caller`, so they see the memory exactly as the module
//! left it at the moment of the call.

use crate::sink::DiagnosticSink;
use std::sync::Arc;
use tidepool_core::config::ImportNames;
use tidepool_core::diagnostic::{Diagnostic, decode_diagnostic};
use tidepool_core::error::{Result, TidepoolError};
use tidepool_core::wire::read_bytes;
use wasmtime::{Caller, Engine, Linker, Memory, StoreLimits};

/// State provided to host functions.
pub struct HostState {
    /// Where recognized diagnostics are emitted.
    pub sink: Arc<dyn DiagnosticSink>,
    /// Diagnostics captured since the current entry point call began.
    pub captured: Vec<Diagnostic>,
    /// The module's arena, known once the instance exists.
    pub memory: Option<Memory>,
    /// Resource limits enforced on the store.
    pub limits: StoreLimits,
}

impl HostState {
    /// Create new host state.
    pub fn new(sink: Arc<dyn DiagnosticSink>, limits: StoreLimits) -> Self {
        Self {
            sink,
            captured: Vec::new(),
            memory: None,
            limits,
        }
    }

    /// Take the diagnostics captured so far.
    pub fn take_captured(&mut self) -> Vec<Diagnostic> {
        std::mem::take(&mut self.captured)
    }
}

fn arena(caller: &Caller<'_, HostState>, function: &str) -> Result<Memory> {
    caller
        .data()
        .memory
        .ok_or_else(|| TidepoolError::WasmHostFunction {
            function: function.to_string(),
            cause: "called before the module's memory was bound".to_string(),
        })
}

/// Register all host functions with a Wasmtime Linker.
pub fn register_host_functions(
    linker: &mut Linker<HostState>,
    imports: &ImportNames,
) -> Result<()> {
    register_diagnostic_function(linker, imports)?;
    register_logging_function(linker, imports)?;
    Ok(())
}

/// Register the diagnostic channel.
///
/// `(ptr, len)` addresses a tagged message. Unknown tags are dropped; a
/// message that cannot be read traps the calling entry point.
fn register_diagnostic_function(
    linker: &mut Linker<HostState>,
    imports: &ImportNames,
) -> Result<()> {
    let function = format!("{}.{}", imports.diagnostic_module, imports.diagnostic_field);
    let name = function.clone();
    linker
        .func_wrap(
            &imports.diagnostic_module,
            &imports.diagnostic_field,
            move |mut caller: Caller<'_, HostState>, ptr: u32, len: u32| -> wasmtime::Result<()> {
                let memory = arena(&caller, &name)?;
                let Some(diagnostic) = decode_diagnostic(memory.data(&caller), ptr, len)? else {
                    tracing::trace!(ptr, len, "ignoring unrecognized diagnostic");
                    return Ok(());
                };

                let state = caller.data_mut();
                state.sink.emit(&diagnostic);
                state.captured.push(diagnostic);
                Ok(())
            },
        )
        .map_err(|e| TidepoolError::WasmHostFunction {
            function,
            cause: e.to_string(),
        })?;
    Ok(())
}

/// Register the plain log function: `(ptr, len)` of UTF-8 text.
///
/// Invalid sequences are replaced rather than trapping.
fn register_logging_function(
    linker: &mut Linker<HostState>,
    imports: &ImportNames,
) -> Result<()> {
    let function = format!("{}.{}", imports.log_module, imports.log_field);
    let name = function.clone();
    linker
        .func_wrap(
            &imports.log_module,
            &imports.log_field,
            move |caller: Caller<'_, HostState>, ptr: u32, len: u32| -> wasmtime::Result<()> {
                let memory = arena(&caller, &name)?;
                let bytes = read_bytes(memory.data(&caller), ptr, len)?;
                let text = String::from_utf8_lossy(bytes).into_owned();
                caller.data().sink.log(&text);
                Ok(())
            },
        )
        .map_err(|e| TidepoolError::WasmHostFunction {
            function,
            cause: e.to_string(),
        })?;
    Ok(())
}

/// Create a linker with all host functions registered.
pub fn create_linker(engine: &Engine, imports: &ImportNames) -> Result<Linker<HostState>> {
    let mut linker = Linker::new(engine);
    register_host_functions(&mut linker, imports)?;
    Ok(linker)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sink::MemorySink;

    #[test]
    fn linker_creation() {
        let engine = Engine::default();
        assert!(create_linker(&engine, &ImportNames::default()).is_ok());
    }

    #[test]
    fn same_module_for_both_imports() {
        let engine = Engine::default();
        let imports = ImportNames {
            diagnostic_module: "env".to_string(),
            log_module: "env".to_string(),
            ..ImportNames::default()
        };
        assert!(create_linker(&engine, &imports).is_ok());
    }

    #[test]
    fn duplicate_import_is_rejected() {
        let engine = Engine::default();
        let imports = ImportNames {
            diagnostic_module: "env".to_string(),
            diagnostic_field: "out".to_string(),
            log_module: "env".to_string(),
            log_field: "out".to_string(),
        };
        let err = create_linker(&engine, &imports).err().unwrap();
        assert_eq!(err.code(), "E704");
    }

    #[test]
    fn host_state_capture() {
        let mut state = HostState::new(Arc::new(MemorySink::new()), StoreLimits::default());
        state.captured.push(Diagnostic::Log("x".to_string()));
        assert_eq!(state.take_captured().len(), 1);
        assert!(state.captured.is_empty());
    }
}
