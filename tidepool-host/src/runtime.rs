//! Engine and module management.
//!
//! A [`WasmRuntime`] owns the Wasmtime engine, compiles store modules and
//! creates the stores bindings run in. Every store it creates carries the
//! arena page cap and, when configured, an execution fuel budget. One
//! runtime can back any number of bindings.

use crate::host::HostState;
use crate::sink::DiagnosticSink;
use dashmap::DashMap;
use std::path::Path;
use std::sync::Arc;
use tidepool_core::error::{Result, TidepoolError};
use tracing::debug;
use wasmtime::{Config, Engine, Module, Store, StoreLimits, StoreLimitsBuilder};

/// Bytes per WASM page.
pub const WASM_PAGE_SIZE: u64 = 64 * 1024;

/// Default arena cap in pages (64 MB).
const DEFAULT_MAX_ARENA_PAGES: u32 = 1024;

/// Runtime configuration.
#[derive(Debug, Clone)]
pub struct WasmRuntimeConfig {
    /// Pages an arena may grow to.
    pub max_arena_pages: u32,
    /// Fuel each store starts with; `None` runs without metering.
    pub fuel: Option<u64>,
    /// Reuse the compiled module when the same bytes are compiled again.
    pub cache_modules: bool,
    /// Emit debug info in compiled code.
    pub debug_info: bool,
}

impl Default for WasmRuntimeConfig {
    fn default() -> Self {
        Self {
            max_arena_pages: DEFAULT_MAX_ARENA_PAGES,
            fuel: None,
            cache_modules: true,
            debug_info: false,
        }
    }
}

impl WasmRuntimeConfig {
    /// Stricter limits for tests: a 16 MB arena and a fuel budget.
    pub fn testing() -> Self {
        Self {
            max_arena_pages: 256,
            fuel: Some(10_000_000),
            cache_modules: false,
            debug_info: true,
        }
    }

    /// Set the arena cap in pages.
    pub fn with_max_arena_pages(mut self, pages: u32) -> Self {
        self.max_arena_pages = pages;
        self
    }

    /// Set the fuel budget per store.
    pub fn with_fuel(mut self, fuel: Option<u64>) -> Self {
        self.fuel = fuel;
        self
    }

    /// Enable or disable module reuse.
    pub fn with_cache(mut self, enabled: bool) -> Self {
        self.cache_modules = enabled;
        self
    }

    fn engine_config(&self) -> Config {
        let mut config = Config::new();
        config.consume_fuel(self.fuel.is_some());
        config.debug_info(self.debug_info);
        config.strategy(wasmtime::Strategy::Cranelift);
        config
    }

    /// Limits holding a store to one instance with one capped arena.
    pub fn store_limits(&self) -> StoreLimits {
        StoreLimitsBuilder::new()
            .memory_size((self.max_arena_pages as u64 * WASM_PAGE_SIZE) as usize)
            .instances(1)
            .memories(1)
            .build()
    }
}

/// A compiled store module.
#[derive(Debug)]
pub struct CompiledModule {
    name: String,
    module: Module,
}

impl CompiledModule {
    /// Name used in errors and logs.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The compiled Wasmtime module.
    pub fn module(&self) -> &Module {
        &self.module
    }
}

/// Wasmtime engine plus compiled modules keyed by content hash.
pub struct WasmRuntime {
    engine: Engine,
    config: WasmRuntimeConfig,
    modules: DashMap<u64, Arc<CompiledModule>>,
}

impl WasmRuntime {
    /// Create a runtime.
    pub fn new(config: WasmRuntimeConfig) -> Result<Self> {
        let engine = Engine::new(&config.engine_config()).map_err(|e| TidepoolError::WasmLoad {
            module: "engine".to_string(),
            cause: e.to_string(),
        })?;

        Ok(Self {
            engine,
            config,
            modules: DashMap::new(),
        })
    }

    /// Create a runtime with the default configuration.
    pub fn with_defaults() -> Result<Self> {
        Self::new(WasmRuntimeConfig::default())
    }

    /// The Wasmtime engine.
    pub fn engine(&self) -> &Engine {
        &self.engine
    }

    /// The runtime configuration.
    pub fn config(&self) -> &WasmRuntimeConfig {
        &self.config
    }

    /// Compile a store module.
    ///
    /// With caching on, compiling bytes seen before returns the earlier
    /// module.
    pub fn compile(&self, name: &str, wasm_bytes: &[u8]) -> Result<Arc<CompiledModule>> {
        let key = content_hash(wasm_bytes);
        if self.config.cache_modules {
            if let Some(cached) = self.modules.get(&key) {
                debug!(module = name, key, "module reused");
                return Ok(Arc::clone(&cached));
            }
        }

        let module = Module::new(&self.engine, wasm_bytes).map_err(|e| TidepoolError::WasmLoad {
            module: name.to_string(),
            cause: e.to_string(),
        })?;
        let compiled = Arc::new(CompiledModule {
            name: name.to_string(),
            module,
        });
        if self.config.cache_modules {
            self.modules.insert(key, Arc::clone(&compiled));
        }

        debug!(module = name, bytes = wasm_bytes.len(), "module compiled");
        Ok(compiled)
    }

    /// Compile a store module from a `.wasm` file, named after the file.
    pub fn compile_file(&self, path: &Path) -> Result<Arc<CompiledModule>> {
        let wasm_bytes = std::fs::read(path).map_err(|e| TidepoolError::Io {
            path: path.to_path_buf(),
            cause: e.to_string(),
        })?;
        let name = path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("unknown");
        self.compile(name, &wasm_bytes)
    }

    /// Create a store for one binding of `module`.
    ///
    /// The store is capped by [`WasmRuntimeConfig::store_limits`] and
    /// starts with the configured fuel.
    pub fn new_store(
        &self,
        module: &CompiledModule,
        sink: Arc<dyn DiagnosticSink>,
    ) -> Result<Store<HostState>> {
        let state = HostState::new(sink, self.config.store_limits());
        let mut store = Store::new(&self.engine, state);
        store.limiter(|state| &mut state.limits);

        if let Some(fuel) = self.config.fuel {
            store.set_fuel(fuel).map_err(|e| TidepoolError::WasmLoad {
                module: module.name().to_string(),
                cause: format!("Failed to set fuel: {e}"),
            })?;
        }
        Ok(store)
    }
}

fn content_hash(bytes: &[u8]) -> u64 {
    use std::hash::{Hash, Hasher};

    let mut hasher = std::collections::hash_map::DefaultHasher::new();
    bytes.hash(&mut hasher);
    hasher.finish()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sink::MemorySink;

    const EMPTY_MODULE: &str = "(module (memory (export \"memory\") 1))";

    #[test]
    fn default_config() {
        let config = WasmRuntimeConfig::default();
        assert_eq!(config.max_arena_pages, DEFAULT_MAX_ARENA_PAGES);
        assert_eq!(config.fuel, None);
        assert!(config.cache_modules);
    }

    #[test]
    fn config_builder() {
        let config = WasmRuntimeConfig::default()
            .with_max_arena_pages(4)
            .with_fuel(Some(500))
            .with_cache(false);
        assert_eq!(config.max_arena_pages, 4);
        assert_eq!(config.fuel, Some(500));
        assert!(!config.cache_modules);
    }

    #[test]
    fn invalid_bytes_fail_to_load() {
        let runtime = WasmRuntime::with_defaults().unwrap();
        let err = runtime.compile("garbage", b"not wasm").unwrap_err();
        assert_eq!(err.code(), "E701");
    }

    #[test]
    fn new_store_starts_with_fuel() {
        let runtime = WasmRuntime::new(WasmRuntimeConfig::testing()).unwrap();
        let bytes = wat::parse_str(EMPTY_MODULE).unwrap();
        let module = runtime.compile("empty", &bytes).unwrap();

        let store = runtime.new_store(&module, Arc::new(MemorySink::new())).unwrap();
        assert_eq!(store.get_fuel().unwrap(), 10_000_000);
    }

    #[test]
    fn content_hash_distinguishes_modules() {
        let data = b"\0asm\x01\0\0\0";
        assert_eq!(content_hash(data), content_hash(data));
        assert_ne!(content_hash(data), content_hash(b"\0asm\x01\0\0\0\0"));
    }
}
