//! Wasmtime host side of the tidepool arena marshalling protocol.
//!
//! The host talks to a compiled store module through its linear memory (the
//! arena). Every byte the host places in the arena comes from the module's
//! own allocator, every record follows a fixed little-endian layout from
//! `tidepool_core::wire`, and the module reports text, binary snapshots and
//! error conditions through an imported diagnostic function.
//!
//! # Architecture
//!
//! - **WasmRuntime**: Manages the Wasmtime engine and compiled modules
//! - **ModuleBinding**: One instantiated module; every protocol operation
//! - **ArenaProxy**: Allocator proxy, allocation ledger and generations
//! - **SizeDescriptors**: Byte lengths the module publishes as globals
//! - **HostState**: State reachable from the host functions
//! - **DiagnosticSink**: Destination for decoded diagnostics
//!
//! # Module ABI Contract
//!
//! Modules must export (names configurable through `ExportNames`):
//!
//! ```text
//! memory: Memory
//! alloc(size: u32) -> u32
//! dealloc(handle: u32, size: u32)
//! ```
//!
//! and may export any of the entry points:
//!
//! ```text
//! init(slice: u32)
//! persist()
//! updateGames(slice: u32)
//! updateUsers(slice: u32)
//! filterGames(query: u32, filters: u32)
//! getFullJson() [-> u32]
//! convert(json: u32) -> u32
//! accumulate(tuple: u32, start: u32, end: u32) -> u32
//! ```
//!
//! Modules import:
//!
//! ```text
//! ctx.resolve(ptr: u32, len: u32)
//! console.log(ptr: u32, len: u32)
//! ```
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use tidepool_core::BindingConfig;
//! use tidepool_host::{ModuleBinding, TracingSink, WasmRuntime};
//!
//! let runtime = WasmRuntime::with_defaults()?;
//! let module = runtime.compile_file("store.wasm".as_ref())?;
//! let mut binding =
//!     ModuleBinding::instantiate(&runtime, &module, BindingConfig::default(), Arc::new(TracingSink))?;
//!
//! binding.initialize_base64(&snapshot)?;
//! let json = binding.fetch_snapshot_json()?;
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

mod binding;
mod decode;
mod descriptor;
mod encode;
mod host;
mod memory;
mod runtime;
mod session;
mod sink;

// Re-export public types
pub use binding::{BindingReport, EntryPointStatus, ModuleBinding};
pub use decode::ModuleResult;
pub use descriptor::SizeDescriptors;
pub use encode::EncodedFilters;
pub use host::{HostState, create_linker, register_host_functions};
pub use memory::ArenaProxy;
pub use runtime::{CompiledModule, WASM_PAGE_SIZE, WasmRuntime, WasmRuntimeConfig};
pub use sink::{DiagnosticSink, MemorySink, TracingSink};
