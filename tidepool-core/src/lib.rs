//! Tidepool Core Library
//!
//! Protocol types for exchanging structured values with a computational
//! module through its linear memory arena.
//!
//! # Overview
//!
//! The host never shares Rust objects with the module. Instead it asks the
//! module's allocator for space, writes little-endian records into the
//! arena, and passes the resulting offsets ("handles") as plain integer
//! arguments. Results and diagnostics come back the same way.
//!
//! This crate holds everything about that exchange that does not need a
//! running module:
//!
//! - **Types**: typed handles and the arena generation counter
//! - **Wire**: byte layouts of the records the host encodes
//! - **Result**: decoding of module result tuples and range totals
//! - **Diagnostic**: decoding of tagged diagnostic messages
//! - **Ledger**: allocation bookkeeping that catches double releases
//! - **Config**: export and import names of a binding
//!
//! The wasmtime host lives in `tidepool-host`.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod config;
pub mod diagnostic;
pub mod error;
pub mod ledger;
pub mod prelude;
pub mod result;
pub mod types;
pub mod wire;

pub use config::{BindingConfig, ExportNames, ImportNames};
pub use diagnostic::{Diagnostic, ModuleCondition};
pub use error::{Result, TidepoolError};
pub use ledger::AllocationLedger;
pub use types::{AnyHandle, Generation, Handle, Owner, Record, RecordKind};
