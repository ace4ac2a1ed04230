//! Module binding.
//!
//! A [`ModuleBinding`] owns one instantiated module together with its
//! store, arena proxy and size descriptors. Every call takes `&mut self`,
//! so the arena is never shared and needs no locking.
//!
//! A fatal error (allocator failure or protocol violation) terminates the
//! binding: every later call returns [`TidepoolError::SessionTerminated`].

use crate::decode::ModuleResult;
use crate::descriptor::SizeDescriptors;
use crate::encode::EncodedFilters;
use crate::host::{HostState, create_linker};
use crate::memory::ArenaProxy;
use crate::runtime::{CompiledModule, WasmRuntime};
use crate::sink::DiagnosticSink;
use serde::Serialize;
use std::sync::Arc;
use tidepool_core::config::BindingConfig;
use tidepool_core::diagnostic::{Diagnostic, ModuleCondition};
use tidepool_core::error::{Result, TidepoolError};
use tidepool_core::ledger::AllocationLedger;
use tidepool_core::result::{ElementKind, Stride};
use tidepool_core::types::{
    AnyHandle, Generation, Handle, IdQueryRecord, PointerListRecord, RangeFilterRecord, RawBuffer,
    SliceRecord,
};
use tidepool_core::wire::{IdQuery, RangeFilter};
use tracing::{debug, error, info};
use wasmtime::{Func, Instance, Store, TypedFunc, WasmParams, WasmResults};

/// What an entry point call produced.
pub(crate) struct Outcome<T> {
    /// The call's return value.
    pub value: T,
    /// Diagnostics captured during the call, in emission order.
    pub diagnostics: Vec<Diagnostic>,
}

impl<T> Outcome<T> {
    /// Turn any condition reported during the call into an error.
    pub fn check(&self, entry_point: &str) -> Result<()> {
        check_conditions(entry_point, &self.diagnostics)
    }
}

/// Availability of one operation's export.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EntryPointStatus {
    /// Operation name.
    pub operation: &'static str,
    /// Export the operation calls.
    pub export: String,
    /// Whether the module exports a function under that name.
    pub available: bool,
}

/// Summary of a bound module.
#[derive(Debug, Clone, Serialize)]
pub struct BindingReport {
    /// Module name.
    pub module: String,
    /// Every export name, in module order.
    pub exports: Vec<String>,
    /// Per-operation availability.
    pub entry_points: Vec<EntryPointStatus>,
    /// Resolved byte length of a result tuple.
    pub histogram_bytes: Option<u32>,
    /// Resolved byte length of a trailing element.
    pub recommendation_bytes: Option<u32>,
    /// Current arena size.
    pub arena_bytes: usize,
    /// Current arena generation.
    pub generation: u32,
    /// Allocations the host still owes the module.
    pub live_allocations: usize,
    /// Ledger entries held, live or released.
    pub tracked_allocations: usize,
}

/// One instantiated module and everything needed to talk to it.
pub struct ModuleBinding {
    name: String,
    store: Store<HostState>,
    instance: Instance,
    arena: ArenaProxy,
    descriptors: SizeDescriptors,
    config: BindingConfig,
    terminated: Option<String>,
}

fn missing_export(name: &str, cause: impl ToString) -> TidepoolError {
    TidepoolError::MissingExport {
        name: name.to_string(),
        cause: cause.to_string(),
    }
}

/// Map an error raised while a module call was running.
///
/// Errors raised by our own host functions come back intact when they are
/// fatal; anything else is a trap of the entry point.
fn call_error(entry_point: &str, error: wasmtime::Error) -> TidepoolError {
    match error.downcast::<TidepoolError>() {
        Ok(inner) if inner.is_fatal() => inner,
        Ok(inner) => TidepoolError::WasmTrap {
            entry_point: entry_point.to_string(),
            cause: inner.to_string(),
        },
        Err(error) => TidepoolError::WasmTrap {
            entry_point: entry_point.to_string(),
            cause: format!("{error:#}"),
        },
    }
}

/// Turn reported module conditions into errors.
fn check_conditions(entry_point: &str, diagnostics: &[Diagnostic]) -> Result<()> {
    let conditions: Vec<ModuleCondition> =
        diagnostics.iter().filter_map(Diagnostic::condition).collect();

    if conditions.contains(&ModuleCondition::Uninitialized) {
        return Err(TidepoolError::StoreUninitialized {
            entry_point: entry_point.to_string(),
        });
    }
    match conditions.first() {
        Some(condition) => Err(TidepoolError::ModuleReported {
            entry_point: entry_point.to_string(),
            condition: condition.to_string(),
        }),
        None => Ok(()),
    }
}

impl ModuleBinding {
    /// Instantiate `module` and bind the protocol to it.
    ///
    /// The sink receives every diagnostic the module emits for the lifetime
    /// of the binding.
    pub fn instantiate(
        runtime: &WasmRuntime,
        module: &CompiledModule,
        config: BindingConfig,
        sink: Arc<dyn DiagnosticSink>,
    ) -> Result<Self> {
        let mut store = runtime.new_store(module, sink)?;
        let linker = create_linker(runtime.engine(), &config.imports)?;
        let instance = linker
            .instantiate(&mut store, module.module())
            .map_err(|e| TidepoolError::WasmLoad {
                module: module.name().to_string(),
                cause: format!("Failed to instantiate module: {e}"),
            })?;

        let exports = &config.exports;
        let memory = instance
            .get_memory(&mut store, &exports.memory)
            .ok_or_else(|| missing_export(&exports.memory, "not exported as a memory"))?;
        store.data_mut().memory = Some(memory);

        let alloc_fn: TypedFunc<u32, u32> = instance
            .get_typed_func(&mut store, &exports.allocate)
            .map_err(|e| missing_export(&exports.allocate, e))?;
        let dealloc_fn: TypedFunc<(u32, u32), ()> = instance
            .get_typed_func(&mut store, &exports.release)
            .map_err(|e| missing_export(&exports.release, e))?;

        let arena = ArenaProxy::new(&store, memory, alloc_fn, dealloc_fn, exports.release.clone());
        let descriptors = SizeDescriptors::new(&mut store, &instance, exports);

        let mut binding = Self {
            name: module.name().to_string(),
            store,
            instance,
            arena,
            descriptors,
            config,
            terminated: None,
        };

        let pages = binding.config.reserve_pages;
        binding.reserve(pages)?;

        info!(
            module = %binding.name,
            arena_bytes = binding.arena_size(),
            "module bound"
        );
        Ok(binding)
    }

    /// Module name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Binding configuration.
    pub fn config(&self) -> &BindingConfig {
        &self.config
    }

    /// Allocation ledger.
    pub fn ledger(&self) -> &AllocationLedger {
        self.arena.ledger()
    }

    /// Current arena generation.
    pub fn generation(&self) -> Generation {
        self.arena.generation()
    }

    /// Current arena size in bytes.
    pub fn arena_size(&self) -> usize {
        self.arena.size(&self.store)
    }

    /// Whether a fatal error has terminated the binding.
    pub fn is_terminated(&self) -> bool {
        self.terminated.is_some()
    }

    /// The fatal error that terminated the binding, if any.
    pub fn termination_cause(&self) -> Option<&str> {
        self.terminated.as_deref()
    }

    /// Run `op` unless terminated, and terminate if it fails fatally.
    pub(crate) fn guarded<T>(&mut self, op: impl FnOnce(&mut Self) -> Result<T>) -> Result<T> {
        if let Some(cause) = &self.terminated {
            return Err(TidepoolError::SessionTerminated {
                cause: cause.clone(),
            });
        }

        let result = op(self);
        if let Err(e) = &result {
            if e.is_fatal() {
                error!(module = %self.name, code = e.code(), error = %e, "session terminated");
                self.terminated = Some(e.to_string());
            }
        }
        result
    }

    /// Look up an optional entry point.
    pub(crate) fn entry_point<P: WasmParams, R: WasmResults>(
        &mut self,
        name: &str,
    ) -> Result<TypedFunc<P, R>> {
        self.instance
            .get_typed_func(&mut self.store, name)
            .map_err(|e| missing_export(name, e))
    }

    /// Call into the module, capturing diagnostics.
    ///
    /// Reported conditions are left unchecked so that a handle the call
    /// returned can be adopted first; see [`Self::settle`].
    pub(crate) fn invoke<T>(
        &mut self,
        entry_point: &str,
        call: impl FnOnce(&mut Store<HostState>) -> wasmtime::Result<T>,
    ) -> Result<Outcome<T>> {
        self.store.data_mut().captured.clear();
        debug!(module = %self.name, entry_point, "calling entry point");

        let result = call(&mut self.store);
        self.arena.sync(&self.store);
        let diagnostics = self.store.data_mut().take_captured();

        let value = result.map_err(|e| call_error(entry_point, e))?;
        Ok(Outcome { value, diagnostics })
    }

    /// Call into the module, capturing diagnostics and checking conditions.
    pub(crate) fn run<T>(
        &mut self,
        entry_point: &str,
        call: impl FnOnce(&mut Store<HostState>) -> wasmtime::Result<T>,
    ) -> Result<Outcome<T>> {
        let outcome = self.invoke(entry_point, call)?;
        outcome.check(entry_point)?;
        Ok(outcome)
    }

    /// Check `outcome` for conditions once its returned record is adopted.
    ///
    /// On a reported condition `handles` are released and the condition is
    /// returned.
    pub(crate) fn settle<T, A>(
        &mut self,
        entry_point: &str,
        outcome: &Outcome<T>,
        adopted: A,
        handles: Vec<AnyHandle>,
    ) -> Result<A> {
        match outcome.check(entry_point) {
            Ok(()) => Ok(adopted),
            Err(e) => self.release_after(Err(e), handles),
        }
    }

    /// Release `handles`, then return `result`.
    ///
    /// The handles are released whether or not `result` is an error.
    pub(crate) fn release_after<T>(
        &mut self,
        result: Result<T>,
        handles: Vec<AnyHandle>,
    ) -> Result<T> {
        let released = self.arena.release_all(&mut self.store, handles);
        let value = result?;
        released?;
        Ok(value)
    }

    pub(crate) fn arena_mut(&mut self) -> (&mut ArenaProxy, &mut Store<HostState>) {
        (&mut self.arena, &mut self.store)
    }

    pub(crate) fn arena_ref(&self) -> (&ArenaProxy, &Store<HostState>) {
        (&self.arena, &self.store)
    }

    pub(crate) fn store(&self) -> &Store<HostState> {
        &self.store
    }

    /// Look up an optional entry point whose signature is checked by the
    /// caller.
    pub(crate) fn entry_point_func(&mut self, name: &str) -> Result<Func> {
        self.instance
            .get_func(&mut self.store, name)
            .ok_or_else(|| missing_export(name, "not exported as a function"))
    }

    pub(crate) fn resolve_stride(&mut self, kind: ElementKind) -> Result<Stride> {
        let memory = *self.arena.memory();
        self.descriptors.byte_length(&mut self.store, &memory, kind)
    }

    /// Resolve the byte length the module publishes for `kind`.
    pub fn byte_length(&mut self, kind: ElementKind) -> Result<Stride> {
        self.guarded(|b| b.resolve_stride(kind))
    }

    /// Grow the arena by `pages`.
    pub fn reserve(&mut self, pages: u32) -> Result<Generation> {
        self.guarded(|b| b.arena.reserve(&mut b.store, pages))
    }

    /// Allocate `size` bytes of scratch space.
    pub fn allocate(&mut self, size: u32) -> Result<Handle<RawBuffer>> {
        self.guarded(|b| b.arena.allocate(&mut b.store, size))
    }

    /// Release a handle.
    pub fn release(&mut self, handle: AnyHandle) -> Result<()> {
        self.guarded(|b| b.arena.release(&mut b.store, handle))
    }

    /// Encode a byte slice.
    pub fn encode_slice(&mut self, payload: &[u8]) -> Result<Handle<SliceRecord>> {
        self.guarded(|b| b.arena.encode_slice(&mut b.store, payload))
    }

    /// Encode UTF-8 text as a slice.
    pub fn encode_str(&mut self, text: &str) -> Result<Handle<SliceRecord>> {
        self.guarded(|b| b.arena.encode_str(&mut b.store, text))
    }

    /// Copy bytes into a headerless buffer.
    pub fn encode_raw(&mut self, bytes: &[u8]) -> Result<Handle<RawBuffer>> {
        self.guarded(|b| b.arena.encode_raw(&mut b.store, bytes))
    }

    /// Encode a tagged id query.
    pub fn encode_id_query(&mut self, query: &IdQuery) -> Result<Handle<IdQueryRecord>> {
        self.guarded(|b| b.arena.encode_id_query(&mut b.store, query))
    }

    /// Encode a pointer list.
    pub fn encode_pointer_list(
        &mut self,
        handles: &[AnyHandle],
    ) -> Result<Handle<PointerListRecord>> {
        self.guarded(|b| b.arena.encode_pointer_list(&mut b.store, handles))
    }

    /// Encode one range filter.
    pub fn encode_range_filter(
        &mut self,
        filter: &RangeFilter,
    ) -> Result<Handle<RangeFilterRecord>> {
        self.guarded(|b| b.arena.encode_range_filter(&mut b.store, filter))
    }

    /// Encode range filters and the list referencing them.
    pub fn encode_range_filters(&mut self, filters: &[RangeFilter]) -> Result<EncodedFilters> {
        self.guarded(|b| b.arena.encode_range_filters(&mut b.store, filters))
    }

    /// Read back a slice payload.
    pub fn decode_slice(&mut self, handle: Handle<SliceRecord>) -> Result<Vec<u8>> {
        self.guarded(|b| b.arena.decode_slice(&b.store, handle))
    }

    /// Read back an id query.
    pub fn decode_id_query(&mut self, handle: Handle<IdQueryRecord>) -> Result<IdQuery> {
        self.guarded(|b| b.arena.decode_id_query(&b.store, handle))
    }

    /// Read back the offsets of a pointer list.
    pub fn decode_pointer_list(&mut self, handle: Handle<PointerListRecord>) -> Result<Vec<u32>> {
        self.guarded(|b| b.arena.decode_pointer_list(&b.store, handle))
    }

    /// Copy the bytes of an allocation.
    pub fn read(&mut self, handle: AnyHandle) -> Result<Vec<u8>> {
        self.guarded(|b| b.arena.read(&b.store, &handle))
    }

    /// Release a module result and its trailing array.
    pub fn release_result(&mut self, result: ModuleResult) -> Result<()> {
        self.guarded(|b| b.arena.release_all(&mut b.store, result.handles()))
    }

    /// Describe the bound module.
    pub fn inspect(&mut self) -> BindingReport {
        let exports: Vec<String> = self
            .instance
            .exports(&mut self.store)
            .map(|export| export.name().to_string())
            .collect();

        let names = &self.config.exports;
        let operations: [(&'static str, &String); 10] = [
            ("allocate", &names.allocate),
            ("release", &names.release),
            ("initialize", &names.initialize),
            ("persist", &names.persist),
            ("upsert_primary", &names.upsert_primary),
            ("upsert_secondary", &names.upsert_secondary),
            ("query", &names.query),
            ("fetch_snapshot_json", &names.fetch_snapshot_json),
            ("convert", &names.convert),
            ("aggregate_range", &names.aggregate_range),
        ];
        let entry_points = operations
            .into_iter()
            .map(|(operation, export)| EntryPointStatus {
                operation,
                export: export.clone(),
                available: exports.iter().any(|name| name == export),
            })
            .collect();

        let memory = *self.arena.memory();
        let mut resolve = |kind| {
            self.descriptors
                .byte_length(&mut self.store, &memory, kind)
                .ok()
                .map(|stride| stride.bytes())
        };
        let histogram_bytes = resolve(ElementKind::Histogram);
        let recommendation_bytes = resolve(ElementKind::Recommendation);

        BindingReport {
            module: self.name.clone(),
            exports,
            entry_points,
            histogram_bytes,
            recommendation_bytes,
            arena_bytes: self.arena.size(&self.store),
            generation: self.arena.generation().as_u32(),
            live_allocations: self.arena.ledger().live_count(),
            tracked_allocations: self.arena.ledger().tracked_count(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn uninitialized_wins_over_other_conditions() {
        let diagnostics = vec![
            Diagnostic::Condition(ModuleCondition::QueryFailed),
            Diagnostic::Condition(ModuleCondition::Uninitialized),
        ];
        let err = check_conditions("filterGames", &diagnostics).unwrap_err();
        assert!(matches!(err, TidepoolError::StoreUninitialized { .. }));
        assert!(err.is_recoverable());
    }

    #[test]
    fn other_conditions_are_reported() {
        let diagnostics = vec![
            Diagnostic::Log("working".to_string()),
            Diagnostic::Condition(ModuleCondition::SaveFailed),
        ];
        let err = check_conditions("persist", &diagnostics).unwrap_err();
        assert!(matches!(
            err,
            TidepoolError::ModuleReported { ref condition, .. } if condition == "save-failed"
        ));
    }

    #[test]
    fn no_condition_is_ok() {
        let diagnostics = vec![Diagnostic::Text("{}".to_string())];
        assert!(check_conditions("getFullJson", &diagnostics).is_ok());
    }

    #[test]
    fn fatal_host_errors_pass_through() {
        let inner = TidepoolError::MalformedRecord {
            kind: tidepool_core::RecordKind::RawBuffer,
            cause: "short".to_string(),
        };
        let err = call_error("persist", wasmtime::Error::new(inner));
        assert_eq!(err.code(), "E101");

        let utf8 = TidepoolError::InvalidUtf8 {
            offset: 4,
            cause: "bad".to_string(),
        };
        let err = call_error("persist", wasmtime::Error::new(utf8));
        assert_eq!(err.code(), "E702");
    }
}
