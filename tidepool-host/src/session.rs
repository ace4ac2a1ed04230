//! Entry point operations.
//!
//! Each operation encodes its arguments, calls one module export, collects
//! the response from the return value or the diagnostic channel, and
//! releases every allocation it made, on success and on failure alike.

use crate::binding::ModuleBinding;
use crate::decode::ModuleResult;
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use serde::Serialize;
use tidepool_core::diagnostic::Diagnostic;
use tidepool_core::error::{Result, TidepoolError};
use tidepool_core::result::{DecodedTuple, ElementKind, RANGE_TOTALS_SIZE, RangeTotals};
use tidepool_core::types::{Handle, RangeTotalsRecord, SliceRecord};
use tidepool_core::wire::{
    IdQuery, RangeFilter, SLICE_HEADER_SIZE, SliceDescriptor, nul_terminated,
};
use tracing::debug;
use wasmtime::{Val, ValType};

/// The last text response among `diagnostics`.
///
/// Nested text responses are preferred over plain tag-1 text.
fn text_response(entry_point: &str, diagnostics: &[Diagnostic]) -> Result<String> {
    let nested = diagnostics.iter().rev().find_map(|d| match d {
        Diagnostic::Text(text) => Some(text),
        _ => None,
    });
    let plain = || {
        diagnostics.iter().rev().find_map(|d| match d {
            Diagnostic::Log(text) => Some(text),
            _ => None,
        })
    };
    nested
        .or_else(plain)
        .cloned()
        .ok_or_else(|| TidepoolError::MissingResponse {
            entry_point: entry_point.to_string(),
            expected: "text response".to_string(),
        })
}

/// The last binary response among `diagnostics`.
fn binary_response(entry_point: &str, diagnostics: Vec<Diagnostic>) -> Result<Vec<u8>> {
    diagnostics
        .into_iter()
        .rev()
        .find_map(|d| match d {
            Diagnostic::Binary(bytes) => Some(bytes),
            _ => None,
        })
        .ok_or_else(|| TidepoolError::MissingResponse {
            entry_point: entry_point.to_string(),
            expected: "binary snapshot".to_string(),
        })
}

fn to_json<T: Serialize>(value: &T) -> Result<String> {
    serde_json::to_string(value).map_err(|e| TidepoolError::Serialization(e.to_string()))
}

impl ModuleBinding {
    fn call_with_slice(&mut self, export: &str, payload: &[u8]) -> Result<()> {
        let init = self.entry_point::<u32, ()>(export)?;
        let (arena, store) = self.arena_mut();
        let slice = arena.encode_slice(store, payload)?;
        let outcome = self.run(export, |store| init.call(store, slice.offset()));
        self.release_after(outcome, vec![slice.erase()])?;
        Ok(())
    }

    /// Load the store from a snapshot.
    pub fn initialize(&mut self, snapshot: &[u8]) -> Result<()> {
        let export = self.config().exports.initialize.clone();
        self.guarded(|b| b.call_with_slice(&export, snapshot))
    }

    /// Load the store from a base64 snapshot.
    pub fn initialize_base64(&mut self, snapshot: &str) -> Result<()> {
        let bytes = STANDARD
            .decode(snapshot.trim())
            .map_err(|e| TidepoolError::InvalidBase64 {
                cause: e.to_string(),
            })?;
        self.initialize(&bytes)
    }

    /// Serialize the store; the snapshot arrives through the diagnostic
    /// channel.
    pub fn persist(&mut self) -> Result<Vec<u8>> {
        let export = self.config().exports.persist.clone();
        self.guarded(|b| {
            let persist = b.entry_point::<(), ()>(&export)?;
            let outcome = b.run(&export, |store| persist.call(store, ()))?;
            binary_response(&export, outcome.diagnostics)
        })
    }

    /// Serialize the store as base64.
    pub fn persist_base64(&mut self) -> Result<String> {
        Ok(STANDARD.encode(self.persist()?))
    }

    /// Upsert primary records from a JSON payload.
    pub fn upsert_primary(&mut self, json: &str) -> Result<()> {
        let export = self.config().exports.upsert_primary.clone();
        self.guarded(|b| b.call_with_slice(&export, json.as_bytes()))
    }

    /// Upsert primary records serialized from `value`.
    pub fn upsert_primary_value<T: Serialize>(&mut self, value: &T) -> Result<()> {
        self.upsert_primary(&to_json(value)?)
    }

    /// Upsert secondary records from a JSON payload.
    pub fn upsert_secondary(&mut self, json: &str) -> Result<()> {
        let export = self.config().exports.upsert_secondary.clone();
        self.guarded(|b| b.call_with_slice(&export, json.as_bytes()))
    }

    /// Upsert secondary records serialized from `value`.
    pub fn upsert_secondary_value<T: Serialize>(&mut self, value: &T) -> Result<()> {
        self.upsert_secondary(&to_json(value)?)
    }

    /// Run a query and return the text the module emits for it.
    pub fn query(&mut self, query: &IdQuery, filters: &[RangeFilter]) -> Result<String> {
        let export = self.config().exports.query.clone();
        self.guarded(|b| {
            let run_query = b.entry_point::<(u32, u32), ()>(&export)?;
            let (arena, store) = b.arena_mut();
            let query_handle = arena.encode_id_query(store, query)?;
            let filters = match arena.encode_range_filters(store, filters) {
                Ok(filters) => filters,
                Err(e) => return b.release_after(Err(e), vec![query_handle.erase()]),
            };

            let args = (query_handle.offset(), filters.list.offset());
            let outcome = b
                .run(&export, |store| run_query.call(store, args))
                .and_then(|outcome| text_response(&export, &outcome.diagnostics));

            let mut handles = vec![query_handle.erase()];
            handles.extend(filters.handles());
            b.release_after(outcome, handles)
        })
    }

    /// Fetch the store as JSON.
    ///
    /// The export may return a slice handle or nothing; in the latter case
    /// the JSON arrives through the diagnostic channel.
    pub fn fetch_snapshot_json(&mut self) -> Result<String> {
        let export = self.config().exports.fetch_snapshot_json.clone();
        self.guarded(|b| {
            let func = b.entry_point_func(&export)?;
            let ty = func.ty(b.store());
            let results: Vec<ValType> = ty.results().collect();
            let returns_handle = match (ty.params().len(), results.as_slice()) {
                (0, []) => false,
                (0, [ValType::I32]) => true,
                _ => {
                    return Err(TidepoolError::MissingExport {
                        name: export.clone(),
                        cause: format!("expected `() -> i32` or `()`, found {ty:?}"),
                    });
                }
            };

            let outcome = b.invoke(&export, |store| {
                let mut results = vec![Val::I32(0); usize::from(returns_handle)];
                func.call(store, &[], &mut results)?;
                Ok(results.first().and_then(Val::i32).map(|offset| offset as u32))
            })?;

            match outcome.value.filter(|offset| *offset != 0) {
                Some(offset) => {
                    let (slice, base) = b.adopt_slice(offset)?;
                    let slice = b.settle(&export, &outcome, slice, vec![slice.erase()])?;
                    b.take_slice_text(slice, base)
                }
                None => {
                    outcome.check(&export)?;
                    text_response(&export, &outcome.diagnostics)
                }
            }
        })
    }

    /// Adopt a module-allocated slice; also returns its payload base.
    fn adopt_slice(&mut self, offset: u32) -> Result<(Handle<SliceRecord>, u32)> {
        let (arena, store) = self.arena_mut();
        let descriptor = SliceDescriptor::read(arena.memory().data(&*store), offset)?;
        let size = descriptor
            .length
            .checked_add(SLICE_HEADER_SIZE)
            .ok_or(TidepoolError::PayloadTooLarge {
                len: descriptor.length as usize + SLICE_HEADER_SIZE as usize,
            })?;
        let slice = arena.adopt::<SliceRecord>(store, offset, size)?;
        Ok((slice, descriptor.base))
    }

    /// Read an adopted slice as text, and release it.
    fn take_slice_text(&mut self, slice: Handle<SliceRecord>, base: u32) -> Result<String> {
        let (arena, store) = self.arena_mut();
        let text = arena.decode_slice(store, slice).and_then(|bytes| {
            String::from_utf8(bytes).map_err(|e| TidepoolError::InvalidUtf8 {
                offset: base,
                cause: e.to_string(),
            })
        });
        self.release_after(text, vec![slice.erase()])
    }

    /// Convert raw JSON into a result tuple.
    ///
    /// The JSON is passed as a NUL-terminated buffer. The returned tuple and
    /// its trailing array are owned by the caller until
    /// [`release_result`](Self::release_result).
    pub fn convert(&mut self, json: &str) -> Result<ModuleResult> {
        let export = self.config().exports.convert.clone();
        self.guarded(|b| {
            let convert = b.entry_point::<u32, u32>(&export)?;
            let bytes = nul_terminated(json.as_bytes())?;
            let (arena, store) = b.arena_mut();
            let input = arena.encode_raw(store, &bytes)?;

            let outcome = b.invoke(&export, |store| convert.call(store, input.offset()));
            let adopted = outcome.and_then(|outcome| {
                if outcome.value == 0 {
                    outcome.check(&export)?;
                }
                let tuple = b.resolve_stride(ElementKind::Histogram)?;
                let element = b.resolve_stride(ElementKind::Recommendation)?;
                let (arena, store) = b.arena_mut();
                let result = arena.adopt_result(store, outcome.value, tuple, element)?;
                b.settle(&export, &outcome, result, result.handles())
            });
            b.release_after(adopted, vec![input.erase()])
        })
    }

    /// Decode a result tuple the module returned.
    pub fn decode_result(&mut self, result: &ModuleResult) -> Result<DecodedTuple> {
        self.guarded(|b| {
            let tuple = b.resolve_stride(ElementKind::Histogram)?;
            let element = b.resolve_stride(ElementKind::Recommendation)?;
            let (arena, store) = b.arena_ref();
            arena.decode_tuple(store, result.tuple, tuple, element)
        })
    }

    /// Aggregate a decoded tuple over `[start, end]`.
    ///
    /// The tuple is uploaded again with its trailing array copied into a
    /// fresh buffer and `array_base` patched to point at that buffer.
    pub fn aggregate_range(
        &mut self,
        tuple: &DecodedTuple,
        start: u32,
        end: u32,
    ) -> Result<RangeTotals> {
        self.guarded(|b| {
            let (arena, store) = b.arena_mut();
            let (uploaded, trailing) = arena.encode_patched_tuple(store, tuple)?;
            debug!(tuple = %uploaded, trailing = %trailing, "tuple re-uploaded");
            let totals = b.accumulate(uploaded.offset(), start, end);
            b.release_after(totals, vec![uploaded.erase(), trailing.erase()])
        })
    }

    /// Aggregate a module-owned result tuple over `[start, end]` without
    /// copying it.
    ///
    /// The result must not have been released.
    pub fn aggregate_range_in_place(
        &mut self,
        result: &ModuleResult,
        start: u32,
        end: u32,
    ) -> Result<RangeTotals> {
        self.guarded(|b| {
            let (arena, _) = b.arena_ref();
            for handle in result.handles() {
                arena.check_live(&handle)?;
            }
            b.accumulate(result.tuple.offset(), start, end)
        })
    }

    fn accumulate(&mut self, tuple: u32, start: u32, end: u32) -> Result<RangeTotals> {
        let export = self.config().exports.aggregate_range.clone();
        let accumulate = self.entry_point::<(u32, u32, u32), u32>(&export)?;
        let outcome = self.invoke(&export, |store| accumulate.call(store, (tuple, start, end)))?;
        if outcome.value == 0 {
            outcome.check(&export)?;
        }

        let (arena, store) = self.arena_mut();
        let totals = arena.adopt::<RangeTotalsRecord>(store, outcome.value, RANGE_TOTALS_SIZE)?;
        let totals = self.settle(&export, &outcome, totals, vec![totals.erase()])?;
        let (arena, store) = self.arena_mut();
        let decoded = arena.decode_totals(store, totals);
        self.release_after(decoded, vec![totals.erase()])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tidepool_core::diagnostic::ModuleCondition;

    #[test]
    fn nested_text_preferred_over_log() {
        let diagnostics = vec![
            Diagnostic::Text("[1]".to_string()),
            Diagnostic::Log("debug line".to_string()),
        ];
        assert_eq!(text_response("filterGames", &diagnostics).unwrap(), "[1]");
    }

    #[test]
    fn log_text_is_a_fallback() {
        let diagnostics = vec![Diagnostic::Log("{\"games\":[]}".to_string())];
        assert_eq!(
            text_response("getFullJson", &diagnostics).unwrap(),
            "{\"games\":[]}"
        );
    }

    #[test]
    fn missing_text_response() {
        let diagnostics = vec![Diagnostic::Condition(ModuleCondition::QueryFailed)];
        let err = text_response("filterGames", &diagnostics).unwrap_err();
        assert_eq!(err.code(), "E303");
    }

    #[test]
    fn last_binary_response_wins() {
        let diagnostics = vec![
            Diagnostic::Binary(vec![1]),
            Diagnostic::Text("x".to_string()),
            Diagnostic::Binary(vec![2, 3]),
        ];
        assert_eq!(binary_response("persist", diagnostics).unwrap(), vec![2, 3]);
        assert!(binary_response("persist", Vec::new()).is_err());
    }
}
