//! Decoders for records the module returns.

use crate::host::HostState;
use crate::memory::ArenaProxy;
use tidepool_core::error::{Result, TidepoolError};
use tidepool_core::result::{DecodedTuple, RangeTotals, Stride, TupleHeader};
use tidepool_core::types::{AnyHandle, Handle, RangeTotalsRecord, RawBuffer, ResultTupleRecord};
use wasmtime::Store;

/// A result tuple the module returned, adopted together with its trailing
/// array.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ModuleResult {
    /// The tuple itself.
    pub tuple: Handle<ResultTupleRecord>,
    /// The trailing array; absent when the array has no capacity.
    pub trailing: Option<Handle<RawBuffer>>,
}

impl ModuleResult {
    /// Every handle to release, tuple first.
    pub fn handles(&self) -> Vec<AnyHandle> {
        std::iter::once(self.tuple.erase())
            .chain(self.trailing.map(|h| h.erase()))
            .collect()
    }
}

impl ArenaProxy {
    /// Adopt the tuple at `offset` and the trailing array it points to.
    ///
    /// The tuple spans `tuple` bytes and the array `capacity * element`.
    pub fn adopt_result(
        &mut self,
        store: &Store<HostState>,
        offset: u32,
        tuple: Stride,
        element: Stride,
    ) -> Result<ModuleResult> {
        let tuple_handle = self.adopt::<ResultTupleRecord>(store, offset, tuple.bytes())?;
        let header = TupleHeader::read(self.memory().data(store), offset)?;

        let trailing = if header.array.capacity == 0 {
            None
        } else {
            let bytes = header
                .array
                .capacity
                .checked_mul(element.bytes())
                .ok_or(TidepoolError::PayloadTooLarge {
                    len: header.array.capacity as usize * element.bytes() as usize,
                })?;
            Some(self.adopt::<RawBuffer>(store, header.array.base, bytes)?)
        };

        Ok(ModuleResult {
            tuple: tuple_handle,
            trailing,
        })
    }

    /// Decode a result tuple and copy its trailing bytes.
    pub fn decode_tuple(
        &self,
        store: &Store<HostState>,
        handle: Handle<ResultTupleRecord>,
        tuple: Stride,
        element: Stride,
    ) -> Result<DecodedTuple> {
        let memory = self.view(store, &handle.erase())?;
        DecodedTuple::decode(memory, handle.offset(), tuple, element)
    }

    /// Decode the totals returned by an aggregation.
    pub fn decode_totals(
        &self,
        store: &Store<HostState>,
        handle: Handle<RangeTotalsRecord>,
    ) -> Result<RangeTotals> {
        let memory = self.view(store, &handle.erase())?;
        RangeTotals::decode(memory, handle.offset())
    }
}
