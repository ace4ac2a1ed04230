//! Encoders that place records into the live arena.
//!
//! Each encoder makes exactly one allocation per record, writes the bytes
//! produced by the matching `tidepool_core::wire` layout, and returns a typed
//! handle. If writing fails after the allocation succeeded, the allocation
//! is released before the error is returned.

use crate::host::HostState;
use crate::memory::ArenaProxy;
use tidepool_core::error::Result;
use tidepool_core::result::DecodedTuple;
use tidepool_core::types::{
    AnyHandle, Handle, IdQueryRecord, PointerListRecord, RangeFilterRecord, RawBuffer, Record,
    ResultTupleRecord, SliceRecord,
};
use tidepool_core::wire::{
    IdQuery, IdQueryHeader, PointerListLayout, RANGE_FILTER_SIZE, RangeFilter, SliceLayout,
    arena_len,
};
use wasmtime::Store;

/// Handles produced by [`ArenaProxy::encode_range_filters`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodedFilters {
    /// The pointer list passed to the module.
    pub list: Handle<PointerListRecord>,
    /// One record per filter, referenced by the list.
    pub filters: Vec<Handle<RangeFilterRecord>>,
}

impl EncodedFilters {
    /// Every handle to release, list first.
    pub fn handles(&self) -> Vec<AnyHandle> {
        std::iter::once(self.list.erase())
            .chain(self.filters.iter().map(Handle::erase))
            .collect()
    }
}

impl ArenaProxy {
    fn place<R: Record>(
        &mut self,
        store: &mut Store<HostState>,
        size: u32,
        encode: impl FnOnce(u32) -> Result<Vec<u8>>,
    ) -> Result<Handle<R>> {
        let handle = self.allocate::<R>(store, size)?;
        let written = encode(handle.offset())
            .and_then(|bytes| self.write(store, &handle.erase(), 0, &bytes));
        if let Err(e) = written {
            // The write error wins over any release error.
            let _ = self.release(store, handle.erase());
            return Err(e);
        }
        Ok(handle)
    }

    /// Encode a byte slice: `[base][len]` followed by the payload.
    pub fn encode_slice(
        &mut self,
        store: &mut Store<HostState>,
        payload: &[u8],
    ) -> Result<Handle<SliceRecord>> {
        let size = SliceLayout::allocation_size(payload.len())?;
        self.place(store, size, |base| SliceLayout::encode(base, payload))
    }

    /// Encode UTF-8 text as a slice.
    pub fn encode_str(
        &mut self,
        store: &mut Store<HostState>,
        text: &str,
    ) -> Result<Handle<SliceRecord>> {
        self.encode_slice(store, text.as_bytes())
    }

    /// Copy bytes into a fresh headerless buffer.
    pub fn encode_raw(
        &mut self,
        store: &mut Store<HostState>,
        bytes: &[u8],
    ) -> Result<Handle<RawBuffer>> {
        let size = arena_len(bytes.len())?;
        self.place(store, size, |_| Ok(bytes.to_vec()))
    }

    /// Encode a tagged id query with its id list in the same allocation.
    pub fn encode_id_query(
        &mut self,
        store: &mut Store<HostState>,
        query: &IdQuery,
    ) -> Result<Handle<IdQueryRecord>> {
        let size = query.allocation_size()?;
        self.place(store, size, |base| query.encode(base))
    }

    /// Encode a list of handles in one allocation.
    ///
    /// Every handle must still be live.
    pub fn encode_pointer_list(
        &mut self,
        store: &mut Store<HostState>,
        handles: &[AnyHandle],
    ) -> Result<Handle<PointerListRecord>> {
        for handle in handles {
            self.check_live(handle)?;
        }
        let offsets: Vec<u32> = handles.iter().map(AnyHandle::offset).collect();
        let size = PointerListLayout::allocation_size(offsets.len())?;
        self.place(store, size, |base| PointerListLayout::encode(base, &offsets))
    }

    /// Encode one range filter record.
    pub fn encode_range_filter(
        &mut self,
        store: &mut Store<HostState>,
        filter: &RangeFilter,
    ) -> Result<Handle<RangeFilterRecord>> {
        filter.validate()?;
        self.place(store, RANGE_FILTER_SIZE, |_| filter.encode())
    }

    /// Encode every filter plus the pointer list that references them.
    ///
    /// All filters are validated before anything is allocated. On failure,
    /// whatever was already placed is released.
    pub fn encode_range_filters(
        &mut self,
        store: &mut Store<HostState>,
        filters: &[RangeFilter],
    ) -> Result<EncodedFilters> {
        for filter in filters {
            filter.validate()?;
        }

        let mut placed = Vec::with_capacity(filters.len());
        for filter in filters {
            match self.encode_range_filter(store, filter) {
                Ok(handle) => placed.push(handle),
                Err(e) => {
                    let _ = self.release_all(store, placed.iter().map(Handle::erase));
                    return Err(e);
                }
            }
        }

        let erased: Vec<AnyHandle> = placed.iter().map(Handle::erase).collect();
        match self.encode_pointer_list(store, &erased) {
            Ok(list) => Ok(EncodedFilters {
                list,
                filters: placed,
            }),
            Err(e) => {
                let _ = self.release_all(store, erased);
                Err(e)
            }
        }
    }

    /// Upload a decoded tuple for re-submission.
    ///
    /// The trailing bytes go into a fresh buffer and the uploaded tuple's
    /// `array_base` is patched to point at it. Returns `(tuple, buffer)`.
    pub fn encode_patched_tuple(
        &mut self,
        store: &mut Store<HostState>,
        tuple: &DecodedTuple,
    ) -> Result<(Handle<ResultTupleRecord>, Handle<RawBuffer>)> {
        let trailing = self.encode_raw(store, tuple.trailing_bytes())?;
        let patched = tuple.patched(trailing.offset());
        let size = match arena_len(patched.len()) {
            Ok(size) => size,
            Err(e) => {
                let _ = self.release(store, trailing.erase());
                return Err(e);
            }
        };
        match self.place(store, size, |_| Ok(patched)) {
            Ok(uploaded) => Ok((uploaded, trailing)),
            Err(e) => {
                let _ = self.release(store, trailing.erase());
                Err(e)
            }
        }
    }

    /// Read back the payload of a slice.
    pub fn decode_slice(
        &self,
        store: &Store<HostState>,
        handle: Handle<SliceRecord>,
    ) -> Result<Vec<u8>> {
        let memory = self.view(store, &handle.erase())?;
        let (_, payload) = SliceLayout::decode(memory, handle.offset())?;
        Ok(payload.to_vec())
    }

    /// Read back an id query.
    pub fn decode_id_query(
        &self,
        store: &Store<HostState>,
        handle: Handle<IdQueryRecord>,
    ) -> Result<IdQuery> {
        let memory = self.view(store, &handle.erase())?;
        IdQueryHeader::read(memory, handle.offset())?.to_query(memory)
    }

    /// Read back the offsets stored in a pointer list.
    pub fn decode_pointer_list(
        &self,
        store: &Store<HostState>,
        handle: Handle<PointerListRecord>,
    ) -> Result<Vec<u32>> {
        let memory = self.view(store, &handle.erase())?;
        let (_, offsets) = PointerListLayout::decode(memory, handle.offset())?;
        Ok(offsets)
    }
}
