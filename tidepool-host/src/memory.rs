//! Arena allocator proxy.
//!
//! All arena space the host uses comes from the module's own allocator.
//! The proxy forwards `allocate`/`release` calls, records every allocation
//! in the ledger, and tracks the arena generation: whenever the arena's
//! byte size changes between observations the generation is bumped, and
//! any read or write through a handle minted in an older generation fails.

use crate::host::HostState;
use crate::runtime::WASM_PAGE_SIZE;
use tidepool_core::error::{Result, TidepoolError};
use tidepool_core::ledger::AllocationLedger;
use tidepool_core::types::{AnyHandle, Generation, Handle, Owner, Record};
use tracing::debug;
use wasmtime::{Memory, Store, TypedFunc};

/// Proxy for the module's allocator and arena.
pub struct ArenaProxy {
    /// The module's linear memory.
    memory: Memory,
    /// `allocate(size) -> handle`.
    alloc_fn: TypedFunc<u32, u32>,
    /// `release(handle, size)`.
    dealloc_fn: TypedFunc<(u32, u32), ()>,
    /// Export name of `release`, for trap errors.
    release_name: String,
    /// Every allocation the host must hand back.
    ledger: AllocationLedger,
    /// Current arena generation.
    generation: Generation,
    /// Arena size at the last observation.
    observed_size: usize,
}

impl ArenaProxy {
    /// Create a proxy over an instantiated module.
    pub fn new(
        store: &Store<HostState>,
        memory: Memory,
        alloc_fn: TypedFunc<u32, u32>,
        dealloc_fn: TypedFunc<(u32, u32), ()>,
        release_name: impl Into<String>,
    ) -> Self {
        Self {
            memory,
            alloc_fn,
            dealloc_fn,
            release_name: release_name.into(),
            ledger: AllocationLedger::new(),
            generation: Generation::INITIAL,
            observed_size: memory.data_size(store),
        }
    }

    /// Get the module's memory.
    pub fn memory(&self) -> &Memory {
        &self.memory
    }

    /// Get the allocation ledger.
    pub fn ledger(&self) -> &AllocationLedger {
        &self.ledger
    }

    /// Get the current arena generation.
    pub fn generation(&self) -> Generation {
        self.generation
    }

    /// Current arena size in bytes.
    pub fn size(&self, store: &Store<HostState>) -> usize {
        self.memory.data_size(store)
    }

    /// Observe the arena size after a module call.
    ///
    /// Bumps the generation if the size changed.
    pub fn sync(&mut self, store: &Store<HostState>) -> Generation {
        let size = self.memory.data_size(store);
        if size != self.observed_size {
            let previous = self.generation;
            self.generation = previous.next();
            debug!(
                from = self.observed_size,
                to = size,
                %previous,
                current = %self.generation,
                "arena resized"
            );
            self.observed_size = size;
        }
        self.generation
    }

    /// Allocate `size` bytes for a record of kind `R`.
    ///
    /// A zero-byte request is forwarded as a one-byte request so every live
    /// handle has a distinct offset. A trap, a `0` result, or a range outside
    /// the arena is an allocation failure.
    pub fn allocate<R: Record>(
        &mut self,
        store: &mut Store<HostState>,
        size: u32,
    ) -> Result<Handle<R>> {
        let size = size.max(1);
        let outcome = self.alloc_fn.call(&mut *store, size);
        self.sync(store);

        let offset = outcome.map_err(|e| TidepoolError::AllocationFailed {
            requested: size,
            cause: format!("allocator trapped: {e}"),
        })?;
        if offset == 0 {
            return Err(TidepoolError::AllocationFailed {
                requested: size,
                cause: "allocator returned the null sentinel".to_string(),
            });
        }
        let arena_size = self.size(store) as u64;
        if offset as u64 + size as u64 > arena_size {
            return Err(TidepoolError::AllocationFailed {
                requested: size,
                cause: format!(
                    "allocator returned 0x{offset:08x}, past the {arena_size}-byte arena"
                ),
            });
        }

        let handle = self
            .ledger
            .record(R::KIND, offset, size, self.generation, Owner::Host)?;
        debug!(%handle, "allocated");
        handle.downcast()
    }

    /// Take ownership of a record the module returned.
    pub fn adopt<R: Record>(
        &mut self,
        store: &Store<HostState>,
        offset: u32,
        size: u32,
    ) -> Result<Handle<R>> {
        self.sync(store);
        if offset == 0 {
            return Err(TidepoolError::MalformedRecord {
                kind: R::KIND,
                cause: "module returned a null handle".to_string(),
            });
        }
        let arena_size = self.size(store) as u64;
        if offset as u64 + size as u64 > arena_size {
            return Err(TidepoolError::OutOfBounds {
                offset: offset as u64,
                len: size as u64,
                arena_size,
            });
        }

        let handle = self
            .ledger
            .record(R::KIND, offset, size, self.generation, Owner::Module)?;
        debug!(%handle, "adopted");
        handle.downcast()
    }

    /// Hand an allocation back to the module's allocator.
    ///
    /// Handles from older generations may still be released.
    pub fn release(&mut self, store: &mut Store<HostState>, handle: AnyHandle) -> Result<()> {
        self.ledger.check_release(&handle)?;
        let outcome = self
            .dealloc_fn
            .call(&mut *store, (handle.offset(), handle.size()));
        self.sync(store);
        outcome.map_err(|e| TidepoolError::WasmTrap {
            entry_point: self.release_name.clone(),
            cause: e.to_string(),
        })?;
        self.ledger.release(&handle)?;
        debug!(%handle, "released");
        Ok(())
    }

    /// Release every handle in order, reporting the first failure.
    pub fn release_all(
        &mut self,
        store: &mut Store<HostState>,
        handles: impl IntoIterator<Item = AnyHandle>,
    ) -> Result<()> {
        let mut first_error = None;
        for handle in handles {
            if let Err(e) = self.release(store, handle) {
                first_error.get_or_insert(e);
            }
        }
        first_error.map_or(Ok(()), Err)
    }

    /// Grow the arena by `pages` ahead of use.
    pub fn reserve(&mut self, store: &mut Store<HostState>, pages: u32) -> Result<Generation> {
        if pages == 0 {
            return Ok(self.generation);
        }
        self.memory
            .grow(&mut *store, pages as u64)
            .map_err(|e| TidepoolError::AllocationFailed {
                requested: (pages as u64 * WASM_PAGE_SIZE).min(u32::MAX as u64) as u32,
                cause: format!("arena could not grow by {pages} pages: {e}"),
            })?;
        Ok(self.sync(store))
    }

    /// Check that `handle` is live before its offset goes back to the
    /// module.
    ///
    /// Handles from older generations pass; only released or unknown
    /// handles are rejected.
    pub fn check_live(&self, handle: &AnyHandle) -> Result<()> {
        self.ledger.check_live(handle).map(|_| ())
    }

    /// Check that `handle` is live and from the current generation.
    pub fn check_current(&self, handle: &AnyHandle) -> Result<()> {
        if handle.generation() != self.generation {
            return Err(TidepoolError::StaleHandle {
                kind: handle.kind(),
                offset: handle.offset(),
                handle_generation: handle.generation(),
                current_generation: self.generation,
            });
        }
        if !self.ledger.is_live(handle) {
            return Err(TidepoolError::UnknownHandle {
                offset: handle.offset(),
            });
        }
        Ok(())
    }

    /// Borrow the arena for decoding through `handle`.
    pub fn view<'a>(&self, store: &'a Store<HostState>, handle: &AnyHandle) -> Result<&'a [u8]> {
        self.check_current(handle)?;
        Ok(self.memory.data(store))
    }

    /// Copy the bytes of the allocation behind `handle`.
    pub fn read(&self, store: &Store<HostState>, handle: &AnyHandle) -> Result<Vec<u8>> {
        let memory = self.view(store, handle)?;
        Ok(tidepool_core::wire::read_bytes(memory, handle.offset(), handle.size())?.to_vec())
    }

    /// Write `bytes` into the allocation behind `handle`, starting at byte
    /// `at` of the allocation.
    pub fn write(
        &self,
        store: &mut Store<HostState>,
        handle: &AnyHandle,
        at: u32,
        bytes: &[u8],
    ) -> Result<()> {
        self.check_current(handle)?;
        let end = at as u64 + bytes.len() as u64;
        if end > handle.size() as u64 {
            return Err(TidepoolError::OutOfBounds {
                offset: handle.offset() as u64 + at as u64,
                len: bytes.len() as u64,
                arena_size: handle.offset() as u64 + handle.size() as u64,
            });
        }

        let start = handle.offset() as usize + at as usize;
        let arena = self.memory.data_mut(store);
        let arena_size = arena.len() as u64;
        let dest = arena
            .get_mut(start..start + bytes.len())
            .ok_or(TidepoolError::OutOfBounds {
                offset: start as u64,
                len: bytes.len() as u64,
                arena_size,
            })?;
        dest.copy_from_slice(bytes);
        Ok(())
    }
}
