//! Allocation ledger.
//!
//! Tracks every arena allocation the host is responsible for releasing,
//! whether the host requested it or adopted it from a module return value.
//! The ledger is what turns a double release or a size mismatch into an
//! error instead of silent allocator corruption.

use crate::error::{Result, TidepoolError};
use crate::types::{AnyHandle, Generation, Owner, RecordKind};
use std::collections::HashMap;
use tracing::trace;

/// An entry tracking a single allocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AllocationEntry {
    /// Ledger serial of the allocation.
    pub serial: u64,
    /// Record kind stored in the allocation.
    pub kind: RecordKind,
    /// Side that produced the allocation.
    pub owner: Owner,
    /// Offset in the arena where the allocation starts.
    pub offset: u32,
    /// Size of the allocation in bytes.
    pub size: u32,
    /// Arena generation when the allocation was recorded.
    pub generation: Generation,
    /// Whether the allocation has not been released yet.
    pub live: bool,
}

impl AllocationEntry {
    /// Get the end offset of this allocation.
    pub fn end_offset(&self) -> u64 {
        self.offset as u64 + self.size as u64
    }

    fn handle(&self) -> AnyHandle {
        AnyHandle::new(
            self.kind,
            self.offset,
            self.size,
            self.generation,
            self.serial,
            self.owner,
        )
    }
}

/// Tracks all allocations handed out in one arena.
///
/// A released entry stays in the map until the allocator hands its offset
/// out again, at which point the new allocation replaces it. Until then the
/// dead entry is what turns a second release, or any later use, into an
/// error rather than an unknown handle. The map therefore holds at most one
/// entry per distinct offset the allocator has ever returned.
#[derive(Debug, Default)]
pub struct AllocationLedger {
    /// Map from offset to the most recent allocation at that offset.
    allocations: HashMap<u32, AllocationEntry>,
    /// Next serial to hand out.
    next_serial: u64,
    /// Total bytes recorded.
    total_allocated: u64,
    /// Total bytes released.
    total_released: u64,
    /// Number of successful releases.
    released: usize,
}

impl AllocationLedger {
    /// Create an empty ledger.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a new allocation and mint its handle.
    ///
    /// An offset that is still live means the allocator handed out the same
    /// range twice.
    pub fn record(
        &mut self,
        kind: RecordKind,
        offset: u32,
        size: u32,
        generation: Generation,
        owner: Owner,
    ) -> Result<AnyHandle> {
        if let Some(existing) = self.allocations.get(&offset).filter(|e| e.live) {
            return Err(TidepoolError::AllocationFailed {
                requested: size,
                cause: format!(
                    "offset 0x{offset:08x} is still live as a {} allocation",
                    existing.kind
                ),
            });
        }

        let entry = AllocationEntry {
            serial: self.next_serial,
            kind,
            owner,
            offset,
            size,
            generation,
            live: true,
        };
        self.next_serial += 1;
        self.total_allocated += size as u64;
        self.allocations.insert(offset, entry);
        trace!(%kind, offset, size, serial = entry.serial, ?owner, "allocation recorded");
        Ok(entry.handle())
    }

    fn entry(&self, handle: &AnyHandle) -> Result<&AllocationEntry> {
        self.allocations
            .get(&handle.offset())
            .ok_or(TidepoolError::UnknownHandle {
                offset: handle.offset(),
            })
    }

    /// Whether `entry` is the still-live allocation `handle` was minted for.
    ///
    /// A newer allocation at the same offset means this handle's own
    /// allocation was released earlier.
    fn minted(entry: &AllocationEntry, handle: &AnyHandle) -> bool {
        entry.live && entry.serial == handle.serial()
    }

    /// Check that `handle` still refers to a live allocation.
    ///
    /// Generations are not compared: a live handle from an older generation
    /// is still a valid offset to pass to the module.
    pub fn check_live(&self, handle: &AnyHandle) -> Result<&AllocationEntry> {
        let entry = self.entry(handle)?;
        if !Self::minted(entry, handle) {
            return Err(TidepoolError::ReleasedHandle {
                kind: handle.kind(),
                offset: handle.offset(),
            });
        }
        Ok(entry)
    }

    /// Check that `handle` may be released, without releasing it.
    pub fn check_release(&self, handle: &AnyHandle) -> Result<&AllocationEntry> {
        let entry = self.entry(handle)?;
        if !Self::minted(entry, handle) {
            return Err(TidepoolError::DoubleRelease {
                kind: handle.kind(),
                offset: handle.offset(),
            });
        }
        if entry.size != handle.size() {
            return Err(TidepoolError::ReleaseSizeMismatch {
                offset: handle.offset(),
                allocated: entry.size,
                released: handle.size(),
            });
        }
        Ok(entry)
    }

    /// Mark the allocation behind `handle` as released.
    pub fn release(&mut self, handle: &AnyHandle) -> Result<AllocationEntry> {
        self.check_release(handle)?;
        let entry = self
            .allocations
            .get_mut(&handle.offset())
            .ok_or(TidepoolError::UnknownHandle {
                offset: handle.offset(),
            })?;
        entry.live = false;
        self.total_released += entry.size as u64;
        self.released += 1;
        trace!(kind = %entry.kind, offset = entry.offset, size = entry.size, "allocation released");
        Ok(*entry)
    }

    /// Check if the allocation behind `handle` is still live.
    pub fn is_live(&self, handle: &AnyHandle) -> bool {
        self.entry(handle).is_ok_and(|e| Self::minted(e, handle))
    }

    /// Get all live allocations sorted by offset.
    pub fn live_allocations(&self) -> Vec<AllocationEntry> {
        let mut live: Vec<_> = self.allocations.values().filter(|e| e.live).copied().collect();
        live.sort_by_key(|e| e.offset);
        live
    }

    /// Number of live allocations.
    pub fn live_count(&self) -> usize {
        self.allocations.values().filter(|e| e.live).count()
    }

    /// Number of entries held, live or released.
    pub fn tracked_count(&self) -> usize {
        self.allocations.len()
    }

    /// Number of successful releases.
    pub fn released_count(&self) -> usize {
        self.released
    }

    /// Total bytes recorded over the ledger's lifetime.
    pub fn total_allocated(&self) -> u64 {
        self.total_allocated
    }

    /// Total bytes released over the ledger's lifetime.
    pub fn total_released(&self) -> u64 {
        self.total_released
    }

    /// Bytes still owed to the allocator.
    pub fn total_live_bytes(&self) -> u64 {
        self.total_allocated - self.total_released
    }
}
