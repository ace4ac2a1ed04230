//! Typed handles into the module's arena.
//!
//! At the wire level a handle is nothing more than a `u32` byte offset. On
//! the host side every handle also carries the record kind it denotes, the
//! byte extent that must be handed back to the allocator, the arena
//! generation it was produced in and a ledger serial. Decoders accept only
//! the handle type they expect, and erased handles are checked against the
//! expected kind before use.

use super::generation::Generation;
use crate::error::{Result, TidepoolError};
use std::fmt;
use std::marker::PhantomData;

/// The kinds of record a handle can denote.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RecordKind {
    /// `(base, length)` header followed by payload bytes.
    Slice,
    /// Tagged id query: `(kind, policy, list_base, list_length)` + ids.
    IdQuery,
    /// `(list_base, list_length)` + handles.
    PointerList,
    /// Range filter: `(field, format, baseline, min, max)`.
    RangeFilter,
    /// Headerless bytes.
    RawBuffer,
    /// Aggregation result tuple produced by `convert`.
    ResultTuple,
    /// `(up, down)` pair produced by `aggregateRange`.
    RangeTotals,
}

impl RecordKind {
    /// Human-readable name used in errors and logs.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Slice => "slice",
            Self::IdQuery => "id-query",
            Self::PointerList => "pointer-list",
            Self::RangeFilter => "range-filter",
            Self::RawBuffer => "raw-buffer",
            Self::ResultTuple => "result-tuple",
            Self::RangeTotals => "range-totals",
        }
    }
}

impl fmt::Display for RecordKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Which side of the boundary owns an allocation until it is released.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Owner {
    /// Allocated by the host through the allocator proxy.
    Host,
    /// Returned by a module entry point and adopted by the host.
    Module,
}

/// Marker trait tying a Rust type to a [`RecordKind`].
pub trait Record {
    /// The record kind this marker denotes.
    const KIND: RecordKind;
}

macro_rules! record_markers {
    ($($(#[$doc:meta])* $name:ident => $kind:ident),* $(,)?) => {
        $(
            $(#[$doc])*
            #[derive(Debug, Clone, Copy, PartialEq, Eq)]
            pub enum $name {}

            impl Record for $name {
                const KIND: RecordKind = RecordKind::$kind;
            }
        )*
    };
}

record_markers! {
    /// Marker for slice records.
    SliceRecord => Slice,
    /// Marker for tagged id query records.
    IdQueryRecord => IdQuery,
    /// Marker for pointer list records.
    PointerListRecord => PointerList,
    /// Marker for range filter records.
    RangeFilterRecord => RangeFilter,
    /// Marker for headerless buffers.
    RawBuffer => RawBuffer,
    /// Marker for result tuples.
    ResultTupleRecord => ResultTuple,
    /// Marker for range totals.
    RangeTotalsRecord => RangeTotals,
}

/// A handle whose record kind has been erased.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct AnyHandle {
    kind: RecordKind,
    offset: u32,
    size: u32,
    generation: Generation,
    serial: u64,
    owner: Owner,
}

impl AnyHandle {
    /// Create an erased handle.
    #[must_use]
    pub const fn new(
        kind: RecordKind,
        offset: u32,
        size: u32,
        generation: Generation,
        serial: u64,
        owner: Owner,
    ) -> Self {
        Self {
            kind,
            offset,
            size,
            generation,
            serial,
            owner,
        }
    }

    /// The record kind.
    #[must_use]
    pub const fn kind(&self) -> RecordKind {
        self.kind
    }

    /// Byte offset in the arena.
    #[must_use]
    pub const fn offset(&self) -> u32 {
        self.offset
    }

    /// Byte extent of the allocation.
    #[must_use]
    pub const fn size(&self) -> u32 {
        self.size
    }

    /// Generation at creation time.
    #[must_use]
    pub const fn generation(&self) -> Generation {
        self.generation
    }

    /// Ledger serial.
    #[must_use]
    pub const fn serial(&self) -> u64 {
        self.serial
    }

    /// Owning side.
    #[must_use]
    pub const fn owner(&self) -> Owner {
        self.owner
    }

    /// Recover a typed handle, checking the kind.
    pub fn downcast<R: Record>(self) -> Result<Handle<R>> {
        if self.kind != R::KIND {
            return Err(TidepoolError::KindMismatch {
                offset: self.offset,
                expected: R::KIND,
                actual: self.kind,
            });
        }
        Ok(Handle {
            raw: self,
            _marker: PhantomData,
        })
    }
}

impl fmt::Display for AnyHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}@0x{:08x}[{}]/{}",
            self.kind, self.offset, self.size, self.generation
        )
    }
}

/// A handle to a record of kind `R` inside the arena.
pub struct Handle<R> {
    raw: AnyHandle,
    _marker: PhantomData<R>,
}

impl<R: Record> Handle<R> {
    /// Create a typed handle.
    #[must_use]
    pub const fn new(
        offset: u32,
        size: u32,
        generation: Generation,
        serial: u64,
        owner: Owner,
    ) -> Self {
        Self {
            raw: AnyHandle::new(R::KIND, offset, size, generation, serial, owner),
            _marker: PhantomData,
        }
    }

    /// Byte offset in the arena (the integer passed across the boundary).
    #[must_use]
    pub const fn offset(&self) -> u32 {
        self.raw.offset
    }

    /// Byte extent of the allocation.
    #[must_use]
    pub const fn size(&self) -> u32 {
        self.raw.size
    }

    /// Generation at creation time.
    #[must_use]
    pub const fn generation(&self) -> Generation {
        self.raw.generation
    }

    /// Ledger serial.
    #[must_use]
    pub const fn serial(&self) -> u64 {
        self.raw.serial
    }

    /// Owning side.
    #[must_use]
    pub const fn owner(&self) -> Owner {
        self.raw.owner
    }

    /// Erase the record kind.
    #[must_use]
    pub const fn erase(&self) -> AnyHandle {
        self.raw
    }
}

impl<R> Clone for Handle<R> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<R> Copy for Handle<R> {}

impl<R> PartialEq for Handle<R> {
    fn eq(&self, other: &Self) -> bool {
        self.raw == other.raw
    }
}

impl<R> Eq for Handle<R> {}

impl<R> fmt::Debug for Handle<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Handle")
            .field("kind", &self.raw.kind)
            .field("offset", &self.raw.offset)
            .field("size", &self.raw.size)
            .field("generation", &self.raw.generation)
            .field("owner", &self.raw.owner)
            .finish()
    }
}

impl<R> fmt::Display for Handle<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.raw, f)
    }
}
