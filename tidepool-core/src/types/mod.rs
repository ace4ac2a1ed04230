//! Strongly-typed handles and the arena generation counter.

mod generation;
mod handle;

pub use generation::Generation;
pub use handle::{
    AnyHandle, Handle, IdQueryRecord, Owner, PointerListRecord, RangeFilterRecord,
    RangeTotalsRecord, RawBuffer, Record, RecordKind, ResultTupleRecord, SliceRecord,
};
