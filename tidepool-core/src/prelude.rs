//! Prelude for convenient imports.
//!
//! ```ignore
//! use tidepool_core::prelude::*;
//! ```

// Handles
pub use crate::types::{
    AnyHandle, Generation, Handle, IdQueryRecord, Owner, PointerListRecord, RangeFilterRecord,
    RangeTotalsRecord, RawBuffer, Record, RecordKind, ResultTupleRecord, SliceRecord,
};

// Error handling
pub use crate::error::{Result, TidepoolError};

// Records
pub use crate::result::{
    AggregationKind, DecodedTuple, ElementKind, RangeTotals, Recommendation, Stride,
};
pub use crate::wire::{FilterPolicy, IdQuery, QueryKind, RangeField, RangeFilter, RangeFormat};

// Diagnostics
pub use crate::diagnostic::{Diagnostic, ModuleCondition};

// Configuration
pub use crate::config::{BindingConfig, ExportNames, ImportNames};
