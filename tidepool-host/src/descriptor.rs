//! Size descriptor resolution.
//!
//! The module publishes the byte size of its result records as exported
//! globals. Each global holds the *address* of a word in the arena, and that
//! word holds the byte length. Strides are only ever obtained through
//! [`SizeDescriptors::byte_length`].

use crate::host::HostState;
use tidepool_core::config::ExportNames;
use tidepool_core::error::{Result, TidepoolError};
use tidepool_core::result::{ElementKind, Stride};
use tidepool_core::wire::read_word;
use tracing::trace;
use wasmtime::{Global, Instance, Memory, Store, Val};

/// The size descriptors a module exports.
pub struct SizeDescriptors {
    histogram: Option<Global>,
    recommendation: Option<Global>,
    histogram_name: String,
    recommendation_name: String,
}

impl SizeDescriptors {
    /// Look up the descriptor globals. Absent globals are reported when
    /// first resolved, not here.
    pub fn new(store: &mut Store<HostState>, instance: &Instance, exports: &ExportNames) -> Self {
        Self {
            histogram: instance.get_global(&mut *store, &exports.histogram_descriptor),
            recommendation: instance.get_global(&mut *store, &exports.recommendation_descriptor),
            histogram_name: exports.histogram_descriptor.clone(),
            recommendation_name: exports.recommendation_descriptor.clone(),
        }
    }

    /// Export name of the descriptor for `kind`.
    pub fn name(&self, kind: ElementKind) -> &str {
        match kind {
            ElementKind::Histogram => &self.histogram_name,
            ElementKind::Recommendation => &self.recommendation_name,
        }
    }

    fn global(&self, kind: ElementKind) -> Option<Global> {
        match kind {
            ElementKind::Histogram => self.histogram,
            ElementKind::Recommendation => self.recommendation,
        }
    }

    /// Resolve the byte length of `kind`.
    pub fn byte_length(
        &self,
        store: &mut Store<HostState>,
        memory: &Memory,
        kind: ElementKind,
    ) -> Result<Stride> {
        let name = self.name(kind);
        let global = self
            .global(kind)
            .ok_or_else(|| TidepoolError::DescriptorMissing {
                name: name.to_string(),
            })?;

        let address = match global.get(&mut *store) {
            Val::I32(address) => address as u32,
            other => {
                return Err(TidepoolError::MissingExport {
                    name: name.to_string(),
                    cause: format!("expected an i32 global holding an address, found {other:?}"),
                });
            }
        };
        let byte_length = read_word(memory.data(&*store), address)?;
        trace!(descriptor = name, address, byte_length, "size descriptor resolved");
        Stride::new(kind, byte_length, name)
    }
}
