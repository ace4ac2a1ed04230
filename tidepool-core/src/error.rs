//! Error types for tidepool.
//!
//! Every error carries a stable code and enough context (offsets, kinds,
//! entry point names) to locate the offending call. Errors fall into three
//! classes that drive how a session reacts:
//!
//! - **fatal**: allocator exhaustion and protocol violations. The session
//!   that produced them must be torn down.
//! - **recoverable**: domain conditions reported by the module (for example
//!   an uninitialized store). The caller may fix the cause and retry.
//! - everything else: loading and configuration problems raised before a
//!   session exists.

use crate::types::{Generation, RecordKind};
use std::path::PathBuf;
use thiserror::Error;

/// The main error type for tidepool operations.
#[derive(Error, Debug)]
pub enum TidepoolError {
    // =========================================================================
    // Arena Errors (E001-E099)
    // =========================================================================
    /// The module's allocator could not satisfy a request.
    #[error("E001: Arena allocation failed: requested {requested} bytes: {cause}")]
    AllocationFailed {
        /// Number of bytes requested.
        requested: u32,
        /// What the allocator did instead.
        cause: String,
    },

    /// An access fell outside the arena.
    #[error("E002: Arena access out of bounds: offset {offset}, length {len}, arena size {arena_size}")]
    OutOfBounds {
        /// Start of the access.
        offset: u64,
        /// Length of the access.
        len: u64,
        /// Current arena size in bytes.
        arena_size: u64,
    },

    /// A handle from an earlier arena generation was used.
    #[error(
        "E003: Stale {kind} handle at offset {offset}: created in {handle_generation}, arena is at {current_generation}"
    )]
    StaleHandle {
        /// Kind of the stale handle.
        kind: RecordKind,
        /// Offset of the stale handle.
        offset: u32,
        /// Generation captured by the handle.
        handle_generation: Generation,
        /// Current arena generation.
        current_generation: Generation,
    },

    /// A handle was released twice.
    #[error("E004: Double release of {kind} handle at offset {offset}")]
    DoubleRelease {
        /// Kind of the handle.
        kind: RecordKind,
        /// Offset of the handle.
        offset: u32,
    },

    /// Release size differs from the allocation size.
    #[error("E005: Release size mismatch at offset {offset}: allocated {allocated} bytes, releasing {released}")]
    ReleaseSizeMismatch {
        /// Offset of the allocation.
        offset: u32,
        /// Size recorded at allocation time.
        allocated: u32,
        /// Size passed to release.
        released: u32,
    },

    /// A handle that the ledger never recorded.
    #[error("E006: Unknown handle at offset {offset}")]
    UnknownHandle {
        /// Offset of the handle.
        offset: u32,
    },

    /// A handle denotes a different record kind than expected.
    #[error("E007: Handle at offset {offset} is a {actual} record, expected {expected}")]
    KindMismatch {
        /// Offset of the handle.
        offset: u32,
        /// Kind the consumer expected.
        expected: RecordKind,
        /// Kind the handle carries.
        actual: RecordKind,
    },

    /// A payload does not fit in the 32-bit address space of the arena.
    #[error("E008: Payload of {len} bytes exceeds the 32-bit arena address space")]
    PayloadTooLarge {
        /// Payload length.
        len: usize,
    },

    /// A released handle was passed back to the module.
    #[error("E009: Use of released {kind} handle at offset {offset}")]
    ReleasedHandle {
        /// Kind of the handle.
        kind: RecordKind,
        /// Offset of the handle.
        offset: u32,
    },

    // =========================================================================
    // Record Errors (E100-E199)
    // =========================================================================
    /// A record's bytes violate its layout.
    #[error("E101: Malformed {kind} record: {cause}")]
    MalformedRecord {
        /// Kind of the malformed record.
        kind: RecordKind,
        /// Description of the violation.
        cause: String,
    },

    /// Text read from the arena is not valid UTF-8.
    #[error("E102: Invalid UTF-8 text at offset {offset}: {cause}")]
    InvalidUtf8 {
        /// Offset of the text.
        offset: u32,
        /// Decoder error.
        cause: String,
    },

    /// A size descriptor export is absent.
    #[error("E103: Size descriptor '{name}' is not exported by the module")]
    DescriptorMissing {
        /// Export name of the descriptor.
        name: String,
    },

    /// A size descriptor holds a byte length unusable as an element stride.
    #[error("E104: Size descriptor '{name}' holds unusable byte length {byte_length}: {cause}")]
    InvalidStride {
        /// Export name of the descriptor.
        name: String,
        /// The byte length read from the arena.
        byte_length: u32,
        /// Why the value was rejected.
        cause: String,
    },

    /// Base64 text could not be decoded.
    #[error("E105: Invalid base64 snapshot: {cause}")]
    InvalidBase64 {
        /// Decoder error.
        cause: String,
    },

    // =========================================================================
    // Domain Conditions (E300-E399)
    // =========================================================================
    /// The module's store has not been initialized.
    #[error("E301: Module store is not initialized (reported during '{entry_point}')")]
    StoreUninitialized {
        /// Entry point that reported the condition.
        entry_point: String,
    },

    /// The module reported a domain condition other than initialization.
    #[error("E302: Module reported '{condition}' during '{entry_point}'")]
    ModuleReported {
        /// Entry point that reported the condition.
        entry_point: String,
        /// The reported condition.
        condition: String,
    },

    /// An entry point finished without producing the expected response.
    #[error("E303: Entry point '{entry_point}' produced no {expected}")]
    MissingResponse {
        /// Entry point name.
        entry_point: String,
        /// What was expected.
        expected: String,
    },

    // =========================================================================
    // Session Errors (E400-E499)
    // =========================================================================
    /// The session was terminated by an earlier fatal error.
    #[error("E401: Session terminated by an earlier fatal error: {cause}")]
    SessionTerminated {
        /// The fatal error that terminated the session.
        cause: String,
    },

    // =========================================================================
    // WASM Errors (E700-E799)
    // =========================================================================
    /// WASM module loading failed.
    #[error("E701: Failed to load WASM module '{module}': {cause}")]
    WasmLoad {
        /// The WASM module that failed to load.
        module: String,
        /// Reason for the load failure.
        cause: String,
    },

    /// A module call trapped.
    #[error("E702: WASM entry point '{entry_point}' trapped: {cause}")]
    WasmTrap {
        /// The entry point that trapped.
        entry_point: String,
        /// Trap description.
        cause: String,
    },

    /// A required or requested export is absent or has the wrong signature.
    #[error("E703: Module export '{name}' is unavailable: {cause}")]
    MissingExport {
        /// Export name.
        name: String,
        /// Reason.
        cause: String,
    },

    /// Registering a host function failed.
    #[error("E704: WASM host function '{function}' failed: {cause}")]
    WasmHostFunction {
        /// The host function name that failed.
        function: String,
        /// Reason for the failure.
        cause: String,
    },

    // =========================================================================
    // Configuration Errors (E800-E899)
    // =========================================================================
    /// YAML parsing failed.
    #[error("E801: Failed to parse YAML at {path}: {cause}")]
    YamlParse {
        /// The path to the YAML file.
        path: PathBuf,
        /// Reason for the parse failure.
        cause: String,
    },

    /// Invalid configuration value.
    #[error("E802: Invalid configuration '{field}': {cause}")]
    ConfigValue {
        /// The configuration field with invalid value.
        field: String,
        /// Description of why the value is invalid.
        cause: String,
    },

    /// Serialization/deserialization error.
    #[error("E804: Serialization error: {0}")]
    Serialization(
        /// The serialization error message.
        String,
    ),

    // =========================================================================
    // I/O Errors (E900-E999)
    // =========================================================================
    /// File I/O error.
    #[error("E901: I/O error at {path}: {cause}")]
    Io {
        /// The path where the I/O error occurred.
        path: PathBuf,
        /// Description of the I/O error.
        cause: String,
    },
}

impl TidepoolError {
    /// Get the error code (e.g., "E001").
    #[must_use]
    pub fn code(&self) -> &'static str {
        match self {
            Self::AllocationFailed { .. } => "E001",
            Self::OutOfBounds { .. } => "E002",
            Self::StaleHandle { .. } => "E003",
            Self::DoubleRelease { .. } => "E004",
            Self::ReleaseSizeMismatch { .. } => "E005",
            Self::UnknownHandle { .. } => "E006",
            Self::KindMismatch { .. } => "E007",
            Self::PayloadTooLarge { .. } => "E008",
            Self::ReleasedHandle { .. } => "E009",
            Self::MalformedRecord { .. } => "E101",
            Self::InvalidUtf8 { .. } => "E102",
            Self::DescriptorMissing { .. } => "E103",
            Self::InvalidStride { .. } => "E104",
            Self::InvalidBase64 { .. } => "E105",
            Self::StoreUninitialized { .. } => "E301",
            Self::ModuleReported { .. } => "E302",
            Self::MissingResponse { .. } => "E303",
            Self::SessionTerminated { .. } => "E401",
            Self::WasmLoad { .. } => "E701",
            Self::WasmTrap { .. } => "E702",
            Self::MissingExport { .. } => "E703",
            Self::WasmHostFunction { .. } => "E704",
            Self::YamlParse { .. } => "E801",
            Self::ConfigValue { .. } => "E802",
            Self::Serialization(_) => "E804",
            Self::Io { .. } => "E901",
        }
    }

    /// Check if this error must terminate the host-module session.
    ///
    /// Allocator exhaustion and protocol violations leave the arena in an
    /// unknown state.
    #[must_use]
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::AllocationFailed { .. }
                | Self::OutOfBounds { .. }
                | Self::StaleHandle { .. }
                | Self::DoubleRelease { .. }
                | Self::ReleaseSizeMismatch { .. }
                | Self::UnknownHandle { .. }
                | Self::ReleasedHandle { .. }
                | Self::KindMismatch { .. }
                | Self::MalformedRecord { .. }
                | Self::WasmTrap { .. }
                | Self::SessionTerminated { .. }
        )
    }

    /// Check if this error is a domain condition the caller can recover from.
    #[must_use]
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::StoreUninitialized { .. } | Self::ModuleReported { .. }
        )
    }

    /// Check if this error is a configuration/loading error.
    #[must_use]
    pub fn is_config_error(&self) -> bool {
        matches!(
            self,
            Self::WasmLoad { .. }
                | Self::MissingExport { .. }
                | Self::DescriptorMissing { .. }
                | Self::YamlParse { .. }
                | Self::ConfigValue { .. }
        )
    }

    pub(crate) fn malformed(kind: RecordKind, cause: impl Into<String>) -> Self {
        Self::MalformedRecord {
            kind,
            cause: cause.into(),
        }
    }
}

/// Result type alias using `TidepoolError`.
pub type Result<T> = std::result::Result<T, TidepoolError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_codes_are_correct() {
        let err = TidepoolError::AllocationFailed {
            requested: 64,
            cause: "sentinel".to_string(),
        };
        assert_eq!(err.code(), "E001");

        let err = TidepoolError::StoreUninitialized {
            entry_point: "persist".to_string(),
        };
        assert_eq!(err.code(), "E301");
    }

    #[test]
    fn error_display() {
        let err = TidepoolError::StaleHandle {
            kind: RecordKind::Slice,
            offset: 1024,
            handle_generation: Generation::new(1),
            current_generation: Generation::new(3),
        };
        let msg = err.to_string();
        assert!(msg.contains("E003"));
        assert!(msg.contains("slice"));
        assert!(msg.contains("gen1"));
        assert!(msg.contains("gen3"));
    }

    #[test]
    fn fatal_and_recoverable_are_disjoint() {
        let fatal = TidepoolError::DoubleRelease {
            kind: RecordKind::IdQuery,
            offset: 8,
        };
        assert!(fatal.is_fatal());
        assert!(!fatal.is_recoverable());

        let domain = TidepoolError::StoreUninitialized {
            entry_point: "query".to_string(),
        };
        assert!(domain.is_recoverable());
        assert!(!domain.is_fatal());
    }

    #[test]
    fn config_errors() {
        assert!(
            TidepoolError::MissingExport {
                name: "convert".to_string(),
                cause: "not exported".to_string()
            }
            .is_config_error()
        );

        assert!(
            !TidepoolError::WasmTrap {
                entry_point: "convert".to_string(),
                cause: "unreachable".to_string()
            }
            .is_config_error()
        );
    }
}
