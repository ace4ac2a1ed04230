//! Diagnostic messages written by the module for the host.
//!
//! The module reports anything it cannot return through a call result by
//! writing a small tagged union into the arena and invoking the host's
//! diagnostic import with `(ptr, len)`:
//!
//! ```text
//! tag 1                 [1][text_ptr][text_len]
//! tag 2, sub-kind 0     [2][0][text_ptr][text_len]      UTF-8 text
//! tag 2, sub-kind 1     [2][1][data_ptr][data_len]      binary, shown as base64
//! tag 2, sub-kind 2..5  [2][n]                          module condition
//! anything else         ignored
//! ```
//!
//! Unknown tags and sub-kinds decode to `None` so that new message kinds can
//! be added on the module side without breaking older hosts.

use crate::error::{Result, TidepoolError};
use crate::types::RecordKind;
use crate::wire::{WORD, read_bytes, read_words};
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use std::borrow::Cow;
use std::fmt;

/// Tag of a plain text message.
pub const TAG_TEXT: u32 = 1;
/// Tag of a nested response message.
pub const TAG_RESPONSE: u32 = 2;

/// A domain condition the module reports instead of a result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ModuleCondition {
    /// The module's store has not been initialized yet.
    Uninitialized,
    /// The module could not serialize its store.
    SerializationFailed,
    /// A query could not be evaluated.
    QueryFailed,
    /// The store could not be saved.
    SaveFailed,
}

impl ModuleCondition {
    fn from_sub_kind(sub_kind: u32) -> Option<Self> {
        match sub_kind {
            2 => Some(Self::Uninitialized),
            3 => Some(Self::SerializationFailed),
            4 => Some(Self::QueryFailed),
            5 => Some(Self::SaveFailed),
            _ => None,
        }
    }

    /// Stable name used in logs and errors.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Uninitialized => "uninitialized",
            Self::SerializationFailed => "serialization-failed",
            Self::QueryFailed => "query-failed",
            Self::SaveFailed => "save-failed",
        }
    }
}

impl fmt::Display for ModuleCondition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A decoded diagnostic message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Diagnostic {
    /// Tag 1: free-form text.
    Log(String),
    /// Tag 2, sub-kind 0: a text response (usually JSON).
    Text(String),
    /// Tag 2, sub-kind 1: a binary response (usually a snapshot).
    Binary(Vec<u8>),
    /// Tag 2, sub-kinds 2-5: a domain condition.
    Condition(ModuleCondition),
}

impl Diagnostic {
    /// The text the channel emits for this message.
    ///
    /// Binary payloads are emitted as standard base64.
    #[must_use]
    pub fn emitted_text(&self) -> Cow<'_, str> {
        match self {
            Self::Log(text) | Self::Text(text) => Cow::Borrowed(text),
            Self::Binary(bytes) => Cow::Owned(STANDARD.encode(bytes)),
            Self::Condition(condition) => Cow::Borrowed(condition.name()),
        }
    }

    /// The condition carried by this message, if any.
    #[must_use]
    pub fn condition(&self) -> Option<ModuleCondition> {
        match self {
            Self::Condition(condition) => Some(*condition),
            _ => None,
        }
    }
}

/// Decode the message at `(ptr, len)`.
///
/// Returns `Ok(None)` for tags and sub-kinds this host does not know. A
/// message too short for its tag, or pointing outside the arena, is a
/// protocol violation.
pub fn decode_diagnostic(memory: &[u8], ptr: u32, len: u32) -> Result<Option<Diagnostic>> {
    let available = len / WORD;
    if available == 0 {
        return Err(TidepoolError::malformed(
            RecordKind::RawBuffer,
            format!("diagnostic message at 0x{ptr:08x} is {len} bytes, shorter than a tag"),
        ));
    }
    let words = read_words(memory, ptr, available.min(4))?;
    let need = |count: usize| -> Result<()> {
        if words.len() < count {
            return Err(TidepoolError::malformed(
                RecordKind::RawBuffer,
                format!(
                    "diagnostic tag {} needs {count} words, message has {}",
                    words[0],
                    words.len()
                ),
            ));
        }
        Ok(())
    };

    match words[0] {
        TAG_TEXT => {
            need(3)?;
            Ok(Some(Diagnostic::Log(read_text(memory, words[1], words[2])?)))
        }
        TAG_RESPONSE => {
            need(2)?;
            match words[1] {
                0 => {
                    need(4)?;
                    Ok(Some(Diagnostic::Text(read_text(memory, words[2], words[3])?)))
                }
                1 => {
                    need(4)?;
                    let bytes = read_bytes(memory, words[2], words[3])?;
                    Ok(Some(Diagnostic::Binary(bytes.to_vec())))
                }
                sub_kind => Ok(ModuleCondition::from_sub_kind(sub_kind).map(Diagnostic::Condition)),
            }
        }
        _ => Ok(None),
    }
}

/// Read UTF-8 text at `(ptr, len)`.
pub fn read_text(memory: &[u8], ptr: u32, len: u32) -> Result<String> {
    let bytes = read_bytes(memory, ptr, len)?;
    String::from_utf8(bytes.to_vec()).map_err(|e| TidepoolError::InvalidUtf8 {
        offset: ptr,
        cause: e.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Lay out `words` at offset 0 and `payload` right after them.
    fn message(words: &[u32], payload: &[u8]) -> (Vec<u8>, u32) {
        let mut memory = Vec::new();
        for w in words {
            memory.extend_from_slice(&w.to_le_bytes());
        }
        let len = memory.len() as u32;
        memory.extend_from_slice(payload);
        (memory, len)
    }

    #[test]
    fn tag_one_emits_text() {
        let (memory, len) = message(&[1, 12, 5], b"hello");
        let diagnostic = decode_diagnostic(&memory, 0, len).unwrap().unwrap();
        assert_eq!(diagnostic, Diagnostic::Log("hello".to_string()));
        assert_eq!(diagnostic.emitted_text(), "hello");
    }

    #[test]
    fn nested_text() {
        let (memory, len) = message(&[2, 0, 16, 2], b"{}");
        let diagnostic = decode_diagnostic(&memory, 0, len).unwrap().unwrap();
        assert_eq!(diagnostic, Diagnostic::Text("{}".to_string()));
    }

    #[test]
    fn nested_binary_emits_base64() {
        let (memory, len) = message(&[2, 1, 16, 4], &[0, 1, 2, 3]);
        let diagnostic = decode_diagnostic(&memory, 0, len).unwrap().unwrap();
        assert_eq!(diagnostic, Diagnostic::Binary(vec![0, 1, 2, 3]));
        assert_eq!(diagnostic.emitted_text(), "AAECAw==");
    }

    #[test]
    fn uninitialized_condition() {
        let (memory, len) = message(&[2, 2, 0, 0], &[]);
        let diagnostic = decode_diagnostic(&memory, 0, len).unwrap().unwrap();
        assert_eq!(diagnostic.condition(), Some(ModuleCondition::Uninitialized));
    }

    #[test]
    fn unknown_tag_is_ignored() {
        let (memory, len) = message(&[99, 0, 0], &[]);
        assert_eq!(decode_diagnostic(&memory, 0, len).unwrap(), None);

        let (memory, len) = message(&[0, 12, 3], b"abc");
        assert_eq!(decode_diagnostic(&memory, 0, len).unwrap(), None);
    }

    #[test]
    fn unknown_sub_kind_is_ignored() {
        let (memory, len) = message(&[2, 42, 0, 0], &[]);
        assert_eq!(decode_diagnostic(&memory, 0, len).unwrap(), None);
    }

    #[test]
    fn truncated_message_is_malformed() {
        let (memory, _) = message(&[1, 12], &[]);
        let err = decode_diagnostic(&memory, 0, 8).unwrap_err();
        assert_eq!(err.code(), "E101");

        let err = decode_diagnostic(&memory, 0, 2).unwrap_err();
        assert_eq!(err.code(), "E101");
    }

    #[test]
    fn text_out_of_bounds() {
        let (memory, len) = message(&[1, 500, 5], &[]);
        let err = decode_diagnostic(&memory, 0, len).unwrap_err();
        assert_eq!(err.code(), "E002");
    }

    #[test]
    fn invalid_utf8() {
        let (memory, len) = message(&[1, 12, 2], &[0xff, 0xfe]);
        let err = decode_diagnostic(&memory, 0, len).unwrap_err();
        assert_eq!(err.code(), "E102");
    }
}
