//! Slice records: a `(base, length)` header co-allocated with its payload.

use super::{WORD, arena_add, arena_len, put_word, read_bytes, read_word};
use crate::error::{Result, TidepoolError};
use crate::types::RecordKind;

/// Size of the `(base, length)` header.
pub const SLICE_HEADER_SIZE: u32 = 2 * WORD;

/// The two-word `(base, length)` descriptor used by slices, id lists and
/// pointer lists.
///
/// `length` counts elements of the declared item type, which is a byte only
/// for plain slices.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SliceDescriptor {
    /// Arena offset of the first element.
    pub base: u32,
    /// Number of elements.
    pub length: u32,
}

impl SliceDescriptor {
    /// Read a descriptor stored at `at`.
    pub fn read(memory: &[u8], at: u32) -> Result<Self> {
        Ok(Self {
            base: read_word(memory, at)?,
            length: read_word(memory, arena_add(at, WORD)?)?,
        })
    }

    /// Append the descriptor's two words to `buf`.
    pub fn write(&self, buf: &mut Vec<u8>) {
        put_word(buf, self.base);
        put_word(buf, self.length);
    }

    /// Byte extent of the elements.
    pub fn byte_len(&self, element_size: u32) -> Result<u32> {
        self.length
            .checked_mul(element_size)
            .ok_or(TidepoolError::PayloadTooLarge {
                len: self.length as usize * element_size as usize,
            })
    }

    /// Borrow the element bytes.
    pub fn elements<'a>(&self, memory: &'a [u8], element_size: u32) -> Result<&'a [u8]> {
        read_bytes(memory, self.base, self.byte_len(element_size)?)
    }
}

/// Layout of a byte slice record.
pub struct SliceLayout;

impl SliceLayout {
    /// Bytes to request from the allocator for a payload of `len` bytes.
    pub fn allocation_size(len: usize) -> Result<u32> {
        arena_add(SLICE_HEADER_SIZE, arena_len(len)?)
    }

    /// Produce the record bytes for an allocation that landed at `base`.
    pub fn encode(base: u32, payload: &[u8]) -> Result<Vec<u8>> {
        let descriptor = SliceDescriptor {
            base: arena_add(base, SLICE_HEADER_SIZE)?,
            length: arena_len(payload.len())?,
        };
        let mut buf = Vec::with_capacity(SLICE_HEADER_SIZE as usize + payload.len());
        descriptor.write(&mut buf);
        buf.extend_from_slice(payload);
        Ok(buf)
    }

    /// Read the descriptor and borrow the payload of the slice at `handle`.
    pub fn decode(memory: &[u8], handle: u32) -> Result<(SliceDescriptor, &[u8])> {
        let descriptor = SliceDescriptor::read(memory, handle)?;
        let payload = descriptor.elements(memory, 1).map_err(|e| {
            TidepoolError::malformed(
                RecordKind::Slice,
                format!("payload at 0x{:08x} unreadable: {e}", descriptor.base),
            )
        })?;
        Ok((descriptor, payload))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn place(base: u32, record: &[u8]) -> Vec<u8> {
        let mut memory = vec![0u8; base as usize];
        memory.extend_from_slice(record);
        memory
    }

    #[test]
    fn header_precedes_payload() {
        let record = SliceLayout::encode(0x100, b"hello").unwrap();
        assert_eq!(record.len(), 13);
        assert_eq!(&record[0..4], &0x108u32.to_le_bytes());
        assert_eq!(&record[4..8], &5u32.to_le_bytes());
        assert_eq!(&record[8..], b"hello");
        assert_eq!(SliceLayout::allocation_size(5).unwrap(), 13);
    }

    #[test]
    fn empty_payload() {
        let memory = place(32, &SliceLayout::encode(32, b"").unwrap());
        let (descriptor, payload) = SliceLayout::decode(&memory, 32).unwrap();
        assert_eq!(descriptor.base, 40);
        assert_eq!(descriptor.length, 0);
        assert!(payload.is_empty());
    }

    #[test]
    fn decode_rejects_dangling_payload() {
        let mut memory = Vec::new();
        SliceDescriptor {
            base: 1000,
            length: 4,
        }
        .write(&mut memory);
        let err = SliceLayout::decode(&memory, 0).unwrap_err();
        assert_eq!(err.code(), "E101");
    }

    proptest! {
        #[test]
        fn slice_round_trip(payload in proptest::collection::vec(any::<u8>(), 0..512), base in 0u32..4096) {
            let memory = place(base, &SliceLayout::encode(base, &payload).unwrap());
            let (descriptor, decoded) = SliceLayout::decode(&memory, base).unwrap();
            prop_assert_eq!(decoded, payload.as_slice());
            prop_assert_eq!(descriptor.length as usize, payload.len());
            prop_assert_eq!(descriptor.base, base + SLICE_HEADER_SIZE);
        }
    }
}
