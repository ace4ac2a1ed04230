//! Pointer list records: a descriptor followed by handles.

use super::slice::SliceDescriptor;
use super::{WORD, arena_add, arena_len, put_word};
use crate::error::{Result, TidepoolError};

/// Size of the `(base, length)` header.
pub const POINTER_LIST_HEADER_SIZE: u32 = 2 * WORD;

/// Layout of a pointer list record.
pub struct PointerListLayout;

impl PointerListLayout {
    /// Bytes to request for header plus `count` handles in one allocation.
    pub fn allocation_size(count: usize) -> Result<u32> {
        let list = arena_len(count)?
            .checked_mul(WORD)
            .ok_or(TidepoolError::PayloadTooLarge {
                len: count * WORD as usize,
            })?;
        arena_add(POINTER_LIST_HEADER_SIZE, list)
    }

    /// Produce the record bytes for an allocation that landed at `base`.
    pub fn encode(base: u32, handles: &[u32]) -> Result<Vec<u8>> {
        let mut buf = Vec::with_capacity(Self::allocation_size(handles.len())? as usize);
        SliceDescriptor {
            base: arena_add(base, POINTER_LIST_HEADER_SIZE)?,
            length: arena_len(handles.len())?,
        }
        .write(&mut buf);
        for handle in handles {
            put_word(&mut buf, *handle);
        }
        Ok(buf)
    }

    /// Read back the handles of the list at `handle`.
    pub fn decode(memory: &[u8], handle: u32) -> Result<(SliceDescriptor, Vec<u32>)> {
        let descriptor = SliceDescriptor::read(memory, handle)?;
        let handles = descriptor
            .elements(memory, WORD)?
            .chunks_exact(WORD as usize)
            .map(|w| u32::from_le_bytes([w[0], w[1], w[2], w[3]]))
            .collect();
        Ok((descriptor, handles))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encode_decode() {
        let mut memory = vec![0u8; 16];
        memory.extend(PointerListLayout::encode(16, &[0x100, 0x200, 0x300]).unwrap());

        let (descriptor, handles) = PointerListLayout::decode(&memory, 16).unwrap();
        assert_eq!(descriptor.base, 24);
        assert_eq!(descriptor.length, 3);
        assert_eq!(handles, vec![0x100, 0x200, 0x300]);
    }

    #[test]
    fn empty_list() {
        assert_eq!(PointerListLayout::allocation_size(0).unwrap(), 8);
        let mut memory = vec![0u8; 4];
        memory.extend(PointerListLayout::encode(4, &[]).unwrap());
        let (descriptor, handles) = PointerListLayout::decode(&memory, 4).unwrap();
        assert_eq!(descriptor.base, 12);
        assert!(handles.is_empty());
    }
}
