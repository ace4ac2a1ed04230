//! Byte layouts of the records exchanged through the arena.
//!
//! Every multi-byte field is a little-endian 32-bit word. Encoders here are
//! pure: given the base address an allocation landed at, they produce the
//! exact bytes to write there. Decoders read from a borrowed view of the
//! arena and never assume an access is in bounds.
//!
//! # Layouts
//!
//! ```text
//! Slice          [base][length] payload...          base = handle + 8
//! Id query       [kind][policy][base][length] ids... base = handle + 16
//! Pointer list   [base][length] handles...          base = handle + 8
//! Range filter   [field][format][baseline][min][max]
//! ```

mod buffer;
mod pointer_list;
mod query;
mod range_filter;
mod slice;

pub use buffer::nul_terminated;
pub use pointer_list::{POINTER_LIST_HEADER_SIZE, PointerListLayout};
pub use query::{FilterPolicy, ID_QUERY_HEADER_SIZE, IdQuery, IdQueryHeader, QueryKind};
pub use range_filter::{RANGE_FILTER_SIZE, RangeField, RangeFilter, RangeFormat};
pub use slice::{SLICE_HEADER_SIZE, SliceDescriptor, SliceLayout};

use crate::error::{Result, TidepoolError};

/// Width of one protocol word in bytes.
pub const WORD: u32 = 4;

/// Borrow `len` bytes starting at `offset`.
pub fn read_bytes(memory: &[u8], offset: u32, len: u32) -> Result<&[u8]> {
    let start = offset as usize;
    let end = start
        .checked_add(len as usize)
        .filter(|end| *end <= memory.len())
        .ok_or(TidepoolError::OutOfBounds {
            offset: offset as u64,
            len: len as u64,
            arena_size: memory.len() as u64,
        })?;
    Ok(&memory[start..end])
}

/// Read one little-endian word at `offset`.
pub fn read_word(memory: &[u8], offset: u32) -> Result<u32> {
    let bytes = read_bytes(memory, offset, WORD)?;
    Ok(u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
}

/// Read `count` consecutive words starting at `offset`.
pub fn read_words(memory: &[u8], offset: u32, count: u32) -> Result<Vec<u32>> {
    let len = count.checked_mul(WORD).ok_or(TidepoolError::OutOfBounds {
        offset: offset as u64,
        len: count as u64 * WORD as u64,
        arena_size: memory.len() as u64,
    })?;
    Ok(read_bytes(memory, offset, len)?
        .chunks_exact(WORD as usize)
        .map(|w| u32::from_le_bytes([w[0], w[1], w[2], w[3]]))
        .collect())
}

/// Convert a host-side length into a 32-bit arena length.
pub fn arena_len(len: usize) -> Result<u32> {
    u32::try_from(len).map_err(|_| TidepoolError::PayloadTooLarge { len })
}

/// `a + b` in the 32-bit arena address space.
pub(crate) fn arena_add(a: u32, b: u32) -> Result<u32> {
    a.checked_add(b).ok_or(TidepoolError::PayloadTooLarge {
        len: a as usize + b as usize,
    })
}

pub(crate) fn put_word(buf: &mut Vec<u8>, value: u32) {
    buf.extend_from_slice(&value.to_le_bytes());
}
