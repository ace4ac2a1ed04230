//! Result tuples returned by the module.
//!
//! ```text
//! offset  0  range_start
//! offset  4  range_end
//! offset  8  aggregation kind (low byte; rest is padding)
//! offset 12  array_base
//! offset 16  array_capacity
//! offset 20  array_length
//! ```
//!
//! Neither the tuple's total extent nor the stride of its trailing elements
//! is recorded in the tuple. Both come from size descriptors exported by the
//! module; this module only consumes the resolved [`Stride`] values and never
//! assumes a width of its own.

use crate::error::{Result, TidepoolError};
use crate::types::RecordKind;
use crate::wire::{WORD, read_bytes, read_word, read_words};
use serde::Serialize;
use std::fmt;

/// Size of the fixed prefix every result tuple starts with.
pub const TUPLE_PREFIX_SIZE: u32 = 6 * WORD;

/// Byte offset of the `array_base` field.
pub const ARRAY_BASE_OFFSET: u32 = 3 * WORD;

/// Size of a range totals record.
pub const RANGE_TOTALS_SIZE: u32 = 2 * WORD;

/// Record kinds whose byte size the module publishes as a descriptor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ElementKind {
    /// The result tuple itself.
    Histogram,
    /// One trailing element of a result tuple.
    Recommendation,
}

impl fmt::Display for ElementKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Histogram => f.write_str("histogram"),
            Self::Recommendation => f.write_str("recommendation"),
        }
    }
}

/// A byte stride resolved from a size descriptor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Stride {
    kind: ElementKind,
    byte_length: u32,
}

impl Stride {
    /// Validate a descriptor value read from the arena.
    ///
    /// The stride must be a non-zero whole number of words.
    pub fn new(kind: ElementKind, byte_length: u32, descriptor: &str) -> Result<Self> {
        if byte_length == 0 || byte_length % WORD != 0 {
            return Err(TidepoolError::InvalidStride {
                name: descriptor.to_string(),
                byte_length,
                cause: format!("{kind} stride must be a non-zero multiple of {WORD} bytes"),
            });
        }
        Ok(Self { kind, byte_length })
    }

    /// Element kind the stride belongs to.
    #[must_use]
    pub const fn kind(&self) -> ElementKind {
        self.kind
    }

    /// Stride in bytes.
    #[must_use]
    pub const fn bytes(&self) -> u32 {
        self.byte_length
    }

    /// Stride in words, for typed access.
    #[must_use]
    pub const fn words(&self) -> u32 {
        self.byte_length / WORD
    }
}

/// Bucket width of an aggregation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AggregationKind {
    /// Monthly buckets.
    Month,
    /// Weekly buckets.
    Week,
}

impl AggregationKind {
    fn from_word(word: u32) -> Result<Self> {
        match word & 0xff {
            0 => Ok(Self::Month),
            1 => Ok(Self::Week),
            other => Err(TidepoolError::malformed(
                RecordKind::ResultTuple,
                format!("unknown aggregation kind {other}"),
            )),
        }
    }
}

/// Descriptor of a result tuple's trailing array.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct TrailingArray {
    /// Arena offset of the first element.
    pub base: u32,
    /// Elements allocated.
    pub capacity: u32,
    /// Elements initialized.
    pub length: u32,
}

/// The fixed prefix of a result tuple.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct TupleHeader {
    /// First date covered.
    pub range_start: u32,
    /// Last date covered.
    pub range_end: u32,
    /// Bucket width.
    pub aggregation: AggregationKind,
    /// Trailing element array.
    pub array: TrailingArray,
}

impl TupleHeader {
    /// Read the prefix at `handle`.
    pub fn read(memory: &[u8], handle: u32) -> Result<Self> {
        let words = read_words(memory, handle, TUPLE_PREFIX_SIZE / WORD)?;
        let array = TrailingArray {
            base: words[3],
            capacity: words[4],
            length: words[5],
        };
        if array.length > array.capacity {
            return Err(TidepoolError::malformed(
                RecordKind::ResultTuple,
                format!(
                    "array length {} exceeds capacity {}",
                    array.length, array.capacity
                ),
            ));
        }
        Ok(Self {
            range_start: words[0],
            range_end: words[1],
            aggregation: AggregationKind::from_word(words[2])?,
            array,
        })
    }
}

/// One trailing element: the counts recorded for a date bucket.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Recommendation {
    /// Bucket date.
    pub date: u32,
    /// Up count.
    pub up: u32,
    /// Down count.
    pub down: u32,
}

impl Recommendation {
    /// Words the typed view reads from each element.
    pub const WORDS: u32 = 3;
}

/// A result tuple copied out of the arena together with its trailing bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedTuple {
    header: TupleHeader,
    raw: Vec<u8>,
    trailing: Vec<u8>,
    element: Stride,
}

impl DecodedTuple {
    /// Decode the tuple at `handle`.
    ///
    /// `tuple` is the resolved histogram stride (the tuple's own extent) and
    /// `element` the resolved recommendation stride. Exactly
    /// `capacity * element` trailing bytes are copied.
    pub fn decode(memory: &[u8], handle: u32, tuple: Stride, element: Stride) -> Result<Self> {
        if tuple.bytes() < TUPLE_PREFIX_SIZE {
            return Err(TidepoolError::malformed(
                RecordKind::ResultTuple,
                format!(
                    "descriptor reports {} bytes, shorter than the {TUPLE_PREFIX_SIZE}-byte prefix",
                    tuple.bytes()
                ),
            ));
        }
        if element.words() < Recommendation::WORDS {
            return Err(TidepoolError::malformed(
                RecordKind::ResultTuple,
                format!(
                    "element stride of {} words cannot hold a {}-word element",
                    element.words(),
                    Recommendation::WORDS
                ),
            ));
        }

        let header = TupleHeader::read(memory, handle)?;
        let raw = read_bytes(memory, handle, tuple.bytes())?.to_vec();
        let trailing_len = header
            .array
            .capacity
            .checked_mul(element.bytes())
            .ok_or_else(|| {
                TidepoolError::malformed(
                    RecordKind::ResultTuple,
                    format!("capacity {} overflows the arena", header.array.capacity),
                )
            })?;
        let trailing = read_bytes(memory, header.array.base, trailing_len)?.to_vec();

        Ok(Self {
            header,
            raw,
            trailing,
            element,
        })
    }

    /// The fixed prefix.
    #[must_use]
    pub fn header(&self) -> &TupleHeader {
        &self.header
    }

    /// The tuple's raw bytes, as long as the histogram descriptor says.
    #[must_use]
    pub fn raw(&self) -> &[u8] {
        &self.raw
    }

    /// The trailing array's bytes, `capacity * stride` long.
    #[must_use]
    pub fn trailing_bytes(&self) -> &[u8] {
        &self.trailing
    }

    /// Stride of the trailing elements.
    #[must_use]
    pub fn element_stride(&self) -> Stride {
        self.element
    }

    /// The initialized trailing elements.
    pub fn recommendations(&self) -> Result<Vec<Recommendation>> {
        let stride = self.element.bytes() as usize;
        (0..self.header.array.length as usize)
            .map(|i| {
                let at = (i * stride) as u32;
                Ok(Recommendation {
                    date: read_word(&self.trailing, at)?,
                    up: read_word(&self.trailing, at + WORD)?,
                    down: read_word(&self.trailing, at + 2 * WORD)?,
                })
            })
            .collect()
    }

    /// A copy of the raw tuple whose `array_base` points at `new_base`.
    ///
    /// Every other byte is preserved, so the result can be submitted as the
    /// input tuple of an aggregation call.
    #[must_use]
    pub fn patched(&self, new_base: u32) -> Vec<u8> {
        let mut bytes = self.raw.clone();
        let at = ARRAY_BASE_OFFSET as usize;
        bytes[at..at + WORD as usize].copy_from_slice(&new_base.to_le_bytes());
        bytes
    }
}

/// Summed counts over a date range.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct RangeTotals {
    /// Summed up counts.
    pub up: u32,
    /// Summed down counts.
    pub down: u32,
}

impl RangeTotals {
    /// Read the totals at `handle`.
    pub fn decode(memory: &[u8], handle: u32) -> Result<Self> {
        let words = read_words(memory, handle, RANGE_TOTALS_SIZE / WORD)?;
        Ok(Self {
            up: words[0],
            down: words[1],
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TUPLE_AT: u32 = 16;
    const ARRAY_AT: u32 = 64;

    fn strides(tuple: u32, element: u32) -> (Stride, Stride) {
        (
            Stride::new(ElementKind::Histogram, tuple, "BYTE_LENGTH_HISTOGRAM").unwrap(),
            Stride::new(ElementKind::Recommendation, element, "BYTE_LENGTH_RECOMMENDATION")
                .unwrap(),
        )
    }

    /// Tuple at 16, `capacity` elements of `stride` bytes at 64.
    fn arena(stride: u32, capacity: u32, elements: &[[u32; 3]]) -> Vec<u8> {
        let mut memory = vec![0u8; 256];
        let words = [100u32, 300, 0xABCD_0001, ARRAY_AT, capacity, elements.len() as u32];
        for (i, w) in words.iter().enumerate() {
            let at = TUPLE_AT as usize + i * 4;
            memory[at..at + 4].copy_from_slice(&w.to_le_bytes());
        }
        for (i, e) in elements.iter().enumerate() {
            for (j, w) in e.iter().enumerate() {
                let at = ARRAY_AT as usize + i * stride as usize + j * 4;
                memory[at..at + 4].copy_from_slice(&w.to_le_bytes());
            }
        }
        memory
    }

    #[test]
    fn stride_validation() {
        assert!(Stride::new(ElementKind::Recommendation, 0, "d").is_err());
        assert!(Stride::new(ElementKind::Recommendation, 10, "d").is_err());
        let stride = Stride::new(ElementKind::Recommendation, 12, "d").unwrap();
        assert_eq!(stride.words(), 3);
    }

    #[test]
    fn decodes_prefix_and_elements() {
        let memory = arena(12, 4, &[[110, 5, 1], [120, 7, 2], [130, 0, 9]]);
        let (tuple, element) = strides(24, 12);
        let decoded = DecodedTuple::decode(&memory, TUPLE_AT, tuple, element).unwrap();

        let header = decoded.header();
        assert_eq!(header.range_start, 100);
        assert_eq!(header.range_end, 300);
        assert_eq!(header.aggregation, AggregationKind::Week);
        assert_eq!(header.array.capacity, 4);
        assert_eq!(header.array.length, 3);

        assert_eq!(decoded.raw().len(), 24);
        assert_eq!(decoded.trailing_bytes().len(), 4 * 12);
        let recs = decoded.recommendations().unwrap();
        assert_eq!(recs.len(), 3);
        assert_eq!(
            recs[1],
            Recommendation {
                date: 120,
                up: 7,
                down: 2
            }
        );
    }

    #[test]
    fn wider_stride_is_honored() {
        let memory = arena(16, 2, &[[1, 2, 3], [4, 5, 6]]);
        let (tuple, element) = strides(24, 16);
        let decoded = DecodedTuple::decode(&memory, TUPLE_AT, tuple, element).unwrap();
        assert_eq!(decoded.trailing_bytes().len(), 32);
        let recs = decoded.recommendations().unwrap();
        assert_eq!(
            recs[1],
            Recommendation {
                date: 4,
                up: 5,
                down: 6
            }
        );
    }

    #[test]
    fn patch_only_touches_array_base() {
        let memory = arena(12, 1, &[[1, 1, 1]]);
        let (tuple, element) = strides(24, 12);
        let decoded = DecodedTuple::decode(&memory, TUPLE_AT, tuple, element).unwrap();

        let patched = decoded.patched(0xDEAD_BEEF);
        assert_eq!(patched.len(), decoded.raw().len());
        assert_eq!(&patched[12..16], &0xDEAD_BEEFu32.to_le_bytes());
        assert_eq!(&patched[..12], &decoded.raw()[..12]);
        assert_eq!(&patched[16..], &decoded.raw()[16..]);
    }

    #[test]
    fn rejects_length_over_capacity() {
        let mut memory = arena(12, 1, &[[1, 1, 1]]);
        let at = TUPLE_AT as usize + 20;
        memory[at..at + 4].copy_from_slice(&5u32.to_le_bytes());
        let (tuple, element) = strides(24, 12);
        let err = DecodedTuple::decode(&memory, TUPLE_AT, tuple, element).unwrap_err();
        assert_eq!(err.code(), "E101");
    }

    #[test]
    fn rejects_short_descriptors() {
        let memory = arena(12, 1, &[[1, 1, 1]]);
        let (tuple, element) = strides(16, 12);
        assert!(DecodedTuple::decode(&memory, TUPLE_AT, tuple, element).is_err());

        let (tuple, element) = strides(24, 8);
        assert!(DecodedTuple::decode(&memory, TUPLE_AT, tuple, element).is_err());
    }

    #[test]
    fn trailing_array_out_of_bounds() {
        let memory = arena(12, 100, &[]);
        let (tuple, element) = strides(24, 12);
        let err = DecodedTuple::decode(&memory, TUPLE_AT, tuple, element).unwrap_err();
        assert_eq!(err.code(), "E002");
    }

    #[test]
    fn range_totals() {
        let mut memory = vec![0u8; 8];
        memory.extend_from_slice(&12u32.to_le_bytes());
        memory.extend_from_slice(&3u32.to_le_bytes());
        assert_eq!(
            RangeTotals::decode(&memory, 8).unwrap(),
            RangeTotals { up: 12, down: 3 }
        );
    }
}
