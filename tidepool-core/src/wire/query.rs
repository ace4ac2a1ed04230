//! Tagged id query records.

use super::slice::SliceDescriptor;
use super::{WORD, arena_add, arena_len, put_word, read_word};
use crate::error::{Result, TidepoolError};
use crate::types::RecordKind;
use serde::{Deserialize, Serialize};

/// Size of the `(kind, policy, base, length)` header.
pub const ID_QUERY_HEADER_SIZE: u32 = 4 * WORD;

/// Which id space a query matches against.
#[repr(u32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueryKind {
    /// Match primary record ids.
    ById = 0,
    /// Match tag ids.
    ByTag = 1,
}

impl TryFrom<u32> for QueryKind {
    type Error = TidepoolError;

    fn try_from(value: u32) -> Result<Self> {
        match value {
            0 => Ok(Self::ById),
            1 => Ok(Self::ByTag),
            other => Err(TidepoolError::malformed(
                RecordKind::IdQuery,
                format!("unknown query kind {other}"),
            )),
        }
    }
}

/// Whether matching ids are kept or dropped.
#[repr(u32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FilterPolicy {
    /// Keep records that match.
    Include = 0,
    /// Drop records that match.
    Exclude = 1,
}

impl TryFrom<u32> for FilterPolicy {
    type Error = TidepoolError;

    fn try_from(value: u32) -> Result<Self> {
        match value {
            0 => Ok(Self::Include),
            1 => Ok(Self::Exclude),
            other => Err(TidepoolError::malformed(
                RecordKind::IdQuery,
                format!("unknown filter policy {other}"),
            )),
        }
    }
}

/// An id query as the host builds it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdQuery {
    /// Id space.
    pub kind: QueryKind,
    /// Include or exclude matches.
    pub policy: FilterPolicy,
    /// Ids to match.
    #[serde(default)]
    pub ids: Vec<u32>,
}

impl IdQuery {
    /// Create a query.
    pub fn new(kind: QueryKind, policy: FilterPolicy, ids: impl Into<Vec<u32>>) -> Self {
        Self {
            kind,
            policy,
            ids: ids.into(),
        }
    }

    /// Bytes to request for header plus id list in one allocation.
    pub fn allocation_size(&self) -> Result<u32> {
        let list = arena_len(self.ids.len())?
            .checked_mul(WORD)
            .ok_or(TidepoolError::PayloadTooLarge {
                len: self.ids.len() * WORD as usize,
            })?;
        arena_add(ID_QUERY_HEADER_SIZE, list)
    }

    /// Produce the record bytes for an allocation that landed at `base`.
    ///
    /// The list base always points just past the header, so an empty list
    /// still yields a dereferenceable base.
    pub fn encode(&self, base: u32) -> Result<Vec<u8>> {
        let mut buf = Vec::with_capacity(self.allocation_size()? as usize);
        put_word(&mut buf, self.kind as u32);
        put_word(&mut buf, self.policy as u32);
        SliceDescriptor {
            base: arena_add(base, ID_QUERY_HEADER_SIZE)?,
            length: arena_len(self.ids.len())?,
        }
        .write(&mut buf);
        for id in &self.ids {
            put_word(&mut buf, *id);
        }
        Ok(buf)
    }
}

/// The header of an id query read back from the arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IdQueryHeader {
    /// Id space.
    pub kind: QueryKind,
    /// Include or exclude matches.
    pub policy: FilterPolicy,
    /// Trailing id list.
    pub list: SliceDescriptor,
}

impl IdQueryHeader {
    /// Read the header at `handle`.
    pub fn read(memory: &[u8], handle: u32) -> Result<Self> {
        Ok(Self {
            kind: QueryKind::try_from(read_word(memory, handle)?)?,
            policy: FilterPolicy::try_from(read_word(memory, arena_add(handle, WORD)?)?)?,
            list: SliceDescriptor::read(memory, arena_add(handle, 2 * WORD)?)?,
        })
    }

    /// Read the trailing ids.
    pub fn ids(&self, memory: &[u8]) -> Result<Vec<u32>> {
        Ok(self
            .list
            .elements(memory, WORD)?
            .chunks_exact(WORD as usize)
            .map(|w| u32::from_le_bytes([w[0], w[1], w[2], w[3]]))
            .collect())
    }

    /// Decode the full query.
    pub fn to_query(&self, memory: &[u8]) -> Result<IdQuery> {
        Ok(IdQuery::new(self.kind, self.policy, self.ids(memory)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn place(base: u32, record: &[u8]) -> Vec<u8> {
        let mut memory = vec![0xAA; base as usize];
        memory.extend_from_slice(record);
        memory
    }

    #[test]
    fn encodes_header_then_ids() {
        let query = IdQuery::new(QueryKind::ByTag, FilterPolicy::Exclude, [7, 9]);
        assert_eq!(query.allocation_size().unwrap(), 24);

        let record = query.encode(0x40).unwrap();
        assert_eq!(record.len(), 24);
        assert_eq!(&record[0..4], &1u32.to_le_bytes());
        assert_eq!(&record[4..8], &1u32.to_le_bytes());
        assert_eq!(&record[8..12], &0x50u32.to_le_bytes());
        assert_eq!(&record[12..16], &2u32.to_le_bytes());
        assert_eq!(&record[16..20], &7u32.to_le_bytes());
        assert_eq!(&record[20..24], &9u32.to_le_bytes());
    }

    #[test]
    fn empty_list_has_dereferenceable_base() {
        let query = IdQuery::new(QueryKind::ById, FilterPolicy::Include, Vec::new());
        let memory = place(64, &query.encode(64).unwrap());

        let header = IdQueryHeader::read(&memory, 64).unwrap();
        assert_eq!(header.list.length, 0);
        assert_ne!(header.list.base, 0);
        assert_eq!(header.list.base, 64 + ID_QUERY_HEADER_SIZE);
        assert!(header.ids(&memory).unwrap().is_empty());
    }

    #[test]
    fn decode_round_trip() {
        let query = IdQuery::new(QueryKind::ById, FilterPolicy::Include, [0, 3, 1 << 20]);
        let memory = place(8, &query.encode(8).unwrap());
        let header = IdQueryHeader::read(&memory, 8).unwrap();
        assert_eq!(header.to_query(&memory).unwrap(), query);
    }

    #[test]
    fn rejects_unknown_kind() {
        let mut memory = Vec::new();
        for w in [5u32, 0, 16, 0] {
            put_word(&mut memory, w);
        }
        let err = IdQueryHeader::read(&memory, 0).unwrap_err();
        assert_eq!(err.code(), "E101");
    }
}
