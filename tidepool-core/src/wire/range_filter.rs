//! Range filter records consumed by the query entry point.

use super::{WORD, put_word, read_words};
use crate::error::{Result, TidepoolError};
use crate::types::RecordKind;
use serde::{Deserialize, Serialize};

/// Size of one range filter record.
pub const RANGE_FILTER_SIZE: u32 = 5 * WORD;

/// The aggregate a range filter constrains.
#[repr(u32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RangeField {
    /// Entry date.
    Date = 0,
    /// Up plus down count.
    Total = 1,
    /// Up count.
    Up = 2,
    /// Down count.
    Down = 3,
    /// Up minus down.
    Sum = 4,
}

impl RangeField {
    /// Whether the field takes a [`RangeFormat`] other than `Plain`.
    #[must_use]
    pub const fn is_formatted(&self) -> bool {
        matches!(self, Self::Up | Self::Down | Self::Sum)
    }
}

/// How a formatted field's value is compared against the range.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "format")]
pub enum RangeFormat {
    /// Raw value; only valid for `Date` and `Total`.
    Plain,
    /// Value scaled against the total by `baseline` (e.g. 100 for percent).
    Percent {
        /// Scale factor.
        baseline: u32,
    },
    /// Raw count.
    Count,
}

impl RangeFormat {
    const fn code(&self) -> u32 {
        match self {
            Self::Plain => 0,
            Self::Percent { .. } => 1,
            Self::Count => 2,
        }
    }

    const fn baseline(&self) -> u32 {
        match self {
            Self::Percent { baseline } => *baseline,
            _ => 0,
        }
    }
}

/// A `[min, max]` constraint on one aggregate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RangeFilter {
    /// Constrained field.
    pub field: RangeField,
    /// Comparison format.
    #[serde(flatten)]
    pub format: RangeFormat,
    /// Lower bound (inclusive).
    pub min: i32,
    /// Upper bound (inclusive).
    pub max: i32,
}

impl RangeFilter {
    /// Constrain the entry date.
    #[must_use]
    pub const fn date(min: i32, max: i32) -> Self {
        Self {
            field: RangeField::Date,
            format: RangeFormat::Plain,
            min,
            max,
        }
    }

    /// Constrain the total count.
    #[must_use]
    pub const fn total(min: i32, max: i32) -> Self {
        Self {
            field: RangeField::Total,
            format: RangeFormat::Plain,
            min,
            max,
        }
    }

    /// Constrain a formatted field.
    #[must_use]
    pub const fn formatted(field: RangeField, format: RangeFormat, min: i32, max: i32) -> Self {
        Self {
            field,
            format,
            min,
            max,
        }
    }

    /// Check the field/format pairing the module accepts.
    pub fn validate(&self) -> Result<()> {
        let plain = matches!(self.format, RangeFormat::Plain);
        if self.field.is_formatted() == plain {
            return Err(TidepoolError::malformed(
                RecordKind::RangeFilter,
                format!("{:?} filter cannot use {:?} format", self.field, self.format),
            ));
        }
        Ok(())
    }

    /// Produce the 20 record bytes.
    pub fn encode(&self) -> Result<Vec<u8>> {
        self.validate()?;
        let mut buf = Vec::with_capacity(RANGE_FILTER_SIZE as usize);
        put_word(&mut buf, self.field as u32);
        put_word(&mut buf, self.format.code());
        put_word(&mut buf, self.format.baseline());
        buf.extend_from_slice(&self.min.to_le_bytes());
        buf.extend_from_slice(&self.max.to_le_bytes());
        Ok(buf)
    }

    /// Read the record at `handle`.
    pub fn decode(memory: &[u8], handle: u32) -> Result<Self> {
        let words = read_words(memory, handle, 5)?;
        let field = match words[0] {
            0 => RangeField::Date,
            1 => RangeField::Total,
            2 => RangeField::Up,
            3 => RangeField::Down,
            4 => RangeField::Sum,
            other => {
                return Err(TidepoolError::malformed(
                    RecordKind::RangeFilter,
                    format!("unknown field {other}"),
                ));
            }
        };
        let format = match words[1] {
            0 => RangeFormat::Plain,
            1 => RangeFormat::Percent { baseline: words[2] },
            2 => RangeFormat::Count,
            other => {
                return Err(TidepoolError::malformed(
                    RecordKind::RangeFilter,
                    format!("unknown format {other}"),
                ));
            }
        };
        let filter = Self {
            field,
            format,
            min: words[3] as i32,
            max: words[4] as i32,
        };
        filter.validate()?;
        Ok(filter)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encode_percent_filter() {
        let filter = RangeFilter::formatted(
            RangeField::Up,
            RangeFormat::Percent { baseline: 100 },
            -1,
            80,
        );
        let bytes = filter.encode().unwrap();
        assert_eq!(bytes.len(), RANGE_FILTER_SIZE as usize);
        assert_eq!(&bytes[0..4], &2u32.to_le_bytes());
        assert_eq!(&bytes[4..8], &1u32.to_le_bytes());
        assert_eq!(&bytes[8..12], &100u32.to_le_bytes());
        assert_eq!(&bytes[12..16], &(-1i32).to_le_bytes());
        assert_eq!(RangeFilter::decode(&bytes, 0).unwrap(), filter);
    }

    #[test]
    fn date_filter_round_trip() {
        let filter = RangeFilter::date(20_000, 30_000);
        let bytes = filter.encode().unwrap();
        assert_eq!(RangeFilter::decode(&bytes, 0).unwrap(), filter);
    }

    #[test]
    fn rejects_mismatched_format() {
        let plain_up = RangeFilter::formatted(RangeField::Up, RangeFormat::Plain, 0, 1);
        assert!(plain_up.encode().is_err());

        let counted_date = RangeFilter::formatted(RangeField::Date, RangeFormat::Count, 0, 1);
        assert!(counted_date.validate().is_err());
    }

    #[test]
    fn deserializes_from_yaml() {
        let filter: RangeFilter =
            serde_yaml::from_str("field: sum\nformat: percent\nbaseline: 100\nmin: 10\nmax: 90\n")
                .unwrap();
        assert_eq!(
            filter,
            RangeFilter::formatted(RangeField::Sum, RangeFormat::Percent { baseline: 100 }, 10, 90)
        );
    }
}
