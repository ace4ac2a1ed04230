//! Query command - run an id query with an optional date filter.

use anyhow::{Context, Result, bail};
use std::path::Path;
use tidepool_core::wire::{FilterPolicy, IdQuery, QueryKind, RangeFilter};

/// Options for the query command.
pub struct QueryOptions<'a> {
    /// Ids to match.
    pub ids: Vec<u32>,
    /// Match tag ids.
    pub by_tag: bool,
    /// Drop matches.
    pub exclude: bool,
    /// `MIN:MAX` date range.
    pub date: Option<&'a str>,
}

/// Parse a `MIN:MAX` range.
fn parse_range(range: &str) -> Result<(i32, i32)> {
    let Some((min, max)) = range.split_once(':') else {
        bail!("Range must be MIN:MAX, got '{range}'");
    };
    let min = min.trim().parse().with_context(|| format!("Invalid minimum '{min}'"))?;
    let max = max.trim().parse().with_context(|| format!("Invalid maximum '{max}'"))?;
    if min > max {
        bail!("Range minimum {min} exceeds maximum {max}");
    }
    Ok((min, max))
}

/// Run the query command.
pub fn run(
    module: &Path,
    config: Option<&Path>,
    snapshot: Option<&str>,
    options: QueryOptions<'_>,
) -> Result<()> {
    let kind = if options.by_tag {
        QueryKind::ByTag
    } else {
        QueryKind::ById
    };
    let policy = if options.exclude {
        FilterPolicy::Exclude
    } else {
        FilterPolicy::Include
    };
    let query = IdQuery::new(kind, policy, options.ids);
    let filters = match options.date {
        Some(range) => {
            let (min, max) = parse_range(range)?;
            vec![RangeFilter::date(min, max)]
        }
        None => Vec::new(),
    };

    let mut binding = super::bind(module, config)?;
    super::initialize(&mut binding, snapshot)?;
    let response = binding.query(&query, &filters).context("Query failed")?;
    println!("{response}");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn range_parsing() {
        assert_eq!(parse_range("1:10").unwrap(), (1, 10));
        assert_eq!(parse_range(" -5 : 5 ").unwrap(), (-5, 5));
        assert!(parse_range("10").is_err());
        assert!(parse_range("10:1").is_err());
        assert!(parse_range("a:1").is_err());
    }
}
