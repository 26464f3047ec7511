//! Item predicates: `*-unique`, `*-filter` and `*-range`
//!
//! Predicates screen messages before they reach the handlers. They are
//! chained with logical AND and evaluation stops at the first rejection.

use super::control::{ControlFlow, JobError, JobResult};
use crate::config::ExtractorConfig;
use crate::error::{Error, Result};
use crate::extractor::Extractor;
use crate::formatter::Expression;
use crate::types::Kwdict;
use std::collections::HashSet;

/// Inclusive 1-based index range; `end == u64::MAX` is open-ended
pub type IndexRange = (u64, u64);

/// Parse a range expression such as `"-2,4,6-8,10-"`
///
/// Ranges are returned sorted and merged.
pub fn parse_range(spec: &str) -> Result<Vec<IndexRange>> {
    let invalid = |piece: &str| Error::config("range", format!("invalid range '{piece}' in '{spec}'"));
    let number = |text: &str, piece: &str| -> Result<u64> {
        text.trim().parse::<u64>().map_err(|_| invalid(piece))
    };

    let mut ranges = Vec::new();
    for piece in spec.split(',') {
        let trimmed = piece.trim();
        if trimmed.is_empty() {
            continue;
        }
        let range = match trimmed.split_once('-') {
            None => {
                let n = number(trimmed, piece)?;
                (n, n)
            }
            Some((lo, hi)) => {
                let lo = if lo.trim().is_empty() { 1 } else { number(lo, piece)? };
                let hi = if hi.trim().is_empty() {
                    u64::MAX
                } else {
                    number(hi, piece)?
                };
                (lo, hi)
            }
        };
        let range = (range.0.max(1), range.1);
        if range.0 <= range.1 {
            ranges.push(range);
        }
    }
    Ok(optimize_range(ranges))
}

/// Sort ranges and merge overlapping or adjacent ones
pub fn optimize_range(mut ranges: Vec<IndexRange>) -> Vec<IndexRange> {
    ranges.sort_unstable();
    let mut merged: Vec<IndexRange> = Vec::with_capacity(ranges.len());
    for (lo, hi) in ranges {
        match merged.last_mut() {
            Some(last) if lo <= last.1.saturating_add(1) => last.1 = last.1.max(hi),
            _ => merged.push((lo, hi)),
        }
    }
    merged
}

/// Passes each URL only once
#[derive(Debug, Default)]
pub struct UniquePredicate {
    seen: HashSet<String>,
}

impl UniquePredicate {
    fn test(&mut self, url: &str) -> bool {
        self.seen.insert(url.to_string())
    }
}

/// Passes items for which an expression is truthy
#[derive(Debug)]
pub struct FilterPredicate {
    expression: Expression,
}

impl FilterPredicate {
    /// Compile `source`
    pub fn new(source: &str) -> Result<Self> {
        Ok(Self {
            expression: Expression::parse(source)?,
        })
    }

    fn test(&self, kwdict: &Kwdict) -> Result<bool> {
        self.expression
            .eval_bool(kwdict)
            .map_err(|reason| Error::Filter {
                expression: self.expression.source().to_string(),
                reason,
            })
    }
}

/// Passes items whose running index lies in one of the ranges
///
/// Once the index is past the last range the job is stopped.
#[derive(Debug)]
pub struct RangePredicate {
    ranges: Vec<IndexRange>,
    index: u64,
    lower: u64,
    upper: u64,
}

impl RangePredicate {
    /// Build from a range expression
    pub fn new(spec: &str) -> Result<Self> {
        let ranges = parse_range(spec)?;
        let lower = ranges.first().map_or(0, |r| r.0);
        let upper = ranges.iter().map(|r| r.1).max().unwrap_or(0);
        Ok(Self {
            ranges,
            index: 0,
            lower,
            upper,
        })
    }

    /// Let the extractor skip the items before the first range
    ///
    /// Returns how many items were skipped.
    pub fn skip_leading(&mut self, extractor: &mut dyn Extractor) -> u64 {
        if self.lower <= 1 {
            return 0;
        }
        let skipped = extractor.skip(self.lower - 1);
        self.index += skipped;
        skipped
    }

    fn test(&mut self) -> JobResult<bool> {
        self.index += 1;
        if self.index > self.upper {
            return Err(JobError::Signal(ControlFlow::stop()));
        }
        Ok(self
            .ranges
            .iter()
            .any(|&(lo, hi)| lo <= self.index && self.index <= hi))
    }
}

/// Chain of predicates for one message target (`image` or `chapter`)
#[derive(Debug, Default)]
pub struct Predicates {
    unique: Option<UniquePredicate>,
    filter: Option<FilterPredicate>,
    range: Option<RangePredicate>,
    skip_leading: bool,
}

impl Predicates {
    /// Read `<target>-unique`, `<target>-filter` and `<target>-range`
    ///
    /// With `allow_skip`, the range predicate may ask the extractor to skip
    /// leading items; this is only done when no filter is configured since a
    /// filter changes which items are counted.
    pub fn from_config(config: &ExtractorConfig, target: &str, allow_skip: bool) -> Result<Self> {
        let unique = config
            .bool(&format!("{target}-unique"), false)
            .then(UniquePredicate::default);
        let filter = config
            .string(&format!("{target}-filter"))
            .filter(|s| !s.trim().is_empty())
            .map(FilterPredicate::new)
            .transpose()?;
        let range = match config.get(&format!("{target}-range")) {
            None => None,
            Some(value) => {
                let spec = match value {
                    crate::types::Value::String(s) => s.clone(),
                    crate::types::Value::Number(n) => n.to_string(),
                    other => {
                        return Err(Error::config(
                            format!("{target}-range"),
                            format!("expected a range string, got {other}"),
                        ));
                    }
                };
                if spec.trim().is_empty() {
                    None
                } else {
                    Some(RangePredicate::new(&spec)?)
                }
            }
        };
        let skip_leading = allow_skip && filter.is_none();
        Ok(Self {
            unique,
            filter,
            range,
            skip_leading,
        })
    }

    /// Whether no predicate is configured
    pub fn is_empty(&self) -> bool {
        self.unique.is_none() && self.filter.is_none() && self.range.is_none()
    }

    /// Apply the range predicate's extractor skip, if enabled
    pub fn prime(&mut self, extractor: &mut dyn Extractor) -> u64 {
        match (&mut self.range, self.skip_leading) {
            (Some(range), true) => range.skip_leading(extractor),
            _ => 0,
        }
    }

    /// Whether the message for `url`/`kwdict` should be handled
    pub fn test(&mut self, url: &str, kwdict: &Kwdict) -> JobResult<bool> {
        if let Some(unique) = &mut self.unique
            && !unique.test(url)
        {
            return Ok(false);
        }
        if let Some(filter) = &self.filter
            && !filter.test(kwdict)?
        {
            return Ok(false);
        }
        if let Some(range) = &mut self.range
            && !range.test()?
        {
            return Ok(false);
        }
        Ok(true)
    }
}
