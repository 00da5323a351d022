use std::{num::ParseFloatError, ops::Range, str::FromStr};

use mzpeaks::coordinate::Span1D;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// A closed retention time interval used to select the MS1 and MS2 scans of a run
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TimeRange {
    pub start: f64,
    pub end: f64,
}

impl TimeRange {
    pub fn new(start: f64, end: f64) -> Self {
        Self { start, end }
    }
}

impl Span1D for TimeRange {
    type DimType = f64;

    fn start(&self) -> Self::DimType {
        self.start
    }

    fn end(&self) -> Self::DimType {
        self.end
    }
}

impl Default for TimeRange {
    fn default() -> Self {
        Self {
            start: 0.0,
            end: f64::INFINITY,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum TimeRangeParseError {
    #[error("Failed to parse time range start {0}")]
    MalformedStart(ParseFloatError),
    #[error("Failed to parse time range end {0}")]
    MalformedEnd(ParseFloatError),
    #[error("A time range must separate its start and end with '-', ':' or ' '")]
    MissingSeparator,
}

fn parse_bound(token: &str, empty: f64) -> Result<f64, ParseFloatError> {
    let token = token.trim();
    if token.is_empty() {
        Ok(empty)
    } else {
        token.parse()
    }
}

impl FromStr for TimeRange {
    type Err = TimeRangeParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let separator = [' ', ':', '-']
            .into_iter()
            .find(|c| s.contains(*c))
            .ok_or(TimeRangeParseError::MissingSeparator)?;
        let (start, end) = s
            .split_once(separator)
            .ok_or(TimeRangeParseError::MissingSeparator)?;
        let start = parse_bound(start, 0.0).map_err(TimeRangeParseError::MalformedStart)?;
        let end = parse_bound(end, f64::INFINITY).map_err(TimeRangeParseError::MalformedEnd)?;
        Ok(TimeRange { start, end })
    }
}

impl From<Range<f64>> for TimeRange {
    fn from(value: Range<f64>) -> Self {
        Self::new(value.start, value.end)
    }
}
