//! Nagios-style threshold ranges.
//!
//! Supported syntax:
//! - `10`: alert outside `0..=10`
//! - `10:`: alert below 10 (end is positive infinity)
//! - `~:10`: alert above 10 (start is negative infinity)
//! - `10:20`: alert outside `10..=20`
//! - `@10:20`: alert inside `10..=20`
//!
//! An empty expression means "severity not configured". It is rejected here;
//! callers check for it and skip evaluation before parsing.

use std::fmt;
use std::str::FromStr;

/// Error type for range parsing failures.
#[derive(Debug, Clone, PartialEq)]
pub struct RangeParseError {
    pub input: String,
    pub message: String,
}

impl fmt::Display for RangeParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Failed to parse range '{}': {}", self.input, self.message)
    }
}

impl std::error::Error for RangeParseError {}

/// A parsed threshold range.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Range {
    pub start: f64,
    pub end: f64,
    /// `@` prefix: alert when the value is inside the range.
    pub inside: bool,
}

impl Range {
    /// Parses a range expression.
    ///
    /// # Examples
    ///
    /// ```
    /// use check_f5_telemetry::range::Range;
    ///
    /// let r = Range::parse("1:").unwrap();
    /// assert!(r.matches(0.0));
    /// assert!(!r.matches(1.0));
    /// ```
    pub fn parse(input: &str) -> Result<Self, RangeParseError> {
        let err = |message: &str| RangeParseError {
            input: input.to_string(),
            message: message.to_string(),
        };

        let mut expr = input.trim();
        if expr.is_empty() {
            return Err(err("empty range"));
        }

        let inside = if let Some(rest) = expr.strip_prefix('@') {
            expr = rest;
            true
        } else {
            false
        };

        let (start, end) = match expr.split_once(':') {
            Some((start, end)) => {
                let start = match start {
                    "" => 0.0,
                    "~" => f64::NEG_INFINITY,
                    s => parse_bound(s).ok_or_else(|| err("invalid start"))?,
                };
                let end = match end {
                    "" => f64::INFINITY,
                    s => parse_bound(s).ok_or_else(|| err("invalid end"))?,
                };
                (start, end)
            }
            None => (0.0, parse_bound(expr).ok_or_else(|| err("invalid end"))?),
        };

        if start > end {
            return Err(err("start is greater than end"));
        }

        Ok(Self { start, end, inside })
    }

    /// Returns `true` when `value` should raise an alert.
    ///
    /// Without `@` that is a value outside `start..=end`, with `@` a value inside.
    pub fn matches(&self, value: f64) -> bool {
        let within = value >= self.start && value <= self.end;
        within == self.inside
    }
}

impl FromStr for Range {
    type Err = RangeParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

fn parse_bound(s: &str) -> Option<f64> {
    s.trim().parse::<f64>().ok().filter(|v| v.is_finite())
}
