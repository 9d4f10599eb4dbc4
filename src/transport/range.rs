use serde::Serialize;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Inclusive byte range `[first, last]`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct ContentRange {
    pub first: u64,
    pub last: u64,
}

impl ContentRange {
    pub fn new(first: u64, last: u64) -> Self {
        debug_assert!(first <= last);
        Self { first, last }
    }

    /// Number of bytes covered
    pub fn length(&self) -> u64 {
        self.last - self.first + 1
    }
}

impl fmt::Display for ContentRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "bytes {}-{}/*", self.first, self.last)
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Invalid Content-Range '{value}': {reason}")]
pub struct ContentRangeError {
    pub value: String,
    pub reason: &'static str,
}

impl FromStr for ContentRange {
    type Err = ContentRangeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        parse_content_range(s)
    }
}

/// Parse a `Content-Range` value: `bytes FIRST-LAST/(LENGTH|*)`
///
/// The total length is advisory and not validated.
pub fn parse_content_range(value: &str) -> Result<ContentRange, ContentRangeError> {
    let fail = |reason| ContentRangeError {
        value: value.to_string(),
        reason,
    };

    let (unit, spec) = value.split_once(' ').ok_or_else(|| fail("missing range"))?;
    if unit != "bytes" {
        return Err(fail("unit is not bytes"));
    }
    let (range, _total) = spec.split_once('/').ok_or_else(|| fail("missing total length"))?;
    let (first, last) = range.split_once('-').ok_or_else(|| fail("missing '-'"))?;

    let first = parse_bound(first).ok_or_else(|| fail("invalid first byte position"))?;
    let last = parse_bound(last).ok_or_else(|| fail("invalid last byte position"))?;
    if first > last {
        return Err(fail("first byte position after last"));
    }
    Ok(ContentRange { first, last })
}

fn parse_bound(s: &str) -> Option<u64> {
    if s.is_empty() || !s.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    s.parse().ok()
}

/// `Range` header value requesting all `ranges`: `bytes=f1-l1,f2-l2`
pub fn range_header(ranges: &[ContentRange]) -> String {
    let specs: Vec<String> = ranges
        .iter()
        .map(|r| format!("{}-{}", r.first, r.last))
        .collect();
    format!("bytes={}", specs.join(","))
}
