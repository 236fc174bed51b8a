//! Cycle points: discrete moments on a cycling workflow's time axis.

use std::cmp::Ordering;
use std::fmt;

use serde::{Deserialize, Serialize};

/// A cycle point.
///
/// Points compare numerically when both render as integers (integer
/// cycling) and lexicographically otherwise (ISO-8601 date-time points
/// sort correctly under byte order). Equal numeric values with distinct
/// renderings tie-break on the rendering so that ordering stays
/// consistent with equality.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CyclePoint(String);

impl CyclePoint {
    /// Wraps a cycle point string.
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// The point's string rendering.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Ord for CyclePoint {
    fn cmp(&self, other: &Self) -> Ordering {
        match (self.0.parse::<i64>(), other.0.parse::<i64>()) {
            (Ok(a), Ok(b)) => a.cmp(&b).then_with(|| self.0.cmp(&other.0)),
            _ => self.0.cmp(&other.0),
        }
    }
}

impl PartialOrd for CyclePoint {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for CyclePoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for CyclePoint {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_integer_points_compare_numerically() {
        assert!(CyclePoint::new("2") < CyclePoint::new("10"));
        assert!(CyclePoint::new("10") > CyclePoint::new("9"));
    }

    #[test]
    fn test_date_points_compare_lexicographically() {
        assert!(CyclePoint::new("20200101T0000Z") < CyclePoint::new("20200102T0000Z"));
    }

    #[test]
    fn test_ordering_consistent_with_equality() {
        let padded = CyclePoint::new("01");
        let plain = CyclePoint::new("1");
        assert_ne!(padded, plain);
        assert_ne!(padded.cmp(&plain), Ordering::Equal);
    }
}
