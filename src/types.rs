use std::fmt;

use serde::{Deserialize, Serialize};

/// Identifies one ratio cell: origin row × development gap column.
///
/// Serialized on the wire as the `"r,c"` string the selection file and the
/// sync protocol both use, but held in memory as a real composite key so it
/// can sit in ordered sets without string parsing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct CellKey {
    pub row: usize,
    pub col: usize,
}

impl CellKey {
    pub fn new(row: usize, col: usize) -> Self {
        CellKey { row, col }
    }

    /// Parse the wire form `"r,c"`. Anything malformed is dropped by callers.
    pub fn parse(text: &str) -> Option<Self> {
        let (r, c) = text.split_once(',')?;
        Some(CellKey {
            row: r.trim().parse().ok()?,
            col: c.trim().parse().ok()?,
        })
    }
}

impl fmt::Display for CellKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{},{}", self.row, self.col)
    }
}

impl Serialize for CellKey {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for CellKey {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        CellKey::parse(&raw)
            .ok_or_else(|| serde::de::Error::custom(format!("invalid cell key {raw:?}")))
    }
}

/// Stable identifier for an average formula within one selection scope.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct FormulaId(pub String);

impl FormulaId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for FormulaId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for FormulaId {
    fn from(s: &str) -> Self {
        FormulaId(s.to_string())
    }
}

/// State of one ratio cell in the persisted strike pattern.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CellState {
    Included,
    Struck,
    /// Not computable: masked operand, zero denominator, or the synthetic
    /// ultimate column. Never a strike target.
    NotApplicable,
}

impl CellState {
    pub fn to_code(self) -> u8 {
        match self {
            CellState::Included => 0,
            CellState::Struck => 1,
            CellState::NotApplicable => 2,
        }
    }

    /// Unknown codes read from disk decay to NotApplicable rather than erroring.
    pub fn from_code(code: u8) -> Self {
        match code {
            0 => CellState::Included,
            1 => CellState::Struck,
            _ => CellState::NotApplicable,
        }
    }
}

/// Which extreme `exclude_extreme` strikes next.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    High,
    Low,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cell_key_round_trips_through_wire_form() {
        let key = CellKey::new(3, 7);
        assert_eq!(key.to_string(), "3,7");
        assert_eq!(CellKey::parse("3,7"), Some(key));
    }

    #[test]
    fn cell_key_parse_rejects_garbage() {
        assert_eq!(CellKey::parse(""), None);
        assert_eq!(CellKey::parse("3"), None);
        assert_eq!(CellKey::parse("a,b"), None);
        assert_eq!(CellKey::parse("1,2,3"), None);
    }

    #[test]
    fn cell_key_serializes_as_string() {
        let json = serde_json::to_string(&CellKey::new(0, 2)).unwrap();
        assert_eq!(json, r#""0,2""#);
        let back: CellKey = serde_json::from_str(&json).unwrap();
        assert_eq!(back, CellKey::new(0, 2));
    }

    #[test]
    fn cell_state_codes_are_stable() {
        assert_eq!(CellState::Included.to_code(), 0);
        assert_eq!(CellState::Struck.to_code(), 1);
        assert_eq!(CellState::NotApplicable.to_code(), 2);
        assert_eq!(CellState::from_code(1), CellState::Struck);
        // Unknown codes from a newer writer are treated as no-data.
        assert_eq!(CellState::from_code(9), CellState::NotApplicable);
    }
}
