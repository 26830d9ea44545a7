//! Half-open key ranges assigned to a single reader.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::value::Value;

/// A `[start, end)` range on the first primary-key column.
///
/// `Value::Null` on either side means the range is unbounded on that side.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Chunk {
    #[serde(default = "null_value")]
    pub start: Value,
    #[serde(default = "null_value")]
    pub end: Value,
}

fn null_value() -> Value {
    Value::Null
}

impl Chunk {
    pub fn new(start: impl Into<Value>, end: impl Into<Value>) -> Self {
        Self {
            start: start.into(),
            end: end.into(),
        }
    }

    /// The chunk covering the whole table.
    pub fn full() -> Self {
        Self {
            start: Value::Null,
            end: Value::Null,
        }
    }

    pub fn is_full(&self) -> bool {
        self.start.is_null() && self.end.is_null()
    }

    /// Whether a first-key-column value falls inside the chunk.
    pub fn contains(&self, key: &Value) -> bool {
        (self.start.is_null() || key >= &self.start) && (self.end.is_null() || key < &self.end)
    }
}

impl fmt::Display for Chunk {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.start.is_null() {
            f.write_str("(-inf")?;
        } else {
            write!(f, "[{}", self.start)?;
        }
        if self.end.is_null() {
            f.write_str(", +inf)")
        } else {
            write!(f, ", {})", self.end)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_contains_half_open() {
        let chunk = Chunk::new(5, 50);
        assert!(chunk.contains(&Value::Int(5)));
        assert!(chunk.contains(&Value::Int(49)));
        assert!(!chunk.contains(&Value::Int(50)));
        assert!(!chunk.contains(&Value::Int(4)));
    }

    #[test]
    fn test_unbounded_sides() {
        let below = Chunk::new(Value::Null, 10);
        assert!(below.contains(&Value::Int(i64::MIN)));
        assert!(!below.contains(&Value::Int(10)));

        let above = Chunk::new(10, Value::Null);
        assert!(above.contains(&Value::Int(i64::MAX)));
        assert!(!above.contains(&Value::Int(9)));

        assert!(Chunk::full().is_full());
        assert!(Chunk::full().contains(&Value::from("anything")));
    }

    #[test]
    fn test_display() {
        assert_eq!(Chunk::new(5, 50).to_string(), "[5, 50)");
        assert_eq!(Chunk::full().to_string(), "(-inf, +inf)");
        assert_eq!(Chunk::new("a", Value::Null).to_string(), "['a', +inf)");
    }

    #[test]
    fn test_deserialize_missing_side_is_unbounded() {
        let chunk: Chunk = serde_json::from_str(r#"{"start": 100}"#).unwrap();
        assert_eq!(chunk, Chunk::new(100, Value::Null));
    }
}
